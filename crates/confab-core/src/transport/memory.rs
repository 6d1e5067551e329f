//! In-process transport for tests and local simulation.
//!
//! Two `MemoryTransport`s can be paired so that the conversations behind
//! them run a complete secret comparison: the side that starts stores its
//! secret, the answering side's secret is compared against it, and both
//! conversations receive the outcome on their event queues.

use super::{ConversationEvent, SendError, SendReceipt, Transport};
use crate::error::{Error, Result};
use crate::identity::{Fingerprint, PeerId};
use crate::logging::Redacted;
use crate::pending::TraceId;
use crate::verify::{Secret, SmpEvent};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Length of the simulated key fingerprint.
const FINGERPRINT_LEN: usize = 20;

/// A message the transport accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    /// Destination.
    pub peer: PeerId,
    /// Destination resource.
    pub resource: String,
    /// Plain text.
    pub text: String,
    /// Assigned trace id.
    pub trace: TraceId,
    /// Reported as delayed.
    pub delayed: bool,
}

/// A recorded secret exchange call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCall {
    /// `start_secret_exchange`.
    Start {
        /// Peer.
        peer: PeerId,
        /// Resource.
        resource: String,
        /// Prompt shown to the peer.
        prompt: String,
        /// Secret supplied.
        secret: Secret,
    },
    /// `finish_secret_exchange`.
    Finish {
        /// Peer.
        peer: PeerId,
        /// Resource.
        resource: String,
        /// Secret supplied.
        secret: Secret,
    },
}

#[derive(Debug, Default)]
struct Inner {
    offline: bool,
    delay_next: usize,
    encrypted: bool,
    refuse_exchange: bool,
    peer_fingerprint: Option<Fingerprint>,
    sent: Vec<SentRecord>,
    exchanges: Vec<ExchangeCall>,
    started_secret: Option<Secret>,
    events: Option<mpsc::Sender<ConversationEvent>>,
    remote: Option<Weak<MemoryTransport>>,
}

/// Scriptable in-memory [`Transport`].
#[derive(Debug)]
pub struct MemoryTransport {
    next_trace: AtomicU64,
    inner: Mutex<Inner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated fingerprint of a key.
pub fn fingerprint_of(key: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(key);
    Fingerprint::from_bytes(digest[..FINGERPRINT_LEN].to_vec())
}

impl MemoryTransport {
    /// An encrypted, online transport with no peer attached.
    pub fn new() -> Self {
        Self {
            next_trace: AtomicU64::new(1),
            inner: Mutex::new(Inner {
                encrypted: true,
                ..Default::default()
            }),
        }
    }

    /// Two linked transports. Each side sees the fingerprint derived from
    /// the other side's key.
    pub fn pair(key_a: &[u8], key_b: &[u8]) -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new());
        let b = Arc::new(Self::new());
        if let Ok(mut inner) = a.inner.lock() {
            inner.peer_fingerprint = Some(fingerprint_of(key_b));
            inner.remote = Some(Arc::downgrade(&b));
        }
        if let Ok(mut inner) = b.inner.lock() {
            inner.peer_fingerprint = Some(fingerprint_of(key_a));
            inner.remote = Some(Arc::downgrade(&a));
        }
        (a, b)
    }

    /// Deliver reports to this conversation queue.
    pub fn attach(&self, events: mpsc::Sender<ConversationEvent>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.events = Some(events);
        }
    }

    /// Next trace id to assign.
    pub fn set_next_trace(&self, trace: u64) {
        self.next_trace.store(trace, Ordering::SeqCst);
    }

    /// Fail sends as offline.
    pub fn set_offline(&self, offline: bool) {
        self.with_inner(|inner| inner.offline = offline);
    }

    /// Report the next `count` sends as delayed.
    pub fn delay_next(&self, count: usize) {
        self.with_inner(|inner| inner.delay_next = count);
    }

    /// Whether the channel reports as encrypted.
    pub fn set_encrypted(&self, encrypted: bool) {
        self.with_inner(|inner| inner.encrypted = encrypted);
    }

    /// Set the fingerprint reported for the peer.
    pub fn set_peer_fingerprint(&self, fingerprint: Option<Fingerprint>) {
        self.with_inner(|inner| inner.peer_fingerprint = fingerprint);
    }

    /// Refuse secret exchanges.
    pub fn refuse_exchanges(&self, refuse: bool) {
        self.with_inner(|inner| inner.refuse_exchange = refuse);
    }

    /// Messages accepted so far.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.inner
            .lock()
            .map(|inner| inner.sent.clone())
            .unwrap_or_default()
    }

    /// Secret exchange calls so far.
    pub fn exchanges(&self) -> Vec<ExchangeCall> {
        self.inner
            .lock()
            .map(|inner| inner.exchanges.clone())
            .unwrap_or_default()
    }

    /// Report delivery of every delayed message sent so far.
    pub fn confirm_delayed(&self) -> Result<usize> {
        let traces: Vec<TraceId> = {
            let inner = self.inner.lock()?;
            inner
                .sent
                .iter()
                .filter(|s| s.delayed)
                .map(|s| s.trace)
                .collect()
        };
        for trace in &traces {
            self.emit(ConversationEvent::DeliveryConfirmed(*trace))?;
        }
        Ok(traces.len())
    }

    /// Push an event into the attached conversation queue.
    pub fn emit(&self, event: ConversationEvent) -> Result<()> {
        let sender = self.inner.lock()?.events.clone();
        match sender {
            Some(sender) => sender
                .try_send(event)
                .map_err(|e| Error::Transport(format!("event queue: {}", e))),
            None => {
                warn!("No conversation attached, dropping event");
                Ok(())
            }
        }
    }

    fn with_inner(&self, f: impl FnOnce(&mut Inner)) {
        if let Ok(mut inner) = self.inner.lock() {
            f(&mut inner);
        }
    }

    fn remote(&self) -> Result<Arc<MemoryTransport>> {
        self.inner
            .lock()?
            .remote
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::Transport("no peer connected".into()))
    }
}

impl Transport for MemoryTransport {
    fn encrypt_and_send(
        &self,
        peer: &PeerId,
        resource: &str,
        text: &str,
    ) -> std::result::Result<SendReceipt, SendError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| SendError::Failed("transport state poisoned".into()))?;
        if inner.offline {
            return Err(SendError::Offline(format!(
                "The message couldn't be sent because {} is offline.",
                peer
            )));
        }
        let delayed = inner.delay_next > 0;
        if delayed {
            inner.delay_next -= 1;
        }
        let trace = TraceId(self.next_trace.fetch_add(1, Ordering::SeqCst));
        debug!(peer = %peer, trace = %trace, delayed, "Accepted message");
        inner.sent.push(SentRecord {
            peer: peer.clone(),
            resource: resource.to_string(),
            text: text.to_string(),
            trace,
            delayed,
        });
        Ok(SendReceipt { trace, delayed })
    }

    fn is_encrypted(&self, _peer: &PeerId, _resource: &str) -> bool {
        self.inner.lock().map(|i| i.encrypted).unwrap_or(false)
    }

    fn current_fingerprint(&self, _peer: &PeerId, _resource: &str) -> Option<Fingerprint> {
        self.inner.lock().ok()?.peer_fingerprint.clone()
    }

    fn start_secret_exchange(
        &self,
        peer: &PeerId,
        resource: &str,
        prompt: &str,
        secret: &Secret,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock()?;
            inner.exchanges.push(ExchangeCall::Start {
                peer: peer.clone(),
                resource: resource.to_string(),
                prompt: prompt.to_string(),
                secret: secret.clone(),
            });
            if inner.refuse_exchange {
                return Err(Error::Transport("secret exchange refused".into()));
            }
            inner.started_secret = Some(secret.clone());
        }
        debug!(peer = %peer, secret = ?Redacted(secret), "Started secret exchange");

        if let Ok(remote) = self.remote() {
            remote.emit(ConversationEvent::Smp(SmpEvent::SecretNeeded {
                question: Some(prompt.to_string()),
            }))?;
        }
        Ok(())
    }

    fn finish_secret_exchange(&self, peer: &PeerId, resource: &str, secret: &Secret) -> Result<()> {
        {
            let mut inner = self.inner.lock()?;
            inner.exchanges.push(ExchangeCall::Finish {
                peer: peer.clone(),
                resource: resource.to_string(),
                secret: secret.clone(),
            });
            if inner.refuse_exchange {
                return Err(Error::Transport("secret exchange refused".into()));
            }
        }

        let remote = self.remote()?;
        let started = remote.inner.lock()?.started_secret.take();
        let event = match started {
            Some(expected) if expected == *secret => SmpEvent::Success,
            Some(_) => SmpEvent::Failure,
            None => return Err(Error::Transport("peer has no exchange running".into())),
        };
        debug!(peer = %peer, outcome = ?event, "Secret comparison finished");
        remote.emit(ConversationEvent::Smp(event.clone()))?;
        self.emit(ConversationEvent::Smp(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traces_are_monotonic() {
        let transport = MemoryTransport::new();
        let bob = PeerId::new("bob");
        let a = transport.encrypt_and_send(&bob, "", "one").unwrap();
        let b = transport.encrypt_and_send(&bob, "", "two").unwrap();
        assert!(b.trace > a.trace);
    }

    #[test]
    fn test_scripted_delay_and_offline() {
        let transport = MemoryTransport::new();
        let bob = PeerId::new("bob");
        transport.delay_next(1);
        assert!(transport.encrypt_and_send(&bob, "", "late").unwrap().delayed);
        assert!(!transport.encrypt_and_send(&bob, "", "now").unwrap().delayed);

        transport.set_offline(true);
        assert!(matches!(
            transport.encrypt_and_send(&bob, "", "lost"),
            Err(SendError::Offline(_))
        ));
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_paired_comparison() {
        let (a, b) = MemoryTransport::pair(b"alice-key", b"bob-key");
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        a.attach(tx_a);
        b.attach(tx_b);

        assert_eq!(a.current_fingerprint(&"bob".into(), ""), Some(fingerprint_of(b"bob-key")));

        a.start_secret_exchange(&"bob".into(), "", "prompt", &Secret::new("123456"))
            .unwrap();
        assert!(matches!(
            rx_b.recv().await,
            Some(ConversationEvent::Smp(SmpEvent::SecretNeeded { .. }))
        ));

        b.finish_secret_exchange(&"alice".into(), "", &Secret::new("123456"))
            .unwrap();
        assert_eq!(rx_a.recv().await, Some(ConversationEvent::Smp(SmpEvent::Success)));
        assert_eq!(rx_b.recv().await, Some(ConversationEvent::Smp(SmpEvent::Success)));
    }

    #[tokio::test]
    async fn test_paired_mismatch() {
        let (a, b) = MemoryTransport::pair(b"alice-key", b"bob-key");
        let (tx_a, mut rx_a) = mpsc::channel(8);
        a.attach(tx_a);

        a.start_secret_exchange(&"bob".into(), "", "prompt", &Secret::new("111111"))
            .unwrap();
        b.finish_secret_exchange(&"alice".into(), "", &Secret::new("222222"))
            .unwrap();
        assert_eq!(rx_a.recv().await, Some(ConversationEvent::Smp(SmpEvent::Failure)));
    }
}
