//! Conversation construction.

use super::{Conversation, ConversationState};
use crate::clock::{Clock, SystemClock};
use crate::config::ConversationConfig;
use crate::error::Result;
use crate::identity::PeerId;
use crate::notify::{NotificationSink, NullSink};
use crate::pending::PendingMessageStore;
use crate::transcript::Transcript;
use crate::transport::Transport;
use crate::trust::TrustStore;
use crate::verify::SecretVerifier;
use rand::RngCore;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as TokioMutex};

/// Collects the collaborators of a [`Conversation`].
pub struct ConversationBuilder<T: Transport> {
    peer: PeerId,
    transport: Arc<T>,
    peer_name: Option<String>,
    account_name: String,
    resource: String,
    trust: Option<TrustStore>,
    sink: Option<Arc<dyn NotificationSink>>,
    clock: Option<Arc<dyn Clock>>,
    config: ConversationConfig,
    rng: Option<Box<dyn RngCore + Send>>,
}

impl<T: Transport> ConversationBuilder<T> {
    pub(super) fn new(peer: PeerId, transport: Arc<T>) -> Self {
        Self {
            peer,
            transport,
            peer_name: None,
            account_name: "me".to_string(),
            resource: String::new(),
            trust: None,
            sink: None,
            clock: None,
            config: ConversationConfig::default(),
            rng: None,
        }
    }

    /// Name shown for the peer. Defaults to the peer id.
    pub fn peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = Some(name.into());
        self
    }

    /// Our own display name on outgoing messages.
    pub fn account_name(mut self, name: impl Into<String>) -> Self {
        self.account_name = name.into();
        self
    }

    /// Peer resource to talk to.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Trust store shared with other conversations.
    pub fn trust(mut self, trust: TrustStore) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Where notifications go.
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Tuning.
    pub fn config(mut self, config: ConversationConfig) -> Self {
        self.config = config;
        self
    }

    /// Random source for PINs. Defaults to the OS source.
    pub fn rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Some(Box::new(rng));
        self
    }

    /// Validate the configuration and create the conversation.
    pub fn build(self) -> Result<Conversation<T>> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let peer_name = self
            .peer_name
            .unwrap_or_else(|| self.peer.as_str().to_string());
        let mut verifier = SecretVerifier::new(
            self.peer.clone(),
            peer_name.clone(),
            self.config.pin_digits,
            clock.clone(),
        );
        if let Some(rng) = self.rng {
            verifier = verifier.with_rng(rng);
        }
        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue_capacity);

        Ok(Conversation {
            peer: self.peer,
            peer_name,
            account_name: self.account_name,
            resource: self.resource,
            transport: self.transport,
            trust: self.trust.unwrap_or_default(),
            sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
            clock,
            state: Mutex::new(ConversationState {
                transcript: Transcript::new(),
                pending: PendingMessageStore::new(self.config.max_pending),
                visible: true,
                was_hidden: false,
                pending_view_visible: false,
                observed: None,
                first_key_new: None,
            }),
            verifier: Mutex::new(verifier),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Arc::new(TokioMutex::new(events_rx)),
            config: self.config,
        })
    }
}
