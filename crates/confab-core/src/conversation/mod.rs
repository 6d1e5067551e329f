//! Conversation coordinator.
//!
//! A [`Conversation`] ties one peer's transcript, delayed messages,
//! verification and trust together and serializes the state changes that
//! user actions and transport events cause.
//!
//! ## Locking
//!
//! - Transcript and pending messages share one lock, so compaction never
//!   runs between capturing a pending slice and using it.
//! - The verifier has its own lock. It is never held together with the
//!   state lock.
//! - Neither lock is held while calling the transport or the notification
//!   sink. Notifications are collected under the lock and delivered after
//!   it is released, so a sink may call back into the conversation.

mod builder;

pub use builder::ConversationBuilder;

use crate::clock::Clock;
use crate::config::ConversationConfig;
use crate::error::{Error, Result};
use crate::identity::{Fingerprint, PeerId};
use crate::logging::RedactedBytes;
use crate::message::ChatMessage;
use crate::notify::{Notification, NotificationSink};
use crate::pending::{PendingEntry, PendingMessageStore, TraceId};
use crate::transcript::{status_message, BufferSlice, Transcript, TranscriptEntry, ViewKind};
use crate::transport::{ConversationEvent, SendError, Transport};
use crate::trust::TrustStore;
use crate::verify::{Action, Secret, SecretVerifier, SmpEvent, VerificationState};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, error, info, warn};

/// How often `run` checks the verification timeout, when one is configured.
const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What happened to a message passed to [`Conversation::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Sent and appended to history.
    Delivered {
        /// Where it landed in history.
        slice: BufferSlice,
    },
    /// Accepted for later delivery and shown in the pending view.
    Delayed {
        /// Trace id to wait for.
        trace: TraceId,
    },
    /// Not sent; the user was told why.
    Dropped,
}

/// Result of observing a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintStatus {
    /// First time this fingerprint was seen for the peer.
    pub is_new: bool,
    /// Verified earlier.
    pub is_trusted: bool,
}

struct ConversationState {
    transcript: Transcript,
    pending: PendingMessageStore,
    visible: bool,
    was_hidden: bool,
    pending_view_visible: bool,
    observed: Option<Fingerprint>,
    // Whether the first fingerprint seen by this conversation was new.
    first_key_new: Option<bool>,
}

/// One conversation with one peer.
pub struct Conversation<T: Transport> {
    peer: PeerId,
    peer_name: String,
    account_name: String,
    resource: String,
    transport: Arc<T>,
    trust: TrustStore,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: ConversationConfig,
    state: Mutex<ConversationState>,
    verifier: Mutex<SecretVerifier>,
    events_tx: Mutex<Option<mpsc::Sender<ConversationEvent>>>,
    events_rx: Arc<TokioMutex<mpsc::Receiver<ConversationEvent>>>,
}

impl<T: Transport> Conversation<T> {
    /// Start building a conversation with `peer` over `transport`.
    pub fn builder(peer: PeerId, transport: Arc<T>) -> ConversationBuilder<T> {
        ConversationBuilder::new(peer, transport)
    }

    /// The peer.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Display name of the peer.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// The shared trust store.
    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    /// The effective configuration.
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ConversationState>> {
        Ok(self.state.lock()?)
    }

    fn lock_verifier(&self) -> Result<MutexGuard<'_, SecretVerifier>> {
        Ok(self.verifier.lock()?)
    }

    fn dispatch(&self, notes: Vec<Notification>) {
        for note in notes {
            self.sink.notify(note);
        }
    }

    /// Read the transcript under the conversation lock.
    pub fn transcript<R>(&self, f: impl FnOnce(&Transcript) -> R) -> Result<R> {
        let state = self.lock_state()?;
        Ok(f(&state.transcript))
    }

    /// Current history text.
    pub fn history_text(&self) -> Result<String> {
        self.transcript(|t| t.history().text().to_string())
    }

    /// Current pending view text.
    pub fn pending_text(&self) -> Result<String> {
        self.transcript(|t| t.pending().text().to_string())
    }

    /// Number of delayed messages waiting for delivery.
    pub fn pending_len(&self) -> Result<usize> {
        Ok(self.lock_state()?.pending.len())
    }

    /// Where the verification stands.
    pub fn verification_state(&self) -> Result<VerificationState> {
        Ok(self.lock_verifier()?.state())
    }

    fn append_history(
        &self,
        state: &mut ConversationState,
        entry: &TranscriptEntry,
        notes: &mut Vec<Notification>,
    ) -> BufferSlice {
        state.transcript.mark_at(self.clock.now());
        let slice = state.transcript.append(entry, ViewKind::History);
        notes.push(Notification::Appended {
            view: ViewKind::History,
            slice,
        });
        if entry.attention {
            notes.push(Notification::Attention);
        }
        slice
    }

    fn append_line(&self, entry: TranscriptEntry) -> Result<BufferSlice> {
        let mut notes = Vec::new();
        let slice = {
            let mut state = self.lock_state()?;
            self.append_history(&mut state, &entry, &mut notes)
        };
        self.dispatch(notes);
        Ok(slice)
    }

    // ---------------------------------------------------------------
    // Sending and delayed delivery
    // ---------------------------------------------------------------

    /// Send `text` to the peer.
    ///
    /// An offline peer is not an error: the message is dropped, a status
    /// line explains why and [`SendOutcome::Dropped`] is returned.
    pub fn send(&self, text: &str) -> Result<SendOutcome> {
        debug!(peer = %self.peer, payload = %RedactedBytes(text.as_bytes()), "Sending message");
        let receipt = match self.transport.encrypt_and_send(&self.peer, &self.resource, text) {
            Ok(receipt) => receipt,
            Err(SendError::Offline(reason)) => {
                info!(peer = %self.peer, "Peer offline, message dropped");
                self.display_notification(&reason)?;
                self.dispatch(vec![Notification::SendFailed { reason }]);
                return Ok(SendOutcome::Dropped);
            }
            Err(SendError::Failed(reason)) => {
                warn!(peer = %self.peer, reason = %reason, "Send failed");
                return Err(Error::Transport(reason));
            }
        };

        let now = self.clock.now();
        let mut message = ChatMessage::outgoing(
            text,
            self.account_name.as_str(),
            self.peer.clone(),
            self.resource.as_str(),
            now,
        );
        message.encrypted = self.transport.is_encrypted(&self.peer, &self.resource);
        message.delayed = receipt.delayed;
        message.trace = Some(receipt.trace);
        let entry = TranscriptEntry::from_message(&message);

        let mut notes = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            if receipt.delayed {
                self.queue_delayed(&mut state, receipt.trace, message, &entry, &mut notes)
            } else {
                let slice = self.append_history(&mut state, &entry, &mut notes);
                Ok(SendOutcome::Delivered { slice })
            }
        };

        if let Err(e) = &outcome {
            error!(peer = %self.peer, trace = %receipt.trace, error = %e, "Could not queue delayed message");
            notes.push(Notification::SendFailed {
                reason: e.to_string(),
            });
        }
        self.dispatch(notes);
        outcome
    }

    fn queue_delayed(
        &self,
        state: &mut ConversationState,
        trace: TraceId,
        message: ChatMessage,
        entry: &TranscriptEntry,
        notes: &mut Vec<Notification>,
    ) -> Result<SendOutcome> {
        state.pending.check_vacant(trace)?;
        let slice = state.transcript.append(entry, ViewKind::Pending);
        state.pending.enqueue(PendingEntry {
            trace,
            message,
            slice,
        })?;
        if !state.pending_view_visible {
            state.pending_view_visible = true;
            notes.push(Notification::PendingView { visible: true });
        }
        notes.push(Notification::Appended {
            view: ViewKind::Pending,
            slice,
        });
        info!(peer = %self.peer, trace = %trace, "Message delayed");
        Ok(SendOutcome::Delayed { trace })
    }

    /// The transport delivered the delayed message `trace`.
    ///
    /// Replays right away if the conversation is visible; otherwise the
    /// replay waits for [`Conversation::on_shown`]. Returns the number of
    /// messages moved into history.
    pub fn on_delivery_confirmed(&self, trace: TraceId) -> Result<usize> {
        let encrypted = self.transport.is_encrypted(&self.peer, &self.resource);
        let mut notes = Vec::new();
        let replayed = {
            let mut state = self.lock_state()?;
            state.pending.mark_sent(trace);
            if state.visible {
                self.replay_locked(&mut state, encrypted, &mut notes)
            } else {
                debug!(peer = %self.peer, trace = %trace, "Hidden, deferring replay");
                0
            }
        };
        self.dispatch(notes);
        Ok(replayed)
    }

    fn replay_locked(
        &self,
        state: &mut ConversationState,
        encrypted: bool,
        notes: &mut Vec<Notification>,
    ) -> usize {
        if state.pending.ready_count() == 0 {
            return 0;
        }
        let mut entries = state.pending.replay_ready(self.clock.now(), encrypted);
        for i in 0..entries.len() {
            let removed = state.transcript.remove_pending(entries[i].slice);
            state.pending.rebase_after(removed);
            for later in entries.iter_mut().skip(i + 1) {
                later.slice.rebase_after(removed);
            }

            let entry = TranscriptEntry::from_message(&entries[i].message);
            self.append_history(state, &entry, notes);
            info!(peer = %self.peer, trace = %entries[i].trace, "Replayed delayed message");
        }
        if state.pending.is_empty() && state.pending_view_visible {
            state.pending_view_visible = false;
            notes.push(Notification::PendingView { visible: false });
        }
        entries.len()
    }

    // ---------------------------------------------------------------
    // Visibility and compaction
    // ---------------------------------------------------------------

    fn compaction_cutoff(&self) -> Option<DateTime<Utc>> {
        let cutoff = self.clock.now().checked_sub_signed(self.config.retention_window());
        if cutoff.is_none() {
            warn!(peer = %self.peer, "Retention window reaches before the earliest time, skipping compaction");
        }
        cutoff
    }

    /// The conversation view was hidden. Compacts old history.
    ///
    /// Returns the number of characters removed.
    pub fn on_hidden(&self) -> Result<usize> {
        let cutoff = self.compaction_cutoff();
        let mut state = self.lock_state()?;
        state.visible = false;
        state.was_hidden = true;
        let removed = cutoff.map_or(0, |cutoff| state.transcript.compact(cutoff));
        debug!(peer = %self.peer, removed, "Conversation hidden");
        Ok(removed)
    }

    /// The conversation view was shown.
    ///
    /// Compacts again if it had been hidden and replays messages delivered
    /// in the meantime. Returns the number of characters removed.
    pub fn on_shown(&self) -> Result<usize> {
        let cutoff = self.compaction_cutoff();
        let encrypted = self.transport.is_encrypted(&self.peer, &self.resource);
        let mut notes = Vec::new();
        let removed = {
            let mut state = self.lock_state()?;
            let removed = match cutoff {
                Some(cutoff) if state.was_hidden => state.transcript.compact(cutoff),
                _ => 0,
            };
            state.was_hidden = false;
            state.visible = true;
            self.replay_locked(&mut state, encrypted, &mut notes);
            removed
        };
        debug!(peer = %self.peer, removed, "Conversation shown");
        self.dispatch(notes);
        Ok(removed)
    }

    // ---------------------------------------------------------------
    // Status lines and warnings
    // ---------------------------------------------------------------

    /// Append a presence change line. Nothing is appended when there is
    /// nothing to say.
    pub fn append_status(
        &self,
        from: &str,
        timestamp: DateTime<Utc>,
        show: &str,
        show_status: &str,
        gone: bool,
    ) -> Result<()> {
        let text = status_message(from, show, show_status, gone);
        if text.is_empty() {
            return Ok(());
        }
        self.append_line(TranscriptEntry::status(text, timestamp))?;
        Ok(())
    }

    /// Append a status-styled line stamped now.
    pub fn display_notification(&self, text: &str) -> Result<()> {
        self.append_line(TranscriptEntry::status(text, self.clock.now()))?;
        Ok(())
    }

    /// Whether the "not encrypted" warning should show.
    pub fn security_warning_visible(&self) -> bool {
        !self.transport.is_encrypted(&self.peer, &self.resource)
    }

    /// Tell the sink whether the "not encrypted" warning should show.
    pub fn update_security_warning(&self) {
        let visible = self.security_warning_visible();
        self.dispatch(vec![Notification::SecurityWarning { visible }]);
    }

    /// Show the "verify this channel" warning unless the current key is
    /// already trusted. Returns whether it was shown.
    pub fn show_verification_warning(&self) -> Result<bool> {
        let trusted = match self.transport.current_fingerprint(&self.peer, &self.resource) {
            Some(fp) => self.trust.is_trusted(&self.peer, &fp)?,
            None => false,
        };
        if !trusted {
            self.dispatch(vec![Notification::VerificationWarning { visible: true }]);
        }
        Ok(!trusted)
    }

    /// Record a fingerprint reported for `peer`.
    pub fn on_fingerprint_observed(&self, peer: &PeerId, fp: &Fingerprint) -> Result<FingerprintStatus> {
        let is_new = self.trust.record_fingerprint(peer, fp)?;
        let is_trusted = self.trust.is_trusted(peer, fp)?;
        if *peer == self.peer {
            let mut state = self.lock_state()?;
            state.observed = Some(fp.clone());
            state.first_key_new.get_or_insert(is_new);
        }
        debug!(peer = %peer, fingerprint = ?fp, is_new, is_trusted, "Fingerprint observed");
        Ok(FingerprintStatus { is_new, is_trusted })
    }

    /// The encrypted session started.
    pub fn on_private_started(&self) -> Result<()> {
        let trusted = match self.transport.current_fingerprint(&self.peer, &self.resource) {
            Some(fp) => self.on_fingerprint_observed(&self.peer, &fp)?.is_trusted,
            None => false,
        };
        self.display_notification(if trusted {
            "Private conversation started."
        } else {
            "Unverified conversation started."
        })?;

        let new_key = self.lock_state()?.first_key_new == Some(true);
        if new_key {
            self.display_notification("The peer is using a key we haven't seen before!")?;
        }
        self.update_security_warning();

        let encrypted = self.transport.is_encrypted(&self.peer, &self.resource);
        let mut notes = Vec::new();
        {
            let mut state = self.lock_state()?;
            if state.visible {
                self.replay_locked(&mut state, encrypted, &mut notes);
            }
        }
        self.dispatch(notes);
        Ok(())
    }

    /// The encrypted session ended.
    pub fn on_private_ended(&self) -> Result<()> {
        self.display_notification("Private conversation has ended.")?;
        self.update_security_warning();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Verification
    // ---------------------------------------------------------------

    fn session_fingerprint(&self) -> Result<Option<Fingerprint>> {
        match self.transport.current_fingerprint(&self.peer, &self.resource) {
            Some(fp) => Ok(Some(fp)),
            None => Ok(self.lock_state()?.observed.clone()),
        }
    }

    /// The user asked to verify the peer.
    pub fn start_verification(&self) -> Result<()> {
        let fingerprint = self.session_fingerprint()?;
        if let Some(fp) = &fingerprint {
            self.on_fingerprint_observed(&self.peer, fp)?;
        }
        let actions = self
            .lock_verifier()?
            .start_as_initiator(&self.resource, fingerprint)?;
        self.perform(actions)
    }

    /// The user typed the secret the peer shared.
    pub fn answer_verification(&self, secret: Secret) -> Result<()> {
        let actions = self.lock_verifier()?.answer(secret)?;
        self.perform(actions)
    }

    /// The user cancelled the verification.
    pub fn cancel_verification(&self) -> Result<()> {
        let actions = self.lock_verifier()?.cancel();
        self.perform(actions)
    }

    /// The user dismissed the peer's verification request.
    pub fn decline_peer_request(&self) -> Result<()> {
        let actions = self.lock_verifier()?.decline_peer_request()?;
        self.perform(actions)
    }

    /// Cancel a verification that waited longer than the configured timeout.
    pub fn check_verification_timeout(&self) -> Result<()> {
        let Some(timeout) = self.config.verification_timeout() else {
            return Ok(());
        };
        let actions = self.lock_verifier()?.check_timeout(timeout);
        self.perform(actions)
    }

    /// Secret comparison progress reported by the transport.
    ///
    /// A mismatch returns [`Error::ProtocolFailure`] after the user was told.
    pub fn on_smp_event(&self, event: SmpEvent) -> Result<()> {
        let fingerprint = match event {
            SmpEvent::SecretNeeded { .. } => {
                let fp = self.session_fingerprint()?;
                if let Some(fp) = &fp {
                    self.on_fingerprint_observed(&self.peer, fp)?;
                }
                fp
            }
            SmpEvent::Success | SmpEvent::Failure => None,
        };
        let actions = self
            .lock_verifier()?
            .on_protocol_event(event, &self.resource, fingerprint);
        self.perform(actions)
    }

    /// Run verifier actions with no lock held.
    fn perform(&self, actions: Vec<Action>) -> Result<()> {
        let mut queue: VecDeque<Action> = actions.into();
        let mut notes = Vec::new();
        let mut failure = None;

        while let Some(action) = queue.pop_front() {
            match action {
                Action::BeginExchange {
                    resource,
                    prompt,
                    secret,
                } => {
                    let result =
                        self.transport
                            .start_secret_exchange(&self.peer, &resource, &prompt, &secret);
                    let follow = match result {
                        Ok(()) => self.lock_verifier()?.exchange_started(),
                        Err(e) => self.lock_verifier()?.exchange_unavailable(e),
                    };
                    queue.extend(follow);
                }
                Action::AnswerExchange { resource, secret } => {
                    let result = self
                        .transport
                        .finish_secret_exchange(&self.peer, &resource, &secret);
                    let follow = match result {
                        Ok(()) => self.lock_verifier()?.answer_forwarded(),
                        Err(e) => self.lock_verifier()?.exchange_unavailable(e),
                    };
                    queue.extend(follow);
                }
                Action::TrustFingerprint(fp) => {
                    let trusted = self
                        .trust
                        .record_fingerprint(&self.peer, &fp)
                        .and_then(|_| self.trust.mark_trusted(&self.peer, &fp));
                    match trusted {
                        Ok(()) => info!(peer = %self.peer, fingerprint = ?fp, "Fingerprint verified"),
                        Err(e) => {
                            error!(peer = %self.peer, error = %e, "Could not record trust");
                            failure.get_or_insert(e);
                        }
                    }
                }
                Action::Notify(note) => notes.push(note),
                Action::Report(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        self.dispatch(notes);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------
    // Event queue
    // ---------------------------------------------------------------

    /// A sender for the transport to deliver events on.
    pub fn event_sender(&self) -> Result<mpsc::Sender<ConversationEvent>> {
        self.events_tx
            .lock()?
            .clone()
            .ok_or_else(|| Error::Transport("conversation event queue closed".into()))
    }

    /// Stop handing out senders. [`Conversation::run`] returns once every
    /// sender already handed out is dropped.
    pub fn close_events(&self) -> Result<()> {
        self.events_tx.lock()?.take();
        Ok(())
    }

    /// Apply one event.
    pub fn handle_event(&self, event: ConversationEvent) -> Result<()> {
        match event {
            ConversationEvent::DeliveryConfirmed(trace) => {
                self.on_delivery_confirmed(trace)?;
            }
            ConversationEvent::Smp(event) => self.on_smp_event(event)?,
            ConversationEvent::FingerprintObserved(fp) => {
                self.on_fingerprint_observed(&self.peer, &fp)?;
            }
            ConversationEvent::Presence {
                from,
                show,
                status,
                gone,
            } => self.append_status(&from, self.clock.now(), &show, &status, gone)?,
            ConversationEvent::PrivacyStarted => self.on_private_started()?,
            ConversationEvent::PrivacyEnded => self.on_private_ended()?,
        }
        Ok(())
    }

    fn process(&self, event: ConversationEvent) {
        if let Err(e) = self.handle_event(event) {
            if e.is_user_recoverable() {
                info!(peer = %self.peer, error = %e, "Event handled with user-facing error");
            } else {
                error!(peer = %self.peer, error = %e, "Event handling failed");
            }
        }
    }

    /// Process every event queued right now. Returns how many were handled.
    ///
    /// Does nothing while [`Conversation::run`] owns the queue.
    pub fn drain_events(&self) -> usize {
        let Ok(mut rx) = self.events_rx.try_lock() else {
            debug!(peer = %self.peer, "Event queue busy");
            return 0;
        };
        let mut handled = 0;
        while let Ok(event) = rx.try_recv() {
            self.process(event);
            handled += 1;
        }
        handled
    }

    /// Process events until the queue closes, checking the verification
    /// timeout along the way when one is configured.
    pub async fn run(&self) {
        let mut rx = self.events_rx.lock().await;
        let mut ticker = self
            .config
            .verification_timeout()
            .map(|_| tokio::time::interval(TIMEOUT_POLL_INTERVAL));

        info!(peer = %self.peer, "Conversation event loop started");
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.process(event),
                    None => break,
                },
                _ = tick(&mut ticker) => {
                    if let Err(e) = self.check_verification_timeout() {
                        warn!(peer = %self.peer, error = %e, "Timeout check failed");
                    }
                }
            }
        }
        info!(peer = %self.peer, "Conversation event loop stopped");
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
