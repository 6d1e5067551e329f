//! Peer verification by shared-secret comparison.
//!
//! Two people confirm they talk to each other's key by typing the same
//! secret on both ends; the transport runs the comparison and reports
//! whether the secrets matched. On a match the fingerprint seen during the
//! session becomes trusted.
//!
//! [`state::transition`] holds the rules. [`SecretVerifier`] keeps the
//! single session of a conversation, resolves the effects the rules ask
//! for, and hands back [`Action`]s for the caller to run once it has
//! released its locks.

mod secret;
pub mod state;

pub use secret::{generate_pin, Secret};
pub use state::{Effect, Input, Notice, Transition, VerificationState};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::identity::{Fingerprint, PeerId};
use crate::notify::{Notification, PIN_PROMPT};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a secret comparison, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpEvent {
    /// The peer started a comparison and wants our secret.
    SecretNeeded {
        /// Question the peer attached, if any.
        question: Option<String>,
    },
    /// The secrets matched.
    Success,
    /// The secrets did not match.
    Failure,
}

/// Which side started the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We generated the PIN.
    Initiator,
    /// The peer asked us for it.
    Responder,
}

/// One verification attempt.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    /// Peer being verified.
    pub peer: PeerId,
    /// Contact resource the exchange runs on.
    pub resource: String,
    /// Our side.
    pub role: Role,
    /// Fingerprint observed when the session started.
    pub fingerprint: Option<Fingerprint>,
    /// Generated or typed secret, once known.
    pub secret: Option<Secret>,
    /// Question the peer attached to its request.
    pub question: Option<String>,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// When the session entered `WaitingForPeer`.
    pub waiting_since: Option<DateTime<Utc>>,
}

/// Work for the caller, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start the exchange with our secret. Report back with
    /// [`SecretVerifier::exchange_started`] or [`SecretVerifier::exchange_unavailable`].
    BeginExchange {
        /// Resource to run the exchange on.
        resource: String,
        /// Prompt shown to the peer.
        prompt: String,
        /// Our secret.
        secret: Secret,
    },
    /// Answer the peer's exchange. Report back with
    /// [`SecretVerifier::answer_forwarded`] or [`SecretVerifier::exchange_unavailable`].
    AnswerExchange {
        /// Resource to run the exchange on.
        resource: String,
        /// The user's answer.
        secret: Secret,
    },
    /// Mark this fingerprint trusted for the peer.
    TrustFingerprint(Fingerprint),
    /// Tell the user.
    Notify(Notification),
    /// Surface an error to the caller after running the other actions.
    Report(Error),
}

/// Verification state of one conversation.
pub struct SecretVerifier {
    peer: PeerId,
    peer_name: String,
    state: VerificationState,
    session: Option<VerificationSession>,
    rng: Box<dyn RngCore + Send>,
    pin_digits: u32,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SecretVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVerifier")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SecretVerifier {
    /// Create a verifier for `peer`, drawing PINs from the OS random source.
    pub fn new(
        peer: PeerId,
        peer_name: impl Into<String>,
        pin_digits: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            peer,
            peer_name: peer_name.into(),
            state: VerificationState::Unverified,
            session: None,
            rng: Box::new(OsRng),
            pin_digits,
            clock,
        }
    }

    /// Replace the random source.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Current state.
    pub fn state(&self) -> VerificationState {
        self.state
    }

    /// The active session, if any.
    pub fn session(&self) -> Option<&VerificationSession> {
        self.session.as_ref()
    }

    fn new_session(&self, resource: &str, role: Role, fingerprint: Option<Fingerprint>) -> VerificationSession {
        VerificationSession {
            peer: self.peer.clone(),
            resource: resource.to_string(),
            role,
            fingerprint,
            secret: None,
            question: None,
            started_at: self.clock.now(),
            waiting_since: None,
        }
    }

    /// The user asked to verify the peer.
    ///
    /// Fails with [`Error::AlreadyInProgress`] while another session is
    /// active. A random source failure is not returned here; it ends the
    /// session in `Error` and shows up as an [`Action::Report`].
    pub fn start_as_initiator(
        &mut self,
        resource: &str,
        fingerprint: Option<Fingerprint>,
    ) -> Result<Vec<Action>> {
        // Validate before replacing any session.
        state::transition(self.state, Input::StartAsInitiator)?;
        info!(peer = %self.peer, "Starting verification");
        self.session = Some(self.new_session(resource, Role::Initiator, fingerprint));
        self.apply(Input::StartAsInitiator)
    }

    /// The peer started a comparison.
    pub fn start_as_responder(
        &mut self,
        resource: &str,
        question: Option<String>,
        fingerprint: Option<Fingerprint>,
    ) -> Vec<Action> {
        let takes_over = matches!(
            self.state,
            VerificationState::Unverified | VerificationState::PeerRequestsSecret
        ) || self.state.is_terminal();
        if takes_over {
            let mut session = self.new_session(resource, Role::Responder, fingerprint);
            session.question = question;
            self.session = Some(session);
        } else {
            info!(peer = %self.peer, state = %self.state, "Peer requested verification while one is running");
        }
        self.apply_or_ignore(Input::PeerRequestsSecret)
    }

    /// The user typed the peer's secret.
    pub fn answer(&mut self, secret: Secret) -> Result<Vec<Action>> {
        state::transition(self.state, Input::AnswerSupplied)?;
        if let Some(session) = self.session.as_mut() {
            session.secret = Some(secret);
        }
        self.apply(Input::AnswerSupplied)
    }

    /// The transport accepted [`Action::BeginExchange`].
    pub fn exchange_started(&mut self) -> Vec<Action> {
        self.apply_or_ignore(Input::ExchangeStarted)
    }

    /// The transport accepted [`Action::AnswerExchange`].
    pub fn answer_forwarded(&mut self) -> Vec<Action> {
        self.apply_or_ignore(Input::AnswerForwarded)
    }

    /// The transport refused to start or answer the exchange.
    pub fn exchange_unavailable(&mut self, error: Error) -> Vec<Action> {
        warn!(peer = %self.peer, error = %error, "Secret exchange unavailable");
        let mut actions = self.apply_or_ignore(Input::ExchangeUnavailable);
        actions.push(Action::Report(error));
        actions
    }

    /// Apply an event reported by the transport.
    ///
    /// A mismatch ends the session and is reported as [`Error::ProtocolFailure`].
    /// Outcomes that do not belong to a running session are dropped.
    pub fn on_protocol_event(
        &mut self,
        event: SmpEvent,
        resource: &str,
        fingerprint: Option<Fingerprint>,
    ) -> Vec<Action> {
        match event {
            SmpEvent::SecretNeeded { question } => {
                self.start_as_responder(resource, question, fingerprint)
            }
            SmpEvent::Success => self.apply_or_ignore(Input::ProtocolSuccess),
            SmpEvent::Failure => {
                let mut actions = self.apply_or_ignore(Input::ProtocolFailure);
                if self.state == VerificationState::Failure && !actions.is_empty() {
                    actions.push(Action::Report(Error::ProtocolFailure));
                }
                actions
            }
        }
    }

    /// Cancel the running session and return to `Unverified`.
    ///
    /// Safe from any state; a no-op when nothing is running.
    pub fn cancel(&mut self) -> Vec<Action> {
        let mut actions = self.apply_or_ignore(Input::Cancel);
        if self.state == VerificationState::Canceling {
            actions.extend(self.apply_or_ignore(Input::CancelComplete));
            info!(peer = %self.peer, "Verification cancelled");
        }
        actions
    }

    /// The user dismissed the peer's request.
    pub fn decline_peer_request(&mut self) -> Result<Vec<Action>> {
        self.apply(Input::DeclinePeerRequest)
    }

    /// Cancel the session if it has waited for the peer longer than `timeout`.
    pub fn check_timeout(&mut self, timeout: Duration) -> Vec<Action> {
        let Some(since) = self.session.as_ref().and_then(|s| s.waiting_since) else {
            return Vec::new();
        };
        if self.state != VerificationState::WaitingForPeer {
            return Vec::new();
        }
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };
        let Some(deadline) = since.checked_add_signed(timeout) else {
            return Vec::new();
        };
        if self.clock.now() < deadline {
            return Vec::new();
        }
        info!(peer = %self.peer, "Verification timed out");
        let mut actions = self.apply_or_ignore(Input::TimedOut);
        if self.state == VerificationState::Canceling {
            actions.extend(self.apply_or_ignore(Input::CancelComplete));
        }
        actions
    }

    fn apply_or_ignore(&mut self, input: Input) -> Vec<Action> {
        match self.apply(input) {
            Ok(actions) => actions,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Ignoring stale verification input");
                Vec::new()
            }
        }
    }

    fn apply(&mut self, input: Input) -> Result<Vec<Action>> {
        let Transition { next, effects } = state::transition(self.state, input)?;
        let prev = self.state;
        self.state = next;
        if prev != next {
            debug!(peer = %self.peer, from = %prev, to = %next, ?input, "Verification transition");
        }
        if next == VerificationState::WaitingForPeer && prev != next {
            let now = self.clock.now();
            if let Some(session) = self.session.as_mut() {
                session.waiting_since = Some(now);
            }
        }

        let mut actions = Vec::new();
        for effect in effects {
            match effect {
                Effect::GenerateSecret => {
                    match generate_pin(self.rng.as_mut(), self.pin_digits) {
                        Ok(secret) => {
                            if let Some(session) = self.session.as_mut() {
                                session.secret = Some(secret);
                            }
                            actions.extend(self.apply(Input::SecretGenerated)?);
                        }
                        Err(e) => {
                            warn!(peer = %self.peer, error = %e, "PIN generation failed");
                            actions.extend(self.apply(Input::SecretGenerationFailed)?);
                            actions.push(Action::Report(e));
                        }
                    }
                }
                Effect::BeginExchange => {
                    if let Some((resource, secret)) = self.session_secret() {
                        actions.push(Action::BeginExchange {
                            resource,
                            prompt: PIN_PROMPT.to_string(),
                            secret,
                        });
                    }
                }
                Effect::AnswerExchange => {
                    if let Some((resource, secret)) = self.session_secret() {
                        actions.push(Action::AnswerExchange { resource, secret });
                    }
                }
                Effect::TrustSessionFingerprint => {
                    match self.session.as_ref().and_then(|s| s.fingerprint.clone()) {
                        Some(fp) => actions.push(Action::TrustFingerprint(fp)),
                        None => warn!(peer = %self.peer, "Verified without an observed fingerprint"),
                    }
                }
                Effect::Notify(notice) => {
                    if let Some(n) = self.notification(notice) {
                        actions.push(Action::Notify(n));
                    }
                }
            }
        }

        if self.state.is_terminal() || self.state == VerificationState::Unverified {
            self.session = None;
        }
        Ok(actions)
    }

    fn session_secret(&self) -> Option<(String, Secret)> {
        let session = self.session.as_ref()?;
        match &session.secret {
            Some(secret) => Some((session.resource.clone(), secret.clone())),
            None => {
                warn!(peer = %self.peer, "Session has no secret to exchange");
                None
            }
        }
    }

    fn notification(&self, notice: Notice) -> Option<Notification> {
        let peer = self.peer_name.clone();
        let n = match notice {
            Notice::ShowWarning => Notification::VerificationWarning { visible: true },
            Notice::HideWarning => Notification::VerificationWarning { visible: false },
            Notice::ClearInProgress => Notification::ClearVerificationNotices,
            Notice::ShareSecret => Notification::ShareSecret {
                peer,
                secret: self.session.as_ref()?.secret.clone()?,
            },
            Notice::WaitingForPeer => Notification::WaitingForPeer { peer },
            Notice::PeerRequestsSecret => Notification::PeerRequestsSecret {
                peer,
                question: self.session.as_ref().and_then(|s| s.question.clone()),
            },
            Notice::AlreadyStartedByPeer => Notification::VerificationAlreadyStarted { peer },
            Notice::Succeeded => Notification::VerificationSucceeded { peer },
            Notice::Failed => Notification::VerificationFailed { peer },
            Notice::Unavailable => Notification::VerificationUnavailable,
            Notice::TimedOut => Notification::VerificationTimedOut { peer },
        };
        Some(n)
    }
}
