//! Pure transition function of the secret-comparison handshake.
//!
//! `transition` maps a state and an input to the next state plus the side
//! effects to perform. It touches no I/O, randomness or session data;
//! [`super::SecretVerifier`] resolves the effects.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a verification stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationState {
    /// No handshake running.
    Unverified,
    /// The peer started a handshake and is waiting for our secret.
    PeerRequestsSecret,
    /// We are generating a PIN to start a handshake.
    GeneratingSecret,
    /// We typed the peer's secret and are handing it to the transport.
    AnsweringPeer,
    /// The handshake is running; the transport will report the outcome.
    WaitingForPeer,
    /// The secrets matched.
    Success,
    /// The secrets did not match.
    Failure,
    /// The handshake could not be started.
    Error,
    /// Being torn down by the user.
    Canceling,
}

impl VerificationState {
    /// A session exists and has not finished.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::PeerRequestsSecret
                | Self::GeneratingSecret
                | Self::AnsweringPeer
                | Self::WaitingForPeer
                | Self::Canceling
        )
    }

    /// The session finished; a new one must be started to retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Error)
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unverified => "unverified",
            Self::PeerRequestsSecret => "peer-requests-secret",
            Self::GeneratingSecret => "generating-secret",
            Self::AnsweringPeer => "answering-peer",
            Self::WaitingForPeer => "waiting-for-peer",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::Canceling => "canceling",
        };
        f.write_str(name)
    }
}

/// Something that happened to the verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// The user asked to verify.
    StartAsInitiator,
    /// A PIN is ready in the session.
    SecretGenerated,
    /// The random source failed.
    SecretGenerationFailed,
    /// The transport accepted the start of the exchange.
    ExchangeStarted,
    /// The transport refused to start or answer the exchange.
    ExchangeUnavailable,
    /// The peer started an exchange and wants our secret.
    PeerRequestsSecret,
    /// The user typed the peer's secret.
    AnswerSupplied,
    /// The transport accepted our answer.
    AnswerForwarded,
    /// The transport reported matching secrets.
    ProtocolSuccess,
    /// The transport reported a mismatch.
    ProtocolFailure,
    /// The user cancelled.
    Cancel,
    /// Teardown after cancel is complete.
    CancelComplete,
    /// The user dismissed the peer's request.
    DeclinePeerRequest,
    /// The configured wait for the peer elapsed.
    TimedOut,
}

/// A user-facing notice, resolved against the session by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Show the "verify this channel" warning.
    ShowWarning,
    /// Hide it.
    HideWarning,
    /// Remove waiting/peer-request notices.
    ClearInProgress,
    /// Show our PIN.
    ShareSecret,
    /// Waiting for the peer.
    WaitingForPeer,
    /// The peer wants our secret.
    PeerRequestsSecret,
    /// The peer started while we were already verifying.
    AlreadyStartedByPeer,
    /// Verified.
    Succeeded,
    /// Not verified.
    Failed,
    /// Could not start.
    Unavailable,
    /// Gave up waiting.
    TimedOut,
}

/// A side effect of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Generate a PIN and feed back the result.
    GenerateSecret,
    /// Ask the transport to start the exchange with the session secret.
    BeginExchange,
    /// Hand the user's answer to the transport.
    AnswerExchange,
    /// Trust the fingerprint observed for this session.
    TrustSessionFingerprint,
    /// Tell the user.
    Notify(Notice),
}

/// Next state and what to do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after the input.
    pub next: VerificationState,
    /// Effects in the order to perform them.
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: VerificationState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn stay(state: VerificationState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }
}

/// Apply `input` to `state`.
pub fn transition(state: VerificationState, input: Input) -> Result<Transition> {
    use Effect::*;
    use Input as I;
    use VerificationState as S;

    let t = match (state, input) {
        (s, I::StartAsInitiator) if s.is_active() => return Err(Error::AlreadyInProgress),
        (_, I::StartAsInitiator) => Transition::to(S::GeneratingSecret, vec![GenerateSecret]),

        (S::GeneratingSecret, I::SecretGenerated) => {
            Transition::to(S::GeneratingSecret, vec![BeginExchange])
        }
        (S::GeneratingSecret, I::SecretGenerationFailed) => Transition::to(
            S::Error,
            vec![Notify(Notice::HideWarning), Notify(Notice::Unavailable)],
        ),
        (S::GeneratingSecret, I::ExchangeStarted) => Transition::to(
            S::WaitingForPeer,
            vec![
                Notify(Notice::ShareSecret),
                Notify(Notice::HideWarning),
                Notify(Notice::WaitingForPeer),
            ],
        ),
        (S::GeneratingSecret | S::AnsweringPeer, I::ExchangeUnavailable) => Transition::to(
            S::Error,
            vec![
                Notify(Notice::ClearInProgress),
                Notify(Notice::HideWarning),
                Notify(Notice::Unavailable),
            ],
        ),

        // The peer does not get to override a verification we already started.
        (S::GeneratingSecret | S::WaitingForPeer | S::AnsweringPeer, I::PeerRequestsSecret) => {
            Transition::to(state, vec![Notify(Notice::AlreadyStartedByPeer)])
        }
        (S::Unverified | S::PeerRequestsSecret, I::PeerRequestsSecret) => Transition::to(
            S::PeerRequestsSecret,
            vec![Notify(Notice::HideWarning), Notify(Notice::PeerRequestsSecret)],
        ),
        (s, I::PeerRequestsSecret) if s.is_terminal() => Transition::to(
            S::PeerRequestsSecret,
            vec![Notify(Notice::HideWarning), Notify(Notice::PeerRequestsSecret)],
        ),

        (S::PeerRequestsSecret, I::AnswerSupplied) => Transition::to(
            S::AnsweringPeer,
            vec![AnswerExchange, Notify(Notice::ClearInProgress)],
        ),
        (S::AnsweringPeer, I::AnswerForwarded) => {
            Transition::to(S::WaitingForPeer, vec![Notify(Notice::WaitingForPeer)])
        }

        // An outcome can overtake the acknowledgement of our own start/answer.
        (s, I::ExchangeStarted | I::AnswerForwarded) if s.is_terminal() => Transition::stay(s),

        (S::GeneratingSecret | S::AnsweringPeer | S::WaitingForPeer, I::ProtocolSuccess) => {
            Transition::to(
                S::Success,
                vec![
                    TrustSessionFingerprint,
                    Notify(Notice::ClearInProgress),
                    Notify(Notice::HideWarning),
                    Notify(Notice::Succeeded),
                ],
            )
        }
        (S::GeneratingSecret | S::AnsweringPeer | S::WaitingForPeer, I::ProtocolFailure) => {
            Transition::to(
                S::Failure,
                vec![
                    Notify(Notice::ClearInProgress),
                    Notify(Notice::ShowWarning),
                    Notify(Notice::Failed),
                ],
            )
        }

        (
            S::WaitingForPeer | S::PeerRequestsSecret | S::AnsweringPeer | S::GeneratingSecret,
            I::Cancel,
        ) => Transition::to(S::Canceling, vec![Notify(Notice::ClearInProgress)]),
        (S::Unverified | S::Canceling, I::Cancel) => Transition::stay(state),
        (s, I::Cancel) if s.is_terminal() => Transition::stay(s),
        (S::Canceling, I::CancelComplete) => {
            Transition::to(S::Unverified, vec![Notify(Notice::ShowWarning)])
        }

        (S::PeerRequestsSecret, I::DeclinePeerRequest) => Transition::to(
            S::Unverified,
            vec![Notify(Notice::ClearInProgress), Notify(Notice::ShowWarning)],
        ),

        (S::WaitingForPeer, I::TimedOut) => Transition::to(
            S::Canceling,
            vec![Notify(Notice::ClearInProgress), Notify(Notice::TimedOut)],
        ),
        (_, I::TimedOut) => Transition::stay(state),

        (state, input) => {
            return Err(Error::InvalidTransition {
                state: state.to_string(),
                input: format!("{:?}", input),
            })
        }
    };
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Input as I;
    use VerificationState as S;

    fn next(state: S, input: I) -> S {
        transition(state, input).expect("valid transition").next
    }

    #[test]
    fn test_initiator_path() {
        let s = next(S::Unverified, I::StartAsInitiator);
        assert_eq!(s, S::GeneratingSecret);
        let t = transition(s, I::SecretGenerated).unwrap();
        assert_eq!(t.effects, vec![Effect::BeginExchange]);
        let s = next(t.next, I::ExchangeStarted);
        assert_eq!(s, S::WaitingForPeer);
        let t = transition(s, I::ProtocolSuccess).unwrap();
        assert_eq!(t.next, S::Success);
        assert_eq!(t.effects[0], Effect::TrustSessionFingerprint);
    }

    #[test]
    fn test_responder_path() {
        let s = next(S::Unverified, I::PeerRequestsSecret);
        assert_eq!(s, S::PeerRequestsSecret);
        let t = transition(s, I::AnswerSupplied).unwrap();
        assert_eq!(t.next, S::AnsweringPeer);
        assert_eq!(t.effects[0], Effect::AnswerExchange);
        assert_eq!(next(t.next, I::AnswerForwarded), S::WaitingForPeer);
    }

    #[test]
    fn test_start_while_active_rejected() {
        for s in [S::WaitingForPeer, S::PeerRequestsSecret, S::GeneratingSecret, S::AnsweringPeer] {
            assert_eq!(transition(s, I::StartAsInitiator), Err(Error::AlreadyInProgress));
        }
    }

    #[test]
    fn test_restart_after_terminal() {
        for s in [S::Success, S::Failure, S::Error] {
            assert_eq!(next(s, I::StartAsInitiator), S::GeneratingSecret);
        }
    }

    #[test]
    fn test_generation_failure_goes_to_error() {
        let t = transition(S::GeneratingSecret, I::SecretGenerationFailed).unwrap();
        assert_eq!(t.next, S::Error);
        assert!(t.effects.contains(&Effect::Notify(Notice::Unavailable)));
        assert!(!t.effects.contains(&Effect::BeginExchange));
    }

    #[test]
    fn test_peer_request_does_not_override_initiator() {
        let t = transition(S::WaitingForPeer, I::PeerRequestsSecret).unwrap();
        assert_eq!(t.next, S::WaitingForPeer);
        assert_eq!(t.effects, vec![Effect::Notify(Notice::AlreadyStartedByPeer)]);
    }

    #[test]
    fn test_failure_does_not_trust() {
        let t = transition(S::WaitingForPeer, I::ProtocolFailure).unwrap();
        assert_eq!(t.next, S::Failure);
        assert!(!t.effects.contains(&Effect::TrustSessionFingerprint));
    }

    #[test]
    fn test_cancel_returns_to_unverified() {
        for s in [S::WaitingForPeer, S::PeerRequestsSecret] {
            let s = next(s, I::Cancel);
            assert_eq!(s, S::Canceling);
            assert_eq!(next(s, I::CancelComplete), S::Unverified);
        }
        assert_eq!(next(S::Unverified, I::Cancel), S::Unverified);
    }

    #[test]
    fn test_stale_outcome_rejected() {
        assert!(matches!(
            transition(S::Unverified, I::ProtocolSuccess),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(transition(S::Success, I::ProtocolFailure).is_err());
    }

    #[test]
    fn test_outcome_before_ack_is_harmless() {
        let s = next(S::AnsweringPeer, I::ProtocolSuccess);
        assert_eq!(next(s, I::AnswerForwarded), S::Success);
    }

    #[test]
    fn test_timeout_only_while_waiting() {
        assert_eq!(next(S::WaitingForPeer, I::TimedOut), S::Canceling);
        assert_eq!(next(S::PeerRequestsSecret, I::TimedOut), S::PeerRequestsSecret);
    }
}
