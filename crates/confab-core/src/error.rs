//! Error types for the conversation core.
//!
//! Errors carry user-facing wording where they are surfaced to the
//! notification sink. Secrets and fingerprints never appear in them.

use crate::pending::TraceId;
use thiserror::Error;

/// Core error type for conversation operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A verification session is already active for this conversation.
    #[error("verification already in progress")]
    AlreadyInProgress,

    /// The random source could not produce a secret.
    /// Fatal to the current verification session only.
    #[error("unable to generate a verification secret")]
    SecretGenerationFailed(String),

    /// A delayed message was queued twice under the same trace id.
    /// This is a transport contract violation, not a user error.
    #[error("duplicate trace id {0}")]
    DuplicateTrace(TraceId),

    /// The message could not be sent right now (e.g. peer offline).
    #[error("message not sent: {0}")]
    TransientSendFailure(String),

    /// The secret comparison did not match.
    #[error("verification failed")]
    ProtocolFailure,

    /// The verifier received an input that is not valid in its state.
    #[error("cannot apply {input} while {state}")]
    InvalidTransition {
        /// State the verifier was in.
        state: String,
        /// Input that was rejected.
        input: String,
    },

    /// The transport rejected a call.
    #[error("transport error: {0}")]
    Transport(String),

    /// Too many delayed messages are waiting for delivery.
    #[error("pending message limit reached")]
    QueueFull,

    /// A conversation lock was poisoned by a panicking thread.
    #[error("conversation state lock poisoned")]
    LockPoisoned,

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors that are recovered by telling the user, as opposed to logic faults.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AlreadyInProgress
                | Error::SecretGenerationFailed(_)
                | Error::TransientSendFailure(_)
                | Error::ProtocolFailure
                | Error::QueueFull
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::AlreadyInProgress.is_user_recoverable());
        assert!(Error::TransientSendFailure("offline".into()).is_user_recoverable());
        assert!(!Error::DuplicateTrace(TraceId(7)).is_user_recoverable());
        assert!(!Error::LockPoisoned.is_user_recoverable());
    }

    #[test]
    fn test_messages_do_not_leak_secrets() {
        let e = Error::SecretGenerationFailed("entropy source closed".into());
        assert_eq!(e.to_string(), "unable to generate a verification secret");
    }
}
