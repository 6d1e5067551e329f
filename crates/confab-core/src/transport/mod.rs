//! Contract with the encrypted messaging transport.
//!
//! The transport owns the encrypted channel and the comparison primitive.
//! A conversation only calls the operations below and receives the
//! transport's asynchronous reports as [`ConversationEvent`]s on its
//! inbound queue.

pub mod memory;

pub use memory::{ExchangeCall, MemoryTransport, SentRecord};

use crate::error::Result;
use crate::identity::{Fingerprint, PeerId};
use crate::pending::TraceId;
use crate::verify::{Secret, SmpEvent};
use thiserror::Error;

/// How the transport took an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Trace id correlating a delayed message with its delivery confirmation.
    pub trace: TraceId,
    /// The message was accepted but will be delivered later.
    pub delayed: bool,
}

/// Why the transport did not take an outgoing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The peer is offline. The message is dropped and the user told.
    #[error("{0}")]
    Offline(String),
    /// Any other failure. Surfaced to the caller.
    #[error("send failed: {0}")]
    Failed(String),
}

/// Operations a conversation needs from the encrypted transport.
///
/// Calls are made without any conversation lock held and are expected to
/// return promptly; outcomes that take time arrive as events.
pub trait Transport: Send + Sync {
    /// Encrypt `text` and send it to `peer` on `resource`.
    fn encrypt_and_send(
        &self,
        peer: &PeerId,
        resource: &str,
        text: &str,
    ) -> std::result::Result<SendReceipt, SendError>;

    /// Whether the channel to `peer` on `resource` is encrypted.
    fn is_encrypted(&self, peer: &PeerId, resource: &str) -> bool;

    /// Fingerprint of the peer's key in the current session, if any.
    fn current_fingerprint(&self, peer: &PeerId, resource: &str) -> Option<Fingerprint>;

    /// Start a secret comparison, showing `prompt` to the peer.
    fn start_secret_exchange(
        &self,
        peer: &PeerId,
        resource: &str,
        prompt: &str,
        secret: &Secret,
    ) -> Result<()>;

    /// Answer a comparison the peer started.
    fn finish_secret_exchange(&self, peer: &PeerId, resource: &str, secret: &Secret) -> Result<()>;
}

/// An asynchronous report delivered to one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A delayed message was delivered.
    DeliveryConfirmed(TraceId),
    /// Secret comparison progress.
    Smp(SmpEvent),
    /// The peer's key fingerprint for the current session.
    FingerprintObserved(Fingerprint),
    /// The peer's presence changed.
    Presence {
        /// Display name of the peer.
        from: String,
        /// Presence show value (`away`, `dnd`, ...).
        show: String,
        /// Free-form status message.
        status: String,
        /// The peer went offline.
        gone: bool,
    },
    /// The encrypted session started.
    PrivacyStarted,
    /// The encrypted session ended.
    PrivacyEnded,
}
