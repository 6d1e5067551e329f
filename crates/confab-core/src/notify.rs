//! User-facing notifications emitted by a conversation.
//!
//! The rendering collaborator implements [`NotificationSink`]. Notifications
//! are always delivered after the conversation has released its locks, so
//! a sink may call straight back into the conversation.

use crate::transcript::{BufferSlice, ViewKind};
use crate::verify::Secret;
use std::fmt;
use std::sync::Mutex;

/// Prompt sent to the peer along with a locally generated PIN.
pub const PIN_PROMPT: &str = "Please enter the PIN that your contact shared with you.";

/// Something the user interface should show or hide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Show or hide the "verify this channel" warning.
    VerificationWarning {
        /// Whether it should be visible.
        visible: bool,
    },
    /// Remove waiting/peer-request notices of a verification in progress.
    ClearVerificationNotices,
    /// Show the locally generated PIN so the user can share it.
    ShareSecret {
        /// Peer display name.
        peer: String,
        /// The PIN.
        secret: Secret,
    },
    /// We are waiting for the peer to finish the comparison.
    WaitingForPeer {
        /// Peer display name.
        peer: String,
    },
    /// The peer started a comparison and wants our secret.
    PeerRequestsSecret {
        /// Peer display name.
        peer: String,
        /// Question the peer attached, if any.
        question: Option<String>,
    },
    /// The peer started first while we were already verifying.
    VerificationAlreadyStarted {
        /// Peer display name.
        peer: String,
    },
    /// The secrets matched.
    VerificationSucceeded {
        /// Peer display name.
        peer: String,
    },
    /// The secrets did not match.
    VerificationFailed {
        /// Peer display name.
        peer: String,
    },
    /// Verification could not be started.
    VerificationUnavailable,
    /// The peer did not answer within the configured timeout.
    VerificationTimedOut {
        /// Peer display name.
        peer: String,
    },
    /// A send failed and the message was dropped.
    SendFailed {
        /// Reason reported by the transport.
        reason: String,
    },
    /// Show or hide the pending (delayed) messages view.
    PendingView {
        /// Whether it should be visible.
        visible: bool,
    },
    /// Show or hide the "not encrypted" warning.
    SecurityWarning {
        /// Whether it should be visible.
        visible: bool,
    },
    /// Text was appended to a view.
    Appended {
        /// Which view.
        view: ViewKind,
        /// Where.
        slice: BufferSlice,
    },
    /// A new message wants the user's attention.
    Attention,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::VerificationWarning { .. } => {
                write!(f, "Make sure no one else is reading your messages.")
            }
            Notification::ClearVerificationNotices => Ok(()),
            Notification::ShareSecret { peer, .. } => {
                write!(f, "Share the one-time PIN below with {}", peer)
            }
            Notification::WaitingForPeer { peer } => {
                write!(f, "Waiting for {} to finish securing the channel...", peer)
            }
            Notification::PeerRequestsSecret { peer, .. } => write!(
                f,
                "{} is waiting for you to finish verifying the security of this channel...",
                peer
            ),
            Notification::VerificationAlreadyStarted { peer } => write!(
                f,
                "{} has already started verification and generated a PIN.\nPlease ask them for it.",
                peer
            ),
            Notification::VerificationSucceeded { peer } => write!(
                f,
                "Hooray! No one is listening in on your conversations with {}",
                peer
            ),
            Notification::VerificationFailed { peer } => {
                write!(f, "We failed to verify this channel with {}.", peer)
            }
            Notification::VerificationUnavailable => {
                write!(f, "Unable to verify the channel at this time.")
            }
            Notification::VerificationTimedOut { peer } => {
                write!(f, "Verification with {} timed out.", peer)
            }
            Notification::SendFailed { reason } => write!(f, "{}", reason),
            Notification::PendingView { .. }
            | Notification::SecurityWarning { .. }
            | Notification::Appended { .. }
            | Notification::Attention => Ok(()),
        }
    }
}

/// Receiver of conversation notifications.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    fn notify(&self, notification: Notification);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Sink that keeps every notification, for tests and the CLI.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        self.seen
            .lock()
            .map(|mut seen| std::mem::take(&mut *seen))
            .unwrap_or_default()
    }

    /// Whether a notification matching `pred` was recorded (without consuming).
    pub fn any(&self, pred: impl Fn(&Notification) -> bool) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.iter().any(|n| pred(n)))
            .unwrap_or(false)
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(notification);
        }
    }
}
