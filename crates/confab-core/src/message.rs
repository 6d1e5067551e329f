//! Chat message metadata as it flows from send to transcript.

use crate::identity::PeerId;
use crate::pending::TraceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message sent or received in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message body as typed.
    pub text: String,
    /// Display name of the sender.
    pub from: String,
    /// Destination peer.
    pub to: PeerId,
    /// Destination resource.
    pub resource: String,
    /// Display timestamp.
    pub timestamp: DateTime<Utc>,
    /// When the message was first queued, for re-sent delayed messages.
    pub queued_at: Option<DateTime<Utc>>,
    /// Whether the channel was encrypted when the message was shown.
    pub encrypted: bool,
    /// Sent while the channel could not deliver immediately.
    pub delayed: bool,
    /// Sent by us.
    pub outgoing: bool,
    /// Trace id assigned by the transport, if any.
    pub trace: Option<TraceId>,
}

impl ChatMessage {
    /// Create a new outgoing message stamped `timestamp`.
    pub fn outgoing(
        text: impl Into<String>,
        from: impl Into<String>,
        to: PeerId,
        resource: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            text: text.into(),
            from: from.into(),
            to,
            resource: resource.into(),
            timestamp,
            queued_at: None,
            encrypted: false,
            delayed: false,
            outgoing: true,
            trace: None,
        }
    }

    /// Whether this is a delivered copy of a previously delayed message.
    pub fn is_resent(&self) -> bool {
        self.queued_at.is_some()
    }

    /// Re-stamp a delayed message for display after delivery.
    ///
    /// The original timestamp is kept as the queue time.
    pub fn mark_resent(&mut self, now: DateTime<Utc>, encrypted: bool) {
        self.queued_at = Some(self.timestamp);
        self.timestamp = now;
        self.delayed = false;
        self.encrypted = encrypted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_mark_resent_keeps_queue_time() {
        let queued = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut msg = ChatMessage::outgoing("hi", "me", PeerId::new("bob"), "phone", queued);
        msg.delayed = true;

        let later = queued + Duration::minutes(3);
        msg.mark_resent(later, true);

        assert!(msg.is_resent());
        assert!(!msg.delayed);
        assert!(msg.encrypted);
        assert_eq!(msg.queued_at, Some(queued));
        assert_eq!(msg.timestamp, later);
    }
}
