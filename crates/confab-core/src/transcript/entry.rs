//! Transcript entries and how messages and status lines render into them.

use crate::message::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix that turns a message into an action line.
pub const ME_PREFIX: &str = "/me ";

/// Timestamp format used in the transcript.
pub const TIME_DISPLAY: &str = "%H:%M:%S";

/// Style classes the renderer maps to colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StyleTag {
    /// Our name on outgoing messages.
    OutgoingUser,
    /// Peer name on incoming messages.
    IncomingUser,
    /// Body of outgoing messages.
    OutgoingText,
    /// Body of incoming messages.
    IncomingText,
    /// Status and notification lines.
    StatusText,
    /// Timestamps.
    Timestamp,
    /// Our name on messages waiting for delivery.
    OutgoingDelayedUser,
    /// Body of messages waiting for delivery.
    OutgoingDelayedText,
}

/// A run of text with an optional style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Style, if any.
    pub tag: Option<StyleTag>,
    /// The text.
    pub text: String,
}

impl Segment {
    fn tagged(tag: StyleTag, text: impl Into<String>) -> Self {
        Self {
            tag: Some(tag),
            text: text.into(),
        }
    }

    fn plain(text: impl Into<String>) -> Self {
        Self {
            tag: None,
            text: text.into(),
        }
    }
}

/// One immutable transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Display timestamp.
    pub timestamp: DateTime<Utc>,
    /// Original queue time for re-sent messages.
    pub queued_at: Option<DateTime<Utc>>,
    /// Styled body.
    pub segments: Vec<Segment>,
    /// Whether appending this entry should draw the user's attention.
    pub attention: bool,
}

impl TranscriptEntry {
    /// Render a chat message.
    pub fn from_message(msg: &ChatMessage) -> Self {
        let trimmed = msg.text.trim();
        let is_action = trimmed.starts_with(ME_PREFIX);

        let (user_tag, text_tag) = if msg.delayed {
            (StyleTag::OutgoingDelayedUser, StyleTag::OutgoingDelayedText)
        } else if msg.outgoing {
            (StyleTag::OutgoingUser, StyleTag::OutgoingText)
        } else {
            (StyleTag::IncomingUser, StyleTag::IncomingText)
        };

        let segments = if is_action && !msg.delayed {
            let action = trimmed.trim_start_matches(ME_PREFIX);
            vec![Segment::tagged(user_tag, format!("{} {}", msg.from, action))]
        } else {
            vec![
                Segment::tagged(user_tag, msg.from.clone()),
                Segment::plain(":  "),
                Segment::tagged(text_tag, msg.text.clone()),
            ]
        };

        Self {
            timestamp: msg.timestamp,
            queued_at: msg.queued_at,
            segments,
            attention: !msg.delayed && !is_action,
        }
    }

    /// A status or notification line.
    pub fn status(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            queued_at: None,
            segments: vec![Segment::tagged(StyleTag::StatusText, text)],
            attention: false,
        }
    }

    /// Rendered segments in order, timestamps included (no leading separator).
    pub fn rendered(&self) -> Vec<Segment> {
        let mut out = Vec::with_capacity(self.segments.len() + 2);
        if let Some(queued) = self.queued_at {
            out.push(Segment::tagged(StyleTag::Timestamp, format_timestamp(queued)));
        }
        out.push(Segment::tagged(
            StyleTag::Timestamp,
            format_timestamp(self.timestamp),
        ));
        out.extend(self.segments.iter().cloned());
        out
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    format!("[{}] ", at.format(TIME_DISPLAY))
}

fn show_for_display(show: &str, gone: bool) -> String {
    match show {
        "" | "available" | "online" => {
            if gone {
                String::new()
            } else {
                "Available".to_string()
            }
        }
        "xa" => "Not Available".to_string(),
        "away" => "Away".to_string(),
        "dnd" => "Busy".to_string(),
        "chat" => "Free for Chat".to_string(),
        "invisible" => "Invisible".to_string(),
        other => other.to_string(),
    }
}

fn show_status_for_display(show_status: &str) -> String {
    if show_status.is_empty() {
        String::new()
    } else {
        format!(" ({})", show_status)
    }
}

fn online_status(show: &str, show_status: &str) -> String {
    let shown = show_for_display(show, false);
    if shown.is_empty() {
        return String::new();
    }
    shown + &show_status_for_display(show_status)
}

fn extra_offline_status(show: &str, show_status: &str) -> String {
    let shown = show_for_display(show, true);
    if shown.is_empty() {
        return show_status_for_display(show_status);
    }
    if show_status.is_empty() {
        format!(" ({})", shown)
    } else {
        format!(" ({}: {})", shown, show_status)
    }
}

/// Presence line for `from`, or an empty string when there is nothing to say.
pub fn status_message(from: &str, show: &str, show_status: &str, gone: bool) -> String {
    let tail = if gone {
        format!("Offline{}", extra_offline_status(show, show_status))
    } else {
        online_status(show, show_status)
    };
    if tail.is_empty() {
        String::new()
    } else {
        format!("{} is now {}", from, tail)
    }
}
