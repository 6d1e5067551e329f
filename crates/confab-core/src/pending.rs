//! Delayed outgoing messages waiting for delivery confirmation.
//!
//! When the transport accepts a message but cannot deliver it yet, the
//! message is shown in the pending view and kept here under its trace id.
//! Delivery confirmation and replay are split:
//!
//! - [`PendingMessageStore::mark_sent`] only records that a trace is ready.
//!   It runs on the delivery-confirmation path.
//! - [`PendingMessageStore::replay_ready`] moves ready entries out. It runs
//!   only while the conversation is visible, so a backgrounded window does
//!   not churn.
//!
//! Replay order is the order confirmations arrived, not send order.

use crate::error::{Error, Result};
use crate::message::ChatMessage;
use crate::transcript::BufferSlice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Transport-assigned identifier correlating a queued message with its delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A delayed message and where it sits in the pending view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Trace id assigned by the transport.
    pub trace: TraceId,
    /// The message, including destination and enqueue timestamp.
    pub message: ChatMessage,
    /// Position in the pending view, captured at insertion.
    pub slice: BufferSlice,
}

impl PendingEntry {
    /// When the entry was queued.
    pub fn queued_at(&self) -> DateTime<Utc> {
        self.message.queued_at.unwrap_or(self.message.timestamp)
    }
}

/// Delayed messages of one conversation.
#[derive(Debug)]
pub struct PendingMessageStore {
    entries: HashMap<TraceId, PendingEntry>,
    ready: VecDeque<TraceId>,
    capacity: usize,
}

impl PendingMessageStore {
    /// Create a store holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ready: VecDeque::new(),
            capacity,
        }
    }

    /// Number of entries waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `trace` is currently queued.
    pub fn contains(&self, trace: TraceId) -> bool {
        self.entries.contains_key(&trace)
    }

    /// Look up a queued entry.
    pub fn get(&self, trace: TraceId) -> Option<&PendingEntry> {
        self.entries.get(&trace)
    }

    /// Check that `trace` could be enqueued right now.
    pub fn check_vacant(&self, trace: TraceId) -> Result<()> {
        if self.entries.contains_key(&trace) {
            return Err(Error::DuplicateTrace(trace));
        }
        if self.entries.len() >= self.capacity {
            return Err(Error::QueueFull);
        }
        Ok(())
    }

    /// Queue `entry` under its trace id.
    pub fn enqueue(&mut self, entry: PendingEntry) -> Result<()> {
        self.check_vacant(entry.trace)?;
        debug!(trace = %entry.trace, to = %entry.message.to, "Queued delayed message");
        self.entries.insert(entry.trace, entry);
        Ok(())
    }

    /// Record that the transport delivered `trace`. Does not move data.
    pub fn mark_sent(&mut self, trace: TraceId) {
        debug!(trace = %trace, "Delayed message ready for replay");
        self.ready.push_back(trace);
    }

    /// Traces marked sent but not yet replayed.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Drain the ready set and return the matching entries, re-stamped.
    ///
    /// Entries come back in the order their traces were marked. Ready traces
    /// with no entry (already replayed, never queued) are skipped.
    pub fn replay_ready(&mut self, now: DateTime<Utc>, encrypted: bool) -> Vec<PendingEntry> {
        let ready: Vec<TraceId> = self.ready.drain(..).collect();
        let mut out = Vec::with_capacity(ready.len());
        for trace in ready {
            match self.entries.remove(&trace) {
                Some(mut entry) => {
                    entry.message.mark_resent(now, encrypted);
                    out.push(entry);
                }
                None => {
                    warn!(trace = %trace, "Ready trace has no pending entry, skipping");
                }
            }
        }
        out
    }

    /// Shift the slices of entries located after `removed` left by its length.
    ///
    /// Call after deleting `removed` from the pending view.
    pub fn rebase_after(&mut self, removed: BufferSlice) {
        for entry in self.entries.values_mut() {
            entry.slice.rebase_after(removed);
        }
    }
}
