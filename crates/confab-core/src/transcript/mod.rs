//! Conversation transcript with timestamp marks and compaction.
//!
//! The transcript has two views: durable history and the pending view that
//! shows messages waiting for delivery. History carries a list of
//! [`TimedMark`]s, each recording the history length at some wall-clock
//! time. Compaction cuts history at a mark and rebases the marks after it.
//!
//! ## Invariants
//!
//! - Marks are in non-decreasing time order.
//! - Mark offsets are relative to the current history; compaction rebases them.
//! - Compaction never removes content recorded after the cutoff, and a
//!   cutoff at or before an earlier one is a no-op.

mod entry;
mod view;

pub use entry::{status_message, Segment, StyleTag, TranscriptEntry, ME_PREFIX, TIME_DISPLAY};
pub use view::{BufferSlice, StyledSpan, TextView};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

const LINE_SEPARATOR: &str = "\n";
const SEPARATOR_CHARS: usize = 1;

/// Which view an entry goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewKind {
    /// Durable conversation history.
    History,
    /// Messages waiting for delivery.
    Pending,
}

/// A history offset recorded at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedMark {
    /// When the mark was taken.
    pub at: DateTime<Utc>,
    /// History length (in characters) at that time.
    pub offset: usize,
}

/// The transcript of one conversation.
#[derive(Debug, Default)]
pub struct Transcript {
    history: TextView,
    pending: TextView,
    marks: Vec<TimedMark>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Durable history.
    pub fn history(&self) -> &TextView {
        &self.history
    }

    /// Pending view.
    pub fn pending(&self) -> &TextView {
        &self.pending
    }

    /// Current marks, oldest first.
    pub fn marks(&self) -> &[TimedMark] {
        &self.marks
    }

    fn view_mut(&mut self, kind: ViewKind) -> &mut TextView {
        match kind {
            ViewKind::History => &mut self.history,
            ViewKind::Pending => &mut self.pending,
        }
    }

    /// Append `entry` to the end of a view.
    ///
    /// The returned slice starts where the entry began (including its line
    /// separator) and ends at the new end of the view. Callers that need
    /// to remove the entry later must keep it.
    pub fn append(&mut self, entry: &TranscriptEntry, kind: ViewKind) -> BufferSlice {
        let view = self.view_mut(kind);
        let start = view.char_count();
        if start != 0 {
            view.push(LINE_SEPARATOR, None);
        }
        for segment in entry.rendered() {
            view.push(&segment.text, segment.tag);
        }
        BufferSlice {
            start,
            end: view.char_count(),
        }
    }

    /// Record a mark at the current end of history, now.
    pub fn mark_now(&mut self) -> TimedMark {
        self.mark_at(Utc::now())
    }

    /// Record a mark at time `at` where the next history line's text will
    /// begin, past its separator.
    ///
    /// A time earlier than the last mark is clamped to it so marks stay ordered.
    pub fn mark_at(&mut self, at: DateTime<Utc>) -> TimedMark {
        let at = match self.marks.last() {
            Some(last) if last.at > at => last.at,
            _ => at,
        };
        let offset = match self.history.char_count() {
            0 => 0,
            n => n + SEPARATOR_CHARS,
        };
        let mark = TimedMark { at, offset };
        self.marks.push(mark);
        mark
    }

    /// Drop history up to the last mark taken at or before `older_than`.
    ///
    /// Returns the number of characters removed.
    pub fn compact(&mut self, older_than: DateTime<Utc>) -> usize {
        let Some(idx) = self.marks.iter().rposition(|m| m.at <= older_than) else {
            return 0;
        };

        if idx == self.marks.len() - 1 {
            let removed = self.history.clear();
            self.marks.clear();
            debug!(removed, "Compacted entire history");
            return removed;
        }

        let cut = self.marks[idx].offset;
        let removed = self.history.delete(0, cut);
        self.marks.drain(..=idx);
        for mark in &mut self.marks {
            mark.offset = mark.offset.saturating_sub(cut);
        }
        debug!(removed, remaining_marks = self.marks.len(), "Compacted history");
        removed
    }

    /// Remove a pending entry by the slice captured when it was appended.
    ///
    /// The first line also takes the separator of the line after it, so the
    /// view never starts with a blank line. Returns the range actually
    /// removed; rebase the remaining slices against it.
    pub fn remove_pending(&mut self, slice: BufferSlice) -> BufferSlice {
        let end = if slice.start == 0 && self.pending.char_count() > slice.end {
            slice.end + SEPARATOR_CHARS
        } else {
            slice.end
        };
        let removed = BufferSlice {
            start: slice.start,
            end,
        };
        self.pending.delete(removed.start, removed.end);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(m)
    }

    /// A status line of exactly `len` characters, timestamp included.
    fn line(fill: char, len: usize, at: DateTime<Utc>) -> TranscriptEntry {
        TranscriptEntry::status(fill.to_string().repeat(len - 11), at)
    }

    fn push(transcript: &mut Transcript, entry: TranscriptEntry) {
        transcript.mark_at(entry.timestamp);
        transcript.append(&entry, ViewKind::History);
    }

    /// History with marks at t=0,10,20 minutes and offsets 0,50,120.
    fn three_marks() -> Transcript {
        let mut transcript = Transcript::new();
        push(&mut transcript, line('a', 49, minutes(0)));
        push(&mut transcript, line('b', 69, minutes(10)));
        push(&mut transcript, line('c', 30, minutes(20)));
        transcript
    }

    #[test]
    fn test_marks_point_past_separators() {
        let transcript = three_marks();
        let offsets: Vec<_> = transcript.marks().iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 50, 120]);
        assert_eq!(transcript.history().char_count(), 150);
    }

    #[test]
    fn test_compact_rebases_remaining_marks() {
        let mut transcript = three_marks();
        let removed = transcript.compact(minutes(15));

        assert_eq!(removed, 50);
        assert_eq!(transcript.marks(), &[TimedMark { at: minutes(20), offset: 70 }]);
        assert!(transcript.history().text().starts_with("[00:10:00] b"));
        assert_eq!(transcript.history().char_count(), 100);
        assert!(transcript.history().text()[70..].starts_with("[00:20:00] c"));
    }

    #[test]
    fn test_compact_before_first_mark_is_noop() {
        let mut transcript = three_marks();
        assert_eq!(transcript.compact(t0() - Duration::minutes(1)), 0);
        assert_eq!(transcript.marks().len(), 3);
        assert_eq!(transcript.history().char_count(), 150);
    }

    #[test]
    fn test_compact_past_last_mark_clears_everything() {
        let mut transcript = three_marks();
        assert_eq!(transcript.compact(minutes(30)), 150);
        assert!(transcript.history().is_empty());
        assert!(transcript.marks().is_empty());
    }

    #[test]
    fn test_compact_is_monotonic() {
        let mut transcript = three_marks();
        transcript.compact(minutes(15));
        let text = transcript.history().text().to_string();
        let marks = transcript.marks().to_vec();

        assert_eq!(transcript.compact(minutes(15)), 0);
        assert_eq!(transcript.compact(minutes(5)), 0);
        assert_eq!(transcript.history().text(), text);
        assert_eq!(transcript.marks(), marks.as_slice());
    }

    #[test]
    fn test_compact_keeps_newer_content() {
        let mut transcript = Transcript::new();
        push(&mut transcript, TranscriptEntry::status("old", minutes(0)));
        push(&mut transcript, TranscriptEntry::status("mid", minutes(5)));
        push(&mut transcript, TranscriptEntry::status("new", minutes(50)));

        transcript.compact(minutes(10));
        assert_eq!(transcript.history().text(), "[00:05:00] mid\n[00:50:00] new");
        assert!(transcript.marks().iter().all(|m| m.at > minutes(10)));
    }

    #[test]
    fn test_mark_after_compaction_stays_consistent() {
        let mut transcript = three_marks();
        transcript.compact(minutes(15));
        push(&mut transcript, line('d', 20, minutes(40)));

        let last = transcript.marks().last().copied().unwrap();
        assert_eq!(last.offset, 101);
        assert!(transcript.history().text()[last.offset..].starts_with("[00:40:00] d"));
    }

    #[test]
    fn test_marks_never_go_back_in_time() {
        let mut transcript = Transcript::new();
        transcript.mark_at(minutes(10));
        let mark = transcript.mark_at(minutes(5));
        assert_eq!(mark.at, minutes(10));
    }

    #[test]
    fn test_append_returns_slice_and_separates_lines() {
        let mut transcript = Transcript::new();
        let first = transcript.append(&TranscriptEntry::status("one", minutes(0)), ViewKind::History);
        let second = transcript.append(&TranscriptEntry::status("two", minutes(1)), ViewKind::History);

        assert_eq!(first.start, 0);
        assert_eq!(second.start, first.end);
        assert_eq!(transcript.history().text(), "[00:00:00] one\n[00:01:00] two");
        assert!(transcript.pending().is_empty());
    }

    #[test]
    fn test_remove_pending_entry() {
        let mut transcript = Transcript::new();
        let a = transcript.append(&TranscriptEntry::status("a", minutes(0)), ViewKind::Pending);
        let b = transcript.append(&TranscriptEntry::status("b", minutes(0)), ViewKind::Pending);

        assert_eq!(transcript.remove_pending(b), b);
        assert_eq!(transcript.pending().text(), "[00:00:00] a");
        transcript.remove_pending(a);
        assert!(transcript.pending().is_empty());
    }

    #[test]
    fn test_removing_first_pending_line_takes_its_separator() {
        let mut transcript = Transcript::new();
        let a = transcript.append(&TranscriptEntry::status("a", minutes(0)), ViewKind::Pending);
        let mut b = transcript.append(&TranscriptEntry::status("b", minutes(1)), ViewKind::Pending);

        let removed = transcript.remove_pending(a);
        assert_eq!(removed, BufferSlice { start: 0, end: a.end + 1 });
        assert_eq!(transcript.pending().text(), "[00:01:00] b");

        b.rebase_after(removed);
        assert_eq!(b, BufferSlice { start: 0, end: 12 });
        assert_eq!(transcript.pending().slice_text(b), "[00:01:00] b");
    }
}
