//! Append-only text view with styled spans.
//!
//! Offsets are character offsets, not byte offsets. All bookkeeping that
//! refers into a view (spans here, marks and pending slices elsewhere) is
//! plain integers and must be rebased by whoever deletes text.

use super::entry::StyleTag;
use serde::{Deserialize, Serialize};

/// A character range inside a view, captured at insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSlice {
    /// First character of the range.
    pub start: usize,
    /// One past the last character.
    pub end: usize,
}

impl BufferSlice {
    /// Number of characters covered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the slice covers nothing.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Shift left by the length of `removed` if this slice lies after it.
    ///
    /// A slice whose leading separator went with `removed` starts where
    /// `removed` started.
    pub fn rebase_after(&mut self, removed: BufferSlice) {
        if self.start < removed.start {
            return;
        }
        let len = removed.len();
        self.start = self.start.saturating_sub(len).max(removed.start);
        self.end = self.end.saturating_sub(len).max(self.start);
    }
}

/// A style applied to a character range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyledSpan {
    /// Style to apply.
    pub tag: StyleTag,
    /// First character.
    pub start: usize,
    /// One past the last character.
    pub end: usize,
}

/// Rendered text plus style spans.
#[derive(Debug, Clone, Default)]
pub struct TextView {
    text: String,
    chars: usize,
    spans: Vec<StyledSpan>,
}

impl TextView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rendered text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn char_count(&self) -> usize {
        self.chars
    }

    /// Whether nothing has been written (or everything was deleted).
    pub fn is_empty(&self) -> bool {
        self.chars == 0
    }

    /// Style spans in insertion order.
    pub fn spans(&self) -> &[StyledSpan] {
        &self.spans
    }

    /// Text covered by `slice`, clamped to the view.
    pub fn slice_text(&self, slice: BufferSlice) -> &str {
        let start = self.byte_offset(slice.start);
        let end = self.byte_offset(slice.end.max(slice.start));
        &self.text[start..end]
    }

    pub(crate) fn push(&mut self, text: &str, tag: Option<StyleTag>) {
        let start = self.chars;
        let added = text.chars().count();
        self.text.push_str(text);
        self.chars += added;
        if let Some(tag) = tag {
            if added > 0 {
                self.spans.push(StyledSpan {
                    tag,
                    start,
                    end: self.chars,
                });
            }
        }
    }

    /// Delete characters `[start, end)` and rebase spans. Returns characters removed.
    pub(crate) fn delete(&mut self, start: usize, end: usize) -> usize {
        let end = end.min(self.chars);
        if start >= end {
            return 0;
        }
        let removed = end - start;
        let from = self.byte_offset(start);
        let to = self.byte_offset(end);
        self.text.replace_range(from..to, "");
        self.chars -= removed;

        let shift = |x: usize| {
            if x <= start {
                x
            } else if x <= end {
                start
            } else {
                x - removed
            }
        };
        self.spans = self
            .spans
            .iter()
            .map(|s| StyledSpan {
                tag: s.tag,
                start: shift(s.start),
                end: shift(s.end),
            })
            .filter(|s| s.start < s.end)
            .collect();
        removed
    }

    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.chars;
        self.text.clear();
        self.spans.clear();
        self.chars = 0;
        removed
    }

    fn byte_offset(&self, char_offset: usize) -> usize {
        if char_offset >= self.chars {
            return self.text.len();
        }
        self.text
            .char_indices()
            .nth(char_offset)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len())
    }
}
