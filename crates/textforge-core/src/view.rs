//! Views: cursor/selection/scroll projections of a buffer.
//!
//! A view owns no text; it is a display-side projection of one buffer, and
//! several views may project the same buffer (split editing). Selections are
//! kept disjoint and sorted; when another view edits the shared buffer, this
//! view's selections are shifted through the edit so they keep pointing at
//! the same text.
//!
//! All offsets are character offsets. Grapheme-aware movement helpers are
//! provided for shells translating arrow keys, so a caret never lands inside
//! an emoji or combining sequence.

use crate::buffer::{BufferId, Edit};
use unicode_segmentation::UnicodeSegmentation;

/// Opaque identifier for a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(pub(crate) u64);

impl ViewId {
    /// Get the underlying numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A selection between `anchor` and `head` (the moving end). When both are
/// equal the selection is a bare caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// The fixed end.
    pub anchor: usize,
    /// The moving end; this is where the caret is drawn.
    pub head: usize,
}

impl Selection {
    /// A caret (empty selection) at `offset`.
    pub fn caret(offset: usize) -> Self {
        Self {
            anchor: offset,
            head: offset,
        }
    }

    /// A selection spanning `anchor` to `head`.
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    /// The smaller endpoint.
    pub fn start(&self) -> usize {
        self.anchor.min(self.head)
    }

    /// The larger endpoint.
    pub fn end(&self) -> usize {
        self.anchor.max(self.head)
    }

    /// Returns `true` when the selection is a bare caret.
    pub fn is_caret(&self) -> bool {
        self.anchor == self.head
    }
}

/// Sort selections and merge overlapping ones so the set stays disjoint,
/// tracking where the primary selection ended up.
pub(crate) fn normalize_selections(
    mut selections: Vec<Selection>,
    primary: usize,
) -> (Vec<Selection>, usize) {
    if selections.is_empty() {
        return (vec![Selection::caret(0)], 0);
    }

    // Remember the primary by value before sorting.
    let primary_sel = selections[primary.min(selections.len() - 1)];
    selections.sort_by_key(|s| (s.start(), s.end()));

    let mut merged: Vec<Selection> = Vec::with_capacity(selections.len());
    let mut primary_index = 0;
    for sel in selections {
        let absorbs_primary = sel == primary_sel;
        match merged.last_mut() {
            Some(last) if sel.start() < last.end() || (sel.is_caret() && sel.start() == last.end()) =>
            {
                // Overlap: extend the previous selection.
                let start = last.start();
                let end = last.end().max(sel.end());
                *last = Selection::new(start, end);
            }
            _ => merged.push(sel),
        }
        if absorbs_primary {
            primary_index = merged.len() - 1;
        }
    }

    (merged, primary_index)
}

/// Shift a single offset through an edit: offsets past the edit move by the
/// net length delta; offsets inside a deleted range collapse to the end of
/// the inserted text.
pub(crate) fn map_offset_through(offset: usize, edit: &Edit) -> usize {
    let end = edit.end();
    if offset < edit.offset {
        return offset;
    }
    if offset < end {
        return edit.offset + edit.inserted_len();
    }
    offset - edit.deleted_len + edit.inserted_len()
}

/// A cursor/selection/scroll projection of one buffer.
#[derive(Debug, Clone)]
pub struct View {
    id: ViewId,
    buffer: BufferId,
    selections: Vec<Selection>,
    primary: usize,
    scroll_top: usize,
}

impl View {
    pub(crate) fn new(id: ViewId, buffer: BufferId) -> Self {
        Self {
            id,
            buffer,
            selections: vec![Selection::caret(0)],
            primary: 0,
            scroll_top: 0,
        }
    }

    /// The view's id.
    pub fn id(&self) -> ViewId {
        self.id
    }

    /// The buffer this view projects.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// The primary caret position (the primary selection's head).
    pub fn cursor(&self) -> usize {
        self.selections[self.primary].head
    }

    /// All selections, disjoint and sorted by start.
    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    /// Index of the primary selection in [`selections`](Self::selections).
    pub fn primary_index(&self) -> usize {
        self.primary
    }

    /// Collapse to a single caret at `offset`.
    pub fn set_cursor(&mut self, offset: usize) {
        self.selections = vec![Selection::caret(offset)];
        self.primary = 0;
    }

    /// Replace the selection set. Selections are normalized (sorted, merged
    /// to disjoint); `primary` follows its selection through the merge.
    pub fn set_selections(&mut self, selections: Vec<Selection>, primary: usize) {
        let (normalized, primary) = normalize_selections(selections, primary);
        self.selections = normalized;
        self.primary = primary;
    }

    /// Drop all but the primary selection.
    pub fn clear_secondary(&mut self) {
        let primary = self.selections[self.primary];
        self.selections = vec![primary];
        self.primary = 0;
    }

    /// Top visible line (set by the shell on scroll).
    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    /// Set the top visible line.
    pub fn set_scroll_top(&mut self, line: usize) {
        self.scroll_top = line;
    }

    /// Shift every selection through an edit applied to the shared buffer
    /// (typically from another view or a replace-all).
    pub(crate) fn map_through_edit(&mut self, edit: &Edit) {
        for sel in &mut self.selections {
            sel.anchor = map_offset_through(sel.anchor, edit);
            sel.head = map_offset_through(sel.head, edit);
        }
    }

    /// Clamp all selections into `0..=len` after a mutation whose exact
    /// shape is unknown here (undo/redo).
    pub(crate) fn clamp_to(&mut self, len: usize) {
        for sel in &mut self.selections {
            sel.anchor = sel.anchor.min(len);
            sel.head = sel.head.min(len);
        }
    }
}

fn char_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

fn byte_to_char(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset.min(text.len())].chars().count()
}

/// The next grapheme-cluster boundary after `offset`, clamped to the end of
/// `text`.
pub fn next_grapheme_boundary(text: &str, offset: usize) -> usize {
    let byte = char_to_byte(text, offset);
    match text[byte..].grapheme_indices(true).nth(1) {
        Some((b, _)) => byte_to_char(text, byte + b),
        None => text.chars().count(),
    }
}

/// The previous grapheme-cluster boundary before `offset`, clamped to 0.
pub fn prev_grapheme_boundary(text: &str, offset: usize) -> usize {
    let byte = char_to_byte(text, offset);
    text[..byte]
        .grapheme_indices(true)
        .next_back()
        .map(|(b, _)| byte_to_char(text, b))
        .unwrap_or(0)
}

/// The start of the next word after `offset` (or end of text).
pub fn next_word_boundary(text: &str, offset: usize) -> usize {
    let byte = char_to_byte(text, offset);
    for (b, word) in text.unicode_word_indices() {
        if b > byte {
            return byte_to_char(text, b);
        }
        // The caret sits inside this word: jump to its end.
        if byte < b + word.len() {
            return byte_to_char(text, b + word.len());
        }
    }
    text.chars().count()
}

/// The start of the word before `offset` (or 0).
pub fn prev_word_boundary(text: &str, offset: usize) -> usize {
    let byte = char_to_byte(text, offset);
    let mut prev = 0;
    for (b, _) in text.unicode_word_indices() {
        if b >= byte {
            break;
        }
        prev = b;
    }
    byte_to_char(text, prev)
}
