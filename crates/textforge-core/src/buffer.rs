//! Revisioned text buffers with reversible edit history.
//!
//! A [`Buffer`] is the authoritative mutable document. Every committed edit
//! (including undo and redo, which are themselves edits) advances a strictly
//! monotonic `revision` counter, so no two distinct text states ever share a
//! revision number. Downstream consumers (highlighting, analysis, search
//! revalidation) key all derived results to the revision they were computed
//! from and discard anything stale.
//!
//! Undo granularity is independent of revision visibility: consecutive short
//! insertions may *coalesce* into one undo step, but each keystroke still
//! advances the revision once, so subscribers observe every intermediate
//! state.
//!
//! All public offsets are **character offsets** (Unicode scalar values).

use crate::LineEnding;
use crate::config::BufferSettings;
use ropey::Rope;
use std::collections::VecDeque;
use std::ops::Range;
use thiserror::Error;

/// Opaque identifier for a buffer. Distinct from any file path: a buffer may
/// be unsaved or represent an in-memory scratch document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub(crate) u64);

impl BufferId {
    /// Construct a buffer id from a raw value.
    ///
    /// Hosts normally receive ids from the session coordinator; this is for
    /// tests and standalone buffer use.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the underlying numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A single reversible edit: delete `deleted_len` characters at `offset`,
/// then insert `inserted` at the same position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Start character offset, interpreted against the text the edit is
    /// applied to.
    pub offset: usize,
    /// Number of characters deleted at `offset` (may be zero).
    pub deleted_len: usize,
    /// Text inserted at `offset` after the deletion (may be empty).
    pub inserted: String,
}

impl Edit {
    /// A pure insertion.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            deleted_len: 0,
            inserted: text.into(),
        }
    }

    /// A pure deletion.
    pub fn delete(offset: usize, len: usize) -> Self {
        Self {
            offset,
            deleted_len: len,
            inserted: String::new(),
        }
    }

    /// A replacement (delete then insert at one offset).
    pub fn replace(offset: usize, len: usize, text: impl Into<String>) -> Self {
        Self {
            offset,
            deleted_len: len,
            inserted: text.into(),
        }
    }

    /// Length of `inserted` in characters.
    pub fn inserted_len(&self) -> usize {
        self.inserted.chars().count()
    }

    /// Exclusive end of the deleted range in the pre-edit document.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.deleted_len)
    }

    /// Returns `true` if the edit neither deletes nor inserts anything.
    pub fn is_noop(&self) -> bool {
        self.deleted_len == 0 && self.inserted.is_empty()
    }
}

/// Buffer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// An edit addressed a range outside the current document.
    #[error("edit range {offset}..{end} is out of bounds (buffer has {len} chars)")]
    OutOfBounds {
        /// Start of the offending range.
        offset: usize,
        /// Exclusive end of the offending range.
        end: usize,
        /// Current buffer length in characters.
        len: usize,
    },
    /// Remapping a stale edit failed because its target region was deleted
    /// or rewritten by an interleaving edit.
    #[error("edit conflict: target region was modified by an interleaving edit")]
    EditConflict,
    /// The edit's base revision can no longer be remapped (too old for the
    /// journal, or newer than the buffer has ever been).
    #[error("revision {base} is not remappable against current revision {current}")]
    RevisionUnavailable {
        /// The revision the edit was computed against.
        base: u64,
        /// The buffer's current revision.
        current: u64,
    },
}

/// Notification delivered synchronously to subscribers after each committed
/// edit, on the thread that applied it.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    /// The buffer that changed.
    pub buffer: BufferId,
    /// The edit as applied.
    pub edit: Edit,
    /// The exact text removed by the edit (empty for pure insertions).
    pub deleted_text: String,
    /// Revision before the edit.
    pub old_revision: u64,
    /// Revision after the edit (`old_revision + 1`).
    pub new_revision: u64,
}

impl ChangeNotice {
    /// The character range occupied by the edit in the *post-edit* document.
    /// This is the natural dirty range for incremental re-highlighting.
    pub fn dirty_range(&self) -> Range<usize> {
        self.edit.offset..self.edit.offset + self.edit.inserted_len()
    }
}

/// Change listener callback type.
pub type ChangeListener = Box<dyn FnMut(&ChangeNotice) + Send>;

/// An immutable snapshot of a buffer's text at a specific revision.
///
/// Snapshots are cheap (rope clones share their chunks) and are what
/// background work reads, so highlighting, analysis, and search never
/// observe a half-applied edit.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    id: BufferId,
    revision: u64,
    text: Rope,
}

impl BufferSnapshot {
    /// The snapshotted buffer's id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The revision this snapshot was taken at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The full document text.
    pub fn text(&self) -> String {
        self.text.to_string()
    }

    /// Read a character range, clamped to the document bounds.
    pub fn read(&self, range: Range<usize>) -> String {
        let len = self.text.len_chars();
        let start = range.start.min(len);
        let end = range.end.min(len).max(start);
        self.text.slice(start..end).to_string()
    }

    /// Document length in characters.
    pub fn len_chars(&self) -> usize {
        self.text.len_chars()
    }

    /// Document length in lines. A trailing newline opens a final empty
    /// line, matching rope semantics.
    pub fn len_lines(&self) -> usize {
        self.text.len_lines()
    }

    /// Text of a single line without its trailing newline, or `None` when
    /// `line` is out of range.
    pub fn line_text(&self, line: usize) -> Option<String> {
        if line >= self.text.len_lines() {
            return None;
        }
        let slice = self.text.line(line);
        let mut text = slice.to_string();
        if text.ends_with('\n') {
            text.pop();
        }
        Some(text)
    }

    /// Character offset of the first character of `line`.
    pub fn line_to_char(&self, line: usize) -> usize {
        self.text.line_to_char(line.min(self.text.len_lines()))
    }

    /// Line index containing the character at `offset`.
    pub fn char_to_line(&self, offset: usize) -> usize {
        self.text.char_to_line(offset.min(self.text.len_chars()))
    }
}

/// An edit as committed, with the removed text captured so its inverse is
/// directly computable.
#[derive(Debug, Clone)]
struct CommittedEdit {
    offset: usize,
    deleted_text: String,
    inserted_text: String,
}

impl CommittedEdit {
    fn deleted_len(&self) -> usize {
        self.deleted_text.chars().count()
    }

    fn inserted_len(&self) -> usize {
        self.inserted_text.chars().count()
    }
}

#[derive(Debug, Clone)]
struct UndoStep {
    group_id: usize,
    edits: Vec<CommittedEdit>,
}

/// Undo/redo bookkeeping: steps carry a group id so coalesced keystrokes
/// undo together, and a clean index tracks the saved point in the linear
/// history.
#[derive(Debug)]
struct UndoHistory {
    undo_stack: Vec<UndoStep>,
    redo_stack: Vec<UndoStep>,
    max_depth: usize,
    /// `undo_stack.len()` at the last save. May exceed the current stack
    /// length while the redo stack is non-empty.
    clean_index: Option<usize>,
    next_group_id: usize,
    open_group: Option<OpenGroup>,
}

#[derive(Debug, Clone, Copy)]
struct OpenGroup {
    id: usize,
    /// Character offset immediately after the group's last insertion; the
    /// next keystroke joins the group only when it lands exactly here.
    end_offset: usize,
    inserted_chars: usize,
}

impl UndoHistory {
    fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
            clean_index: Some(0),
            next_group_id: 0,
            open_group: None,
        }
    }

    fn is_clean(&self) -> bool {
        self.clean_index == Some(self.undo_stack.len())
    }

    fn mark_clean(&mut self) {
        self.clean_index = Some(self.undo_stack.len());
        self.open_group = None;
    }

    fn clear_redo_and_adjust_clean(&mut self) {
        if self.redo_stack.is_empty() {
            return;
        }
        // A clean point inside the redo area becomes unreachable.
        if let Some(clean_index) = self.clean_index
            && clean_index > self.undo_stack.len()
        {
            self.clean_index = None;
        }
        self.redo_stack.clear();
    }

    fn push_step(&mut self, mut step: UndoStep, coalesce: Option<OpenGroup>) {
        self.clear_redo_and_adjust_clean();

        if self.undo_stack.len() >= self.max_depth {
            self.undo_stack.remove(0);
            match self.clean_index {
                Some(0) => self.clean_index = None,
                Some(idx) => self.clean_index = Some(idx - 1),
                None => {}
            }
        }

        // Never coalesce across the clean point, otherwise undoing back to
        // "saved" would overshoot it.
        let reuse_open_group = coalesce.is_some()
            && self.open_group.is_some()
            && self.clean_index != Some(self.undo_stack.len());

        if reuse_open_group {
            step.group_id = self.open_group.map(|g| g.id).expect("checked");
        } else {
            step.group_id = self.next_group_id;
            self.next_group_id = self.next_group_id.wrapping_add(1);
        }

        self.open_group = coalesce.map(|g| OpenGroup {
            id: step.group_id,
            ..g
        });
        self.undo_stack.push(step);
    }

    fn pop_undo_group(&mut self) -> Option<Vec<UndoStep>> {
        let last_group_id = self.undo_stack.last().map(|s| s.group_id)?;
        let mut steps = Vec::new();
        while let Some(step) = self.undo_stack.last() {
            if step.group_id != last_group_id {
                break;
            }
            steps.push(self.undo_stack.pop().expect("checked"));
        }
        Some(steps)
    }

    fn pop_redo_group(&mut self) -> Option<Vec<UndoStep>> {
        let last_group_id = self.redo_stack.last().map(|s| s.group_id)?;
        let mut steps = Vec::new();
        while let Some(step) = self.redo_stack.last() {
            if step.group_id != last_group_id {
                break;
            }
            steps.push(self.redo_stack.pop().expect("checked"));
        }
        Some(steps)
    }
}

/// A journal record of one committed edit, kept for offset remapping.
#[derive(Debug, Clone, Copy)]
struct JournalEntry {
    /// Revision produced by this edit.
    revision: u64,
    offset: usize,
    deleted_len: usize,
    inserted_len: usize,
}

/// The authoritative mutable document: rope-backed text, a strictly
/// increasing revision counter, grouped undo/redo history, a bounded edit
/// journal for remapping stale edits, and synchronous change listeners.
///
/// Mutation is single-writer: concurrent edits from multiple views are
/// serialized through the session coordinator before they reach the buffer.
pub struct Buffer {
    id: BufferId,
    text: Rope,
    revision: u64,
    history: UndoHistory,
    journal: VecDeque<JournalEntry>,
    listeners: Vec<ChangeListener>,
    line_ending: LineEnding,
    settings: BufferSettings,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("revision", &self.revision)
            .field("len_chars", &self.text.len_chars())
            .field("undo_depth", &self.history.undo_stack.len())
            .finish()
    }
}

impl Buffer {
    /// Create a buffer over an initial (LF-normalized) text.
    pub fn new(id: BufferId, text: &str, settings: BufferSettings) -> Self {
        Self {
            id,
            text: Rope::from_str(text),
            revision: 0,
            history: UndoHistory::new(settings.max_undo_depth),
            journal: VecDeque::new(),
            listeners: Vec::new(),
            line_ending: LineEnding::detect(text),
            settings,
        }
    }

    /// The buffer's id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The current revision. Strictly increases by 1 per committed edit;
    /// undo and redo produce fresh revisions of their own.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The full document text.
    pub fn text(&self) -> String {
        self.text.to_string()
    }

    /// Read a character range, clamped to the document bounds.
    pub fn read(&self, range: Range<usize>) -> String {
        let len = self.text.len_chars();
        let start = range.start.min(len);
        let end = range.end.min(len).max(start);
        self.text.slice(start..end).to_string()
    }

    /// Document length in characters.
    pub fn len_chars(&self) -> usize {
        self.text.len_chars()
    }

    /// Document length in lines.
    pub fn len_lines(&self) -> usize {
        self.text.len_lines()
    }

    /// Character offset of the first character of `line`.
    pub fn line_to_char(&self, line: usize) -> usize {
        self.text.line_to_char(line.min(self.text.len_lines()))
    }

    /// Line index containing the character at `offset`.
    pub fn char_to_line(&self, offset: usize) -> usize {
        self.text.char_to_line(offset.min(self.text.len_chars()))
    }

    /// Text of a single line without its trailing newline, or `None` when
    /// `line` is out of range.
    pub fn line_text(&self, line: usize) -> Option<String> {
        if line >= self.text.len_lines() {
            return None;
        }
        let mut text = self.text.line(line).to_string();
        if text.ends_with('\n') {
            text.pop();
        }
        Some(text)
    }

    /// The preferred line ending for saving this document.
    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Override the preferred line ending for saving this document.
    pub fn set_line_ending(&mut self, line_ending: LineEnding) {
        self.line_ending = line_ending;
    }

    /// The document text converted to the preferred line ending for saving.
    pub fn text_for_saving(&self) -> String {
        self.line_ending.apply(&self.text())
    }

    /// Returns `true` if the buffer has unsaved changes.
    pub fn is_modified(&self) -> bool {
        !self.history.is_clean()
    }

    /// Mark the current state as saved.
    pub fn mark_saved(&mut self) {
        self.history.mark_clean();
    }

    /// Take an immutable snapshot of the current text and revision.
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            id: self.id,
            revision: self.revision,
            text: self.text.clone(),
        }
    }

    /// Subscribe to committed edits. Listeners run synchronously on the
    /// thread that applied the edit, in subscription order.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&ChangeNotice) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Apply an edit, returning the new revision.
    ///
    /// No-op edits (nothing deleted, nothing inserted) return the current
    /// revision unchanged, notify nobody, and leave the history alone.
    pub fn apply(&mut self, edit: Edit) -> Result<u64, BufferError> {
        if edit.is_noop() {
            return Ok(self.revision);
        }
        let committed = self.commit(&edit)?;
        self.record_undo(committed, &edit);
        Ok(self.revision)
    }

    /// Apply several edits as one undo group.
    ///
    /// Each edit's offset is interpreted against the text state produced by
    /// the previous edits in the batch (the teacher-delta convention).
    /// Every edit still advances the revision by one; only undo grouping is
    /// affected. Used by replace-all so undo reverts a whole file's
    /// replacements atomically.
    pub fn apply_batch(&mut self, edits: Vec<Edit>) -> Result<u64, BufferError> {
        // Validate the whole batch against a scratch rope first so a failing
        // edit cannot leave the buffer half-transformed.
        let mut probe = self.text.clone();
        for edit in &edits {
            let len = probe.len_chars();
            if edit.end() > len {
                return Err(BufferError::OutOfBounds {
                    offset: edit.offset,
                    end: edit.end(),
                    len,
                });
            }
            probe.remove(edit.offset..edit.end());
            probe.insert(edit.offset, &edit.inserted);
        }

        let mut committed = Vec::with_capacity(edits.len());
        for edit in edits {
            if edit.is_noop() {
                continue;
            }
            committed.push(self.commit(&edit).expect("validated above"));
        }
        if !committed.is_empty() {
            self.history.push_step(
                UndoStep {
                    group_id: 0,
                    edits: committed,
                },
                None,
            );
        }
        Ok(self.revision)
    }

    /// Apply an edit whose offsets were computed against an older revision.
    ///
    /// The edit is remapped through the journal of interleaving edits
    /// (offsets shift by each edit's net length delta). If the target
    /// region was itself rewritten or deleted, the edit is rejected with
    /// [`BufferError::EditConflict`]; if `base_revision` is too old for the
    /// journal (or in the future), with
    /// [`BufferError::RevisionUnavailable`].
    pub fn apply_remapped(&mut self, mut edit: Edit, base_revision: u64) -> Result<u64, BufferError> {
        if base_revision > self.revision {
            return Err(BufferError::RevisionUnavailable {
                base: base_revision,
                current: self.revision,
            });
        }
        if base_revision < self.revision {
            let oldest = self.journal.front().map(|e| e.revision.saturating_sub(1));
            if oldest.is_none_or(|o| base_revision < o) {
                return Err(BufferError::RevisionUnavailable {
                    base: base_revision,
                    current: self.revision,
                });
            }
            for entry in self.journal.iter().filter(|e| e.revision > base_revision) {
                edit = remap_through(edit, entry)?;
            }
        }
        self.apply(edit)
    }

    /// Undo the most recent undo group, returning the new revision, or
    /// `None` when there is nothing to undo.
    ///
    /// Undo never reuses a historical revision: it commits inverse edits,
    /// each advancing the revision, so analysis results are never matched
    /// against two different text states.
    pub fn undo(&mut self) -> Option<u64> {
        let steps = self.history.pop_undo_group()?;
        for step in &steps {
            for edit in step.edits.iter().rev() {
                let inverse = Edit {
                    offset: edit.offset,
                    deleted_len: edit.inserted_len(),
                    inserted: edit.deleted_text.clone(),
                };
                self.commit(&inverse).expect("undo inverse must fit");
            }
        }
        // `steps` is newest-first; pushing in that order leaves the group's
        // oldest step on top, which is the one redo must replay first.
        for step in steps {
            self.history.redo_stack.push(step);
        }
        self.history.open_group = None;
        Some(self.revision)
    }

    /// Redo the most recently undone group, returning the new revision, or
    /// `None` when there is nothing to redo.
    pub fn redo(&mut self) -> Option<u64> {
        let steps = self.history.pop_redo_group()?;
        for step in &steps {
            for edit in &step.edits {
                let replay = Edit {
                    offset: edit.offset,
                    deleted_len: edit.deleted_len(),
                    inserted: edit.inserted_text.clone(),
                };
                self.commit(&replay).expect("redo replay must fit");
            }
        }
        // `steps` is oldest-first here, so the newest step ends up on top of
        // the undo stack again.
        for step in steps {
            self.history.undo_stack.push(step);
        }
        self.history.open_group = None;
        Some(self.revision)
    }

    /// Returns `true` if there is anything to undo.
    pub fn can_undo(&self) -> bool {
        !self.history.undo_stack.is_empty()
    }

    /// Returns `true` if there is anything to redo.
    pub fn can_redo(&self) -> bool {
        !self.history.redo_stack.is_empty()
    }

    /// Number of undo steps on the stack (coalesced groups count each step).
    pub fn undo_depth(&self) -> usize {
        self.history.undo_stack.len()
    }

    /// Number of redo steps on the stack.
    pub fn redo_depth(&self) -> usize {
        self.history.redo_stack.len()
    }

    /// Break the open coalescing group: the next insertion starts a new
    /// undo step regardless of locality.
    pub fn end_coalescing(&mut self) {
        self.history.open_group = None;
    }

    /// Apply the edit to the rope, bump the revision, journal it, and
    /// notify listeners. Does not touch undo bookkeeping.
    fn commit(&mut self, edit: &Edit) -> Result<CommittedEdit, BufferError> {
        let len = self.text.len_chars();
        if edit.end() > len {
            return Err(BufferError::OutOfBounds {
                offset: edit.offset,
                end: edit.end(),
                len,
            });
        }

        let deleted_text = self.text.slice(edit.offset..edit.end()).to_string();
        self.text.remove(edit.offset..edit.end());
        self.text.insert(edit.offset, &edit.inserted);

        let old_revision = self.revision;
        self.revision += 1;

        self.journal.push_back(JournalEntry {
            revision: self.revision,
            offset: edit.offset,
            deleted_len: edit.deleted_len,
            inserted_len: edit.inserted_len(),
        });
        while self.journal.len() > self.settings.journal_depth {
            self.journal.pop_front();
        }

        let notice = ChangeNotice {
            buffer: self.id,
            edit: edit.clone(),
            deleted_text: deleted_text.clone(),
            old_revision,
            new_revision: self.revision,
        };
        for listener in &mut self.listeners {
            listener(&notice);
        }

        Ok(CommittedEdit {
            offset: edit.offset,
            deleted_text,
            inserted_text: edit.inserted.clone(),
        })
    }

    fn record_undo(&mut self, committed: CommittedEdit, edit: &Edit) {
        let coalesce = self.coalesce_candidate(edit);
        self.history.push_step(
            UndoStep {
                group_id: 0,
                edits: vec![committed],
            },
            coalesce,
        );
    }

    /// A keystroke joins the open undo group when it is a short, newline-free
    /// insertion landing exactly where the previous one ended and the group
    /// has not outgrown its length cap.
    fn coalesce_candidate(&self, edit: &Edit) -> Option<OpenGroup> {
        if !self.settings.coalesce_inserts || edit.deleted_len != 0 {
            return None;
        }
        let inserted_len = edit.inserted_len();
        if inserted_len == 0 || inserted_len > 4 || edit.inserted.contains('\n') {
            return None;
        }

        let grown = match self.history.open_group {
            Some(group) if group.end_offset == edit.offset => {
                group.inserted_chars + inserted_len
            }
            Some(_) => return None,
            None => inserted_len,
        };
        if grown > self.settings.coalesce_max_chars {
            return None;
        }

        Some(OpenGroup {
            id: 0,
            end_offset: edit.offset + inserted_len,
            inserted_chars: grown,
        })
    }
}

/// Shift `edit` across one interleaving journal entry, or reject it when the
/// ranges overlap.
fn remap_through(mut edit: Edit, entry: &JournalEntry) -> Result<Edit, BufferError> {
    let entry_end = entry.offset + entry.deleted_len;

    if edit.offset >= entry_end {
        // Entirely after the interleaving edit: shift by its net length
        // delta. `edit.offset >= entry_end >= entry.deleted_len`, so the
        // subtraction cannot underflow.
        edit.offset = edit.offset - entry.deleted_len + entry.inserted_len;
        return Ok(edit);
    }
    if edit.end() <= entry.offset {
        // Entirely before: unaffected.
        return Ok(edit);
    }
    // Overlap: the stale edit targets text the interleaving edit rewrote.
    Err(BufferError::EditConflict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn buffer(text: &str) -> Buffer {
        Buffer::new(BufferId::from_raw(0), text, BufferSettings::default())
    }

    #[test]
    fn test_apply_insert_delete_replace() {
        let mut buf = buffer("hello world");

        buf.apply(Edit::insert(5, ",")).unwrap();
        assert_eq!(buf.text(), "hello, world");

        buf.apply(Edit::delete(5, 1)).unwrap();
        assert_eq!(buf.text(), "hello world");

        buf.apply(Edit::replace(6, 5, "there")).unwrap();
        assert_eq!(buf.text(), "hello there");
    }

    #[test]
    fn test_revision_advances_once_per_edit() {
        let mut buf = buffer("");
        assert_eq!(buf.revision(), 0);

        for (i, ch) in ["a", "b", "c"].iter().enumerate() {
            let rev = buf.apply(Edit::insert(i, *ch)).unwrap();
            assert_eq!(rev, (i + 1) as u64);
        }
        assert_eq!(buf.revision(), 3);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut buf = buffer("abc");
        let err = buf.apply(Edit::delete(2, 5)).unwrap_err();
        assert_eq!(
            err,
            BufferError::OutOfBounds {
                offset: 2,
                end: 7,
                len: 3
            }
        );
        // Failed edits change nothing.
        assert_eq!(buf.revision(), 0);
        assert_eq!(buf.text(), "abc");
    }

    #[test]
    fn test_undo_redo_restore_text_exactly() {
        let mut buf = buffer("foo = 1\nbar = 2\n");
        let original = buf.text();

        buf.apply(Edit::insert(0, "baz")).unwrap();
        buf.end_coalescing();
        buf.apply(Edit::delete(8, 4)).unwrap();
        buf.apply(Edit::replace(0, 3, "qux")).unwrap();
        let edited = buf.text();

        while buf.undo().is_some() {}
        assert_eq!(buf.text(), original);

        while buf.redo().is_some() {}
        assert_eq!(buf.text(), edited);
    }

    #[test]
    fn test_undo_produces_fresh_revision() {
        let mut buf = buffer("");
        buf.apply(Edit::insert(0, "x")).unwrap();
        assert_eq!(buf.revision(), 1);

        let rev = buf.undo().unwrap();
        assert_eq!(rev, 2, "undo is itself a new edit");
        let rev = buf.redo().unwrap();
        assert_eq!(rev, 3);
    }

    #[test]
    fn test_coalesced_keystrokes_undo_as_one_step() {
        let mut buf = buffer("");
        for (i, ch) in ["a", "b", "c"].iter().enumerate() {
            buf.apply(Edit::insert(i, *ch)).unwrap();
        }
        assert_eq!(buf.text(), "abc");
        assert_eq!(buf.revision(), 3, "coalescing never hides revisions");

        buf.undo().unwrap();
        assert_eq!(buf.text(), "");
        assert!(!buf.can_undo());

        buf.redo().unwrap();
        assert_eq!(buf.text(), "abc");
    }

    #[test]
    fn test_non_adjacent_insert_breaks_coalescing() {
        let mut buf = buffer("__");
        buf.apply(Edit::insert(0, "a")).unwrap();
        buf.apply(Edit::insert(3, "b")).unwrap(); // not at offset 1

        buf.undo().unwrap();
        assert_eq!(buf.text(), "a__");
        buf.undo().unwrap();
        assert_eq!(buf.text(), "__");
    }

    #[test]
    fn test_deletion_breaks_coalescing() {
        let mut buf = buffer("");
        buf.apply(Edit::insert(0, "a")).unwrap();
        buf.apply(Edit::insert(1, "b")).unwrap();
        buf.apply(Edit::delete(1, 1)).unwrap();
        buf.apply(Edit::insert(1, "c")).unwrap();

        buf.undo().unwrap();
        assert_eq!(buf.text(), "a");
        assert!(buf.can_undo());
    }

    #[test]
    fn test_apply_batch_is_one_undo_group_many_revisions() {
        let mut buf = buffer("foo bar foo");
        let rev = buf
            .apply_batch(vec![Edit::replace(8, 3, "baz"), Edit::replace(0, 3, "baz")])
            .unwrap();
        assert_eq!(buf.text(), "baz bar baz");
        assert_eq!(rev, 2, "each batched edit still advances the revision");

        buf.undo().unwrap();
        assert_eq!(buf.text(), "foo bar foo");
    }

    #[test]
    fn test_apply_batch_validates_before_mutating() {
        let mut buf = buffer("short");
        let err = buf
            .apply_batch(vec![Edit::insert(0, "x"), Edit::delete(0, 100)])
            .unwrap_err();
        assert!(matches!(err, BufferError::OutOfBounds { .. }));
        assert_eq!(buf.text(), "short");
        assert_eq!(buf.revision(), 0);
    }

    #[test]
    fn test_subscribe_sees_every_edit_synchronously() {
        let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut buf = buffer("");
        buf.subscribe(move |notice| {
            seen_clone
                .lock()
                .unwrap()
                .push((notice.old_revision, notice.new_revision));
        });

        buf.apply(Edit::insert(0, "a")).unwrap();
        buf.apply(Edit::insert(1, "b")).unwrap();
        buf.undo().unwrap();

        let seen = seen.lock().unwrap();
        // Two inserts plus two inverse edits from the group undo.
        assert_eq!(seen.as_slice(), &[(0, 1), (1, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn test_remap_shifts_offset_past_interleaving_insert() {
        let mut buf = buffer("foo = 1\n");
        let base = buf.revision();

        // Interleaving edit inserts 4 chars at the front.
        buf.apply(Edit::insert(0, "baz;")).unwrap();

        // An edit computed against `base` targeting "1" at offset 6.
        let rev = buf
            .apply_remapped(Edit::replace(6, 1, "2"), base)
            .unwrap();
        assert_eq!(buf.text(), "baz;foo = 2\n");
        assert_eq!(rev, buf.revision());
    }

    #[test]
    fn test_remap_rejects_edit_into_deleted_region() {
        let mut buf = buffer("foo bar baz");
        let base = buf.revision();

        buf.apply(Edit::delete(4, 4)).unwrap(); // remove "bar "
        let err = buf
            .apply_remapped(Edit::replace(5, 1, "x"), base)
            .unwrap_err();
        assert_eq!(err, BufferError::EditConflict);
    }

    #[test]
    fn test_remap_rejects_future_and_forgotten_revisions() {
        let settings = BufferSettings {
            journal_depth: 2,
            ..BufferSettings::default()
        };
        let mut buf = Buffer::new(BufferId::from_raw(0), "abcdef", settings);

        assert!(matches!(
            buf.apply_remapped(Edit::insert(0, "x"), 5),
            Err(BufferError::RevisionUnavailable { base: 5, .. })
        ));

        for i in 0..4 {
            buf.apply(Edit::insert(i, "z")).unwrap();
        }
        // Revision 0 has been evicted from a depth-2 journal.
        assert!(matches!(
            buf.apply_remapped(Edit::insert(0, "x"), 0),
            Err(BufferError::RevisionUnavailable { .. })
        ));
    }

    #[test]
    fn test_modified_tracking_across_save_and_undo() {
        let mut buf = buffer("data");
        assert!(!buf.is_modified());

        buf.apply(Edit::insert(4, "!")).unwrap();
        assert!(buf.is_modified());

        buf.mark_saved();
        assert!(!buf.is_modified());

        buf.apply(Edit::insert(5, "?")).unwrap();
        assert!(buf.is_modified());

        buf.undo().unwrap();
        assert!(!buf.is_modified(), "undo back to the saved point is clean");
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_edits() {
        let mut buf = buffer("one");
        let snap = buf.snapshot();

        buf.apply(Edit::insert(3, " two")).unwrap();

        assert_eq!(snap.text(), "one");
        assert_eq!(snap.revision(), 0);
        assert_eq!(buf.text(), "one two");
    }

    #[test]
    fn test_snapshot_line_queries() {
        let buf = buffer("foo = 1\nbar = 2\n");
        let snap = buf.snapshot();

        assert_eq!(snap.line_text(0).as_deref(), Some("foo = 1"));
        assert_eq!(snap.line_text(1).as_deref(), Some("bar = 2"));
        assert_eq!(snap.line_to_char(1), 8);
        assert_eq!(snap.char_to_line(9), 1);
        assert_eq!(snap.read(0..3), "foo");
    }

    #[test]
    fn test_unicode_offsets_are_characters() {
        let mut buf = buffer("héllo");
        buf.apply(Edit::insert(5, "!")).unwrap();
        assert_eq!(buf.text(), "héllo!");
        assert_eq!(buf.len_chars(), 6);
    }
}
