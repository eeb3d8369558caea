//! Session coordination: buffers, views, tabs/splits, and routing.
//!
//! The [`SessionCoordinator`] owns the buffer registry and the pane tree.
//! Buffers are deduplicated by path and reference-counted across views: a
//! split showing the same document twice shares one buffer (and one
//! highlight pipeline) rather than duplicating work. A buffer dies when its
//! last view closes, unless it is pinned ("open in background") or has
//! unsaved changes awaiting the shell's save/discard/cancel decision.
//!
//! All mutations funnel through the coordinator (single-writer per buffer):
//! view edits, undo/redo, and background-initiated work like replace-all.
//! When one view edits a shared buffer, the other views' selections are
//! shifted through the edit so they keep pointing at the same text.

use crate::buffer::{Buffer, BufferId, BufferSnapshot, Edit};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::highlight::{HighlightEngine, LineLexer, PlainTextLexer, RelexPass};
use crate::persistence::{DocumentStore, PersistenceError};
use crate::search::{LiveTextOverlay, ReplaceConflict, ReplacePlan, ReplaceReport};
use crate::view::{View, ViewId};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Session-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No buffer with this id.
    #[error("buffer {0:?} not found")]
    BufferNotFound(BufferId),
    /// No view with this id.
    #[error("view {0:?} not found")]
    ViewNotFound(ViewId),
    /// The buffer has no file path (scratch document); use
    /// [`SessionCoordinator::save_as`].
    #[error("buffer {0:?} has no file path")]
    NoPath(BufferId),
    /// `confirm_close` was called for a buffer that is not awaiting one.
    #[error("buffer {0:?} is not awaiting a close confirmation")]
    NoPendingClose(BufferId),
    /// A buffer operation failed.
    #[error(transparent)]
    Buffer(#[from] crate::buffer::BufferError),
    /// Loading or saving failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Split orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitAxis {
    /// Side by side.
    Horizontal,
    /// Stacked.
    Vertical,
}

/// A node in the display arrangement: either a view or a split of nested
/// panes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneNode {
    /// A single view.
    Leaf(ViewId),
    /// A split containing at least two panes.
    Split {
        /// Orientation of the split.
        axis: SplitAxis,
        /// Child panes in display order.
        panes: Vec<PaneNode>,
    },
}

impl PaneNode {
    fn collect_views(&self, out: &mut Vec<ViewId>) {
        match self {
            PaneNode::Leaf(view) => out.push(*view),
            PaneNode::Split { panes, .. } => {
                for pane in panes {
                    pane.collect_views(out);
                }
            }
        }
    }

    /// Replace the leaf for `target` with a split holding it and `new`.
    /// Splits along the same axis flatten into siblings instead of nesting.
    fn split_at(&mut self, target: ViewId, new: ViewId, axis: SplitAxis) -> bool {
        match self {
            PaneNode::Leaf(view) if *view == target => {
                *self = PaneNode::Split {
                    axis,
                    panes: vec![PaneNode::Leaf(target), PaneNode::Leaf(new)],
                };
                true
            }
            PaneNode::Leaf(_) => false,
            PaneNode::Split {
                axis: own_axis,
                panes,
            } => {
                if *own_axis == axis {
                    if let Some(pos) = panes
                        .iter()
                        .position(|p| matches!(p, PaneNode::Leaf(v) if *v == target))
                    {
                        panes.insert(pos + 1, PaneNode::Leaf(new));
                        return true;
                    }
                }
                panes.iter_mut().any(|p| p.split_at(target, new, axis))
            }
        }
    }

    /// Remove the leaf for `target`. Returns `(removed, now_empty)`.
    fn remove(&mut self, target: ViewId) -> (bool, bool) {
        match self {
            PaneNode::Leaf(view) => {
                let hit = *view == target;
                (hit, hit)
            }
            PaneNode::Split { panes, .. } => {
                let mut removed = false;
                let mut idx = 0;
                while idx < panes.len() {
                    let (hit, empty) = panes[idx].remove(target);
                    if hit {
                        removed = true;
                        if empty {
                            panes.remove(idx);
                        }
                        break;
                    }
                    idx += 1;
                }
                // Collapse a singleton split into its only child.
                if panes.len() == 1 {
                    *self = panes.pop().expect("checked");
                    return (removed, false);
                }
                (removed, panes.is_empty())
            }
        }
    }
}

/// The tree of views arranged for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaneTree {
    root: Option<PaneNode>,
}

impl PaneTree {
    /// All views in display order.
    pub fn views(&self) -> Vec<ViewId> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.collect_views(&mut out);
        }
        out
    }

    /// The root node, if any view is open.
    pub fn root(&self) -> Option<&PaneNode> {
        self.root.as_ref()
    }

    /// Add a view as a new top-level pane (a tab-like sibling).
    fn push_top_level(&mut self, view: ViewId) {
        match self.root.take() {
            None => self.root = Some(PaneNode::Leaf(view)),
            Some(PaneNode::Split {
                axis: SplitAxis::Horizontal,
                mut panes,
            }) => {
                panes.push(PaneNode::Leaf(view));
                self.root = Some(PaneNode::Split {
                    axis: SplitAxis::Horizontal,
                    panes,
                });
            }
            Some(existing) => {
                self.root = Some(PaneNode::Split {
                    axis: SplitAxis::Horizontal,
                    panes: vec![existing, PaneNode::Leaf(view)],
                });
            }
        }
    }

    fn split(&mut self, target: ViewId, new: ViewId, axis: SplitAxis) {
        match self.root.as_mut() {
            Some(root) => {
                if !root.split_at(target, new, axis) {
                    // Target not displayed (shouldn't happen); fall back to
                    // a top-level pane so the view is at least reachable.
                    self.push_top_level(new);
                }
            }
            None => self.push_top_level(new),
        }
    }

    fn remove(&mut self, target: ViewId) {
        if let Some(root) = self.root.as_mut() {
            let (removed, empty) = root.remove(target);
            if removed && empty {
                self.root = None;
            }
        }
    }
}

/// Outcome of closing a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The view closed; the buffer remains open (other views or a pin
    /// reference it).
    Closed,
    /// The view closed and its buffer was destroyed.
    BufferDestroyed,
    /// The view closed, but the buffer has unsaved changes: it is parked
    /// until the shell calls [`SessionCoordinator::confirm_close`].
    NeedsConfirmation,
}

/// The shell's answer to a close confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Save, then destroy the buffer.
    Save,
    /// Destroy the buffer, discarding changes.
    Discard,
    /// Keep the buffer alive in the background.
    Cancel,
}

/// Lexer selection by file type, resolved once when a buffer opens.
#[derive(Default)]
pub struct LexerRegistry {
    by_file_type: HashMap<String, Arc<dyn LineLexer>>,
}

impl LexerRegistry {
    /// Create an empty registry; unknown file types fall back to
    /// [`PlainTextLexer`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lexer for a file type tag (usually the extension, e.g.
    /// `"py"`).
    pub fn register(&mut self, file_type: impl Into<String>, lexer: Arc<dyn LineLexer>) {
        self.by_file_type.insert(file_type.into(), lexer);
    }

    /// Resolve a lexer for a file type.
    pub fn resolve(&self, file_type: Option<&str>) -> Arc<dyn LineLexer> {
        file_type
            .and_then(|ft| self.by_file_type.get(ft).cloned())
            .unwrap_or_else(|| Arc::new(PlainTextLexer))
    }
}

struct BufferEntry {
    buffer: Buffer,
    path: Option<PathBuf>,
    file_type: Option<String>,
    refcount: usize,
    pinned: bool,
    awaiting_close: bool,
}

/// Composes buffers into views and views into a pane tree, owning lifecycle
/// and routing.
pub struct SessionCoordinator {
    config: EngineConfig,
    store: Box<dyn DocumentStore>,
    lexers: LexerRegistry,
    next_buffer_id: u64,
    next_view_id: u64,
    buffers: BTreeMap<BufferId, BufferEntry>,
    path_to_buffer: HashMap<PathBuf, BufferId>,
    views: BTreeMap<ViewId, View>,
    panes: PaneTree,
    highlighters: HashMap<BufferId, HighlightEngine>,
    active_view: Option<ViewId>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("buffer_count", &self.buffers.len())
            .field("view_count", &self.views.len())
            .field("active_view", &self.active_view)
            .finish()
    }
}

impl SessionCoordinator {
    /// Create a coordinator over a document store and lexer registry.
    pub fn new(store: Box<dyn DocumentStore>, lexers: LexerRegistry, config: EngineConfig) -> Self {
        Self {
            config,
            store,
            lexers,
            next_buffer_id: 0,
            next_view_id: 0,
            buffers: BTreeMap::new(),
            path_to_buffer: HashMap::new(),
            views: BTreeMap::new(),
            panes: PaneTree::default(),
            highlighters: HashMap::new(),
            active_view: None,
        }
    }

    /// Number of open buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of open views.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// The pane tree arranged for display.
    pub fn panes(&self) -> &PaneTree {
        &self.panes
    }

    /// The active view, if any.
    pub fn active_view(&self) -> Option<ViewId> {
        self.active_view
    }

    /// Set the active view.
    pub fn set_active_view(&mut self, id: ViewId) -> Result<(), SessionError> {
        if !self.views.contains_key(&id) {
            return Err(SessionError::ViewNotFound(id));
        }
        self.active_view = Some(id);
        Ok(())
    }

    /// Open a file, reusing the buffer when the path is already open.
    ///
    /// When the buffer already has a view, that view is returned; a buffer
    /// open only in the background gets a fresh view.
    pub fn open(&mut self, path: &Path) -> Result<(BufferId, ViewId), SessionError> {
        if let Some(&buffer_id) = self.path_to_buffer.get(path) {
            if let Some(view_id) = self.first_view_of(buffer_id) {
                return Ok((buffer_id, view_id));
            }
            let view_id = self.create_view(buffer_id);
            return Ok((buffer_id, view_id));
        }

        let buffer_id = self.load_buffer(path)?;
        let view_id = self.create_view(buffer_id);
        Ok((buffer_id, view_id))
    }

    /// Open an unsaved scratch document.
    pub fn open_scratch(&mut self, text: &str) -> (BufferId, ViewId) {
        let buffer_id = self.insert_buffer(text, None);
        let view_id = self.create_view(buffer_id);
        (buffer_id, view_id)
    }

    /// Open (or reuse) a buffer without any view, pinned as "open in
    /// background". Used by replace-all for files not currently displayed.
    pub fn open_in_background(&mut self, path: &Path) -> Result<BufferId, SessionError> {
        if let Some(&buffer_id) = self.path_to_buffer.get(path) {
            return Ok(buffer_id);
        }
        let buffer_id = self.load_buffer(path)?;
        self.buffers
            .get_mut(&buffer_id)
            .expect("just inserted")
            .pinned = true;
        Ok(buffer_id)
    }

    /// Create another view onto the buffer shown in `view`, splitting the
    /// pane along `axis`. The two views share the buffer and its highlight
    /// pipeline.
    pub fn split(&mut self, view: ViewId, axis: SplitAxis) -> Result<ViewId, SessionError> {
        let origin = self
            .views
            .get(&view)
            .ok_or(SessionError::ViewNotFound(view))?;
        let buffer_id = origin.buffer();
        let cursor = origin.cursor();

        let new_id = self.allocate_view(buffer_id);
        if let Some(new_view) = self.views.get_mut(&new_id) {
            new_view.set_cursor(cursor);
        }
        self.panes.split(view, new_id, axis);
        Ok(new_id)
    }

    /// Close a view, destroying its buffer when this was the last reference
    /// and nothing pins it.
    ///
    /// A modified buffer is never silently destroyed: the view goes away,
    /// but the buffer is parked and [`CloseOutcome::NeedsConfirmation`] asks
    /// the shell to run its save/discard/cancel flow and call
    /// [`confirm_close`](Self::confirm_close).
    pub fn close(&mut self, view: ViewId) -> Result<CloseOutcome, SessionError> {
        let Some(state) = self.views.remove(&view) else {
            return Err(SessionError::ViewNotFound(view));
        };
        self.panes.remove(view);
        if self.active_view == Some(view) {
            self.active_view = self.panes.views().first().copied();
        }

        let buffer_id = state.buffer();
        let entry = self
            .buffers
            .get_mut(&buffer_id)
            .ok_or(SessionError::BufferNotFound(buffer_id))?;
        entry.refcount = entry.refcount.saturating_sub(1);

        if entry.refcount > 0 || entry.pinned {
            return Ok(CloseOutcome::Closed);
        }
        if entry.buffer.is_modified() {
            entry.awaiting_close = true;
            return Ok(CloseOutcome::NeedsConfirmation);
        }

        self.destroy_buffer(buffer_id);
        Ok(CloseOutcome::BufferDestroyed)
    }

    /// Resolve a pending close confirmation.
    pub fn confirm_close(
        &mut self,
        buffer: BufferId,
        decision: CloseDecision,
    ) -> Result<CloseOutcome, SessionError> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or(SessionError::BufferNotFound(buffer))?;
        if !entry.awaiting_close {
            return Err(SessionError::NoPendingClose(buffer));
        }
        entry.awaiting_close = false;

        // The buffer was re-opened while the prompt was up: the new view
        // owns it now, whatever the user answered.
        if entry.refcount > 0 {
            return Ok(CloseOutcome::Closed);
        }

        match decision {
            CloseDecision::Save => {
                self.save(buffer)?;
                self.destroy_buffer(buffer);
                Ok(CloseOutcome::BufferDestroyed)
            }
            CloseDecision::Discard => {
                self.destroy_buffer(buffer);
                Ok(CloseOutcome::BufferDestroyed)
            }
            CloseDecision::Cancel => {
                // Keep the document alive in the background.
                self.buffers.get_mut(&buffer).expect("checked").pinned = true;
                Ok(CloseOutcome::Closed)
            }
        }
    }

    /// Pin a buffer so it survives its last view closing.
    pub fn pin(&mut self, buffer: BufferId) -> Result<(), SessionError> {
        self.buffers
            .get_mut(&buffer)
            .map(|e| e.pinned = true)
            .ok_or(SessionError::BufferNotFound(buffer))
    }

    /// Unpin a buffer. If nothing references it anymore, it is destroyed.
    pub fn unpin(&mut self, buffer: BufferId) -> Result<(), SessionError> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or(SessionError::BufferNotFound(buffer))?;
        entry.pinned = false;
        if entry.refcount == 0 && !entry.buffer.is_modified() {
            self.destroy_buffer(buffer);
        }
        Ok(())
    }

    /// Apply an edit through a view: the single-writer path for all
    /// mutations. Returns the new revision.
    ///
    /// Selections in *other* views of the same buffer are shifted through
    /// the edit; the editing view's caret lands at the end of the inserted
    /// text.
    pub fn edit(&mut self, view: ViewId, edit: Edit) -> Result<u64, SessionError> {
        let buffer_id = self.buffer_of_view(view)?;
        let entry = self
            .buffers
            .get_mut(&buffer_id)
            .ok_or(SessionError::BufferNotFound(buffer_id))?;

        let caret = edit.offset + edit.inserted_len();
        let revision = entry.buffer.apply(edit.clone())?;

        for (id, state) in self.views.iter_mut() {
            if state.buffer() != buffer_id {
                continue;
            }
            if *id == view {
                state.set_cursor(caret);
            } else {
                state.map_through_edit(&edit);
            }
        }
        Ok(revision)
    }

    /// Undo the last undo group of the view's buffer.
    pub fn undo(&mut self, view: ViewId) -> Result<Option<u64>, SessionError> {
        let buffer_id = self.buffer_of_view(view)?;
        let entry = self
            .buffers
            .get_mut(&buffer_id)
            .ok_or(SessionError::BufferNotFound(buffer_id))?;
        let revision = entry.buffer.undo();
        let len = entry.buffer.len_chars();
        self.clamp_views(buffer_id, len);
        Ok(revision)
    }

    /// Redo the last undone group of the view's buffer.
    pub fn redo(&mut self, view: ViewId) -> Result<Option<u64>, SessionError> {
        let buffer_id = self.buffer_of_view(view)?;
        let entry = self
            .buffers
            .get_mut(&buffer_id)
            .ok_or(SessionError::BufferNotFound(buffer_id))?;
        let revision = entry.buffer.redo();
        let len = entry.buffer.len_chars();
        self.clamp_views(buffer_id, len);
        Ok(revision)
    }

    /// Save a buffer to its path, returning the bytes written. The buffer's
    /// modified flag clears only on success; a failed save changes nothing.
    pub fn save(&mut self, buffer: BufferId) -> Result<usize, SessionError> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or(SessionError::BufferNotFound(buffer))?;
        let path = entry.path.clone().ok_or(SessionError::NoPath(buffer))?;

        let written = self
            .store
            .save(&path, &entry.buffer.text(), entry.buffer.line_ending())?;
        entry.buffer.mark_saved();
        Ok(written)
    }

    /// Save a buffer under a new path, rebinding the path registry.
    pub fn save_as(&mut self, buffer: BufferId, path: &Path) -> Result<usize, SessionError> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or(SessionError::BufferNotFound(buffer))?;
        if let Some(old) = entry.path.take() {
            self.path_to_buffer.remove(&old);
        }
        entry.path = Some(path.to_path_buf());
        entry.file_type = file_type_of(path);
        self.path_to_buffer.insert(path.to_path_buf(), buffer);
        self.save(buffer)
    }

    /// Shared access to a buffer.
    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(&id).map(|e| &e.buffer)
    }

    /// Mutable access to a buffer, for host integrations that need direct
    /// contract calls (`apply_remapped`, `subscribe`). Routine edits should
    /// go through [`edit`](Self::edit).
    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut Buffer> {
        self.buffers.get_mut(&id).map(|e| &mut e.buffer)
    }

    /// The buffer a view projects.
    pub fn buffer_of_view(&self, view: ViewId) -> Result<BufferId, SessionError> {
        self.views
            .get(&view)
            .map(|v| v.buffer())
            .ok_or(SessionError::ViewNotFound(view))
    }

    /// Shared access to a view.
    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(&id)
    }

    /// Mutable access to a view (cursor/selection updates from the shell).
    pub fn view_mut(&mut self, id: ViewId) -> Option<&mut View> {
        self.views.get_mut(&id)
    }

    /// The buffer id for an open path, if any.
    pub fn buffer_for_path(&self, path: &Path) -> Option<BufferId> {
        self.path_to_buffer.get(path).copied()
    }

    /// The path bound to a buffer, if any.
    pub fn path_of_buffer(&self, buffer: BufferId) -> Option<&Path> {
        self.buffers.get(&buffer)?.path.as_deref()
    }

    /// The file type tag a buffer's analyzers/lexers were resolved with.
    pub fn file_type_of_buffer(&self, buffer: BufferId) -> Option<&str> {
        self.buffers.get(&buffer)?.file_type.as_deref()
    }

    /// Snapshot a buffer for background work.
    pub fn snapshot(&self, buffer: BufferId) -> Result<BufferSnapshot, SessionError> {
        self.buffers
            .get(&buffer)
            .map(|e| e.buffer.snapshot())
            .ok_or(SessionError::BufferNotFound(buffer))
    }

    /// Start an incremental re-lex of a buffer covering `dirty`.
    ///
    /// One engine serves every view of the buffer; `None` means the request
    /// was stale (a newer revision was already highlighted).
    pub fn relex(
        &mut self,
        buffer: BufferId,
        dirty: Range<usize>,
    ) -> Result<Option<RelexPass<'_>>, SessionError> {
        let snapshot = self
            .buffers
            .get(&buffer)
            .map(|e| e.buffer.snapshot())
            .ok_or(SessionError::BufferNotFound(buffer))?;
        let engine = self
            .highlighters
            .get_mut(&buffer)
            .ok_or(SessionError::BufferNotFound(buffer))?;
        Ok(engine.update(snapshot, dirty))
    }

    /// Apply a replace plan: per file, one buffer transaction (one undo
    /// step) after revalidating every match against the current content.
    ///
    /// A file whose text no longer matches reports a [`ReplaceConflict`]
    /// and is skipped; other files still apply. Cancellation is honored
    /// between files, never mid-file.
    pub fn apply_replace_plan(&mut self, plan: &ReplacePlan, token: &CancelToken) -> ReplaceReport {
        let mut report = ReplaceReport::default();

        for batch in &plan.files {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let buffer_id = match self.open_in_background(&batch.path) {
                Ok(id) => id,
                Err(err) => {
                    report.conflicts.push(ReplaceConflict {
                        path: batch.path.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            match self.replace_in_buffer(buffer_id, batch, &plan.replacement) {
                Ok(count) => report.replaced.push((batch.path.clone(), count)),
                Err(conflict) => {
                    log::debug!("replace batch skipped: {conflict}");
                    report.conflicts.push(conflict);
                }
            }
        }

        report
    }

    fn replace_in_buffer(
        &mut self,
        buffer_id: BufferId,
        batch: &crate::search::FileReplaceBatch,
        replacement: &str,
    ) -> Result<usize, ReplaceConflict> {
        let conflict = |reason: String| ReplaceConflict {
            path: batch.path.clone(),
            reason,
        };

        let entry = self
            .buffers
            .get_mut(&buffer_id)
            .ok_or_else(|| conflict("buffer disappeared".to_string()))?;
        let buffer = &mut entry.buffer;

        // Revalidate every match before touching anything: the content must
        // be exactly what the search saw.
        let mut edits = Vec::with_capacity(batch.matches.len());
        for m in &batch.matches {
            let line = m.line.checked_sub(1).filter(|&l| l < buffer.len_lines());
            let Some(line) = line else {
                return Err(conflict(format!("line {} no longer exists", m.line)));
            };
            let start = buffer.line_to_char(line) + m.columns.start;
            let len = m.columns.end - m.columns.start;
            if buffer.read(start..start + len) != m.text {
                return Err(conflict(format!(
                    "content changed at {}:{}",
                    m.line, m.columns.start
                )));
            }
            edits.push(Edit::replace(start, len, replacement));
        }

        // Back to front, so earlier offsets stay valid as the batch applies.
        edits.sort_by(|a, b| b.offset.cmp(&a.offset));
        let count = edits.len();
        buffer
            .apply_batch(edits)
            .map_err(|err| conflict(err.to_string()))?;

        let len = buffer.len_chars();
        self.clamp_views(buffer_id, len);
        Ok(count)
    }

    fn load_buffer(&mut self, path: &Path) -> Result<BufferId, SessionError> {
        let document = self.store.load(path)?;
        let id = self.insert_buffer(&document.text, Some(path.to_path_buf()));
        if let Some(entry) = self.buffers.get_mut(&id) {
            entry.buffer.set_line_ending(document.line_ending);
        }
        Ok(id)
    }

    fn insert_buffer(&mut self, text: &str, path: Option<PathBuf>) -> BufferId {
        let id = BufferId(self.next_buffer_id);
        self.next_buffer_id = self.next_buffer_id.saturating_add(1);

        let file_type = path.as_deref().and_then(file_type_of);
        let buffer = Buffer::new(id, text, self.config.buffer);

        let lexer = self.lexers.resolve(file_type.as_deref());
        self.highlighters.insert(id, HighlightEngine::new(lexer));

        if let Some(path) = path.clone() {
            self.path_to_buffer.insert(path, id);
        }
        self.buffers.insert(
            id,
            BufferEntry {
                buffer,
                path,
                file_type,
                refcount: 0,
                pinned: false,
                awaiting_close: false,
            },
        );
        id
    }

    fn allocate_view(&mut self, buffer: BufferId) -> ViewId {
        let id = ViewId(self.next_view_id);
        self.next_view_id = self.next_view_id.saturating_add(1);
        self.views.insert(id, View::new(id, buffer));
        if let Some(entry) = self.buffers.get_mut(&buffer) {
            entry.refcount += 1;
        }
        if self.active_view.is_none() {
            self.active_view = Some(id);
        }
        id
    }

    fn create_view(&mut self, buffer: BufferId) -> ViewId {
        let id = self.allocate_view(buffer);
        self.panes.push_top_level(id);
        id
    }

    fn first_view_of(&self, buffer: BufferId) -> Option<ViewId> {
        self.views
            .iter()
            .find(|(_, v)| v.buffer() == buffer)
            .map(|(id, _)| *id)
    }

    fn clamp_views(&mut self, buffer: BufferId, len: usize) {
        for view in self.views.values_mut() {
            if view.buffer() == buffer {
                view.clamp_to(len);
            }
        }
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(entry) = self.buffers.remove(&id)
            && let Some(path) = entry.path
        {
            self.path_to_buffer.remove(&path);
        }
        self.highlighters.remove(&id);
    }
}

impl LiveTextOverlay for SessionCoordinator {
    /// Searches see unsaved changes: live text is supplied for open,
    /// modified buffers; clean buffers read from disk like everything else.
    fn live_text(&self, path: &Path) -> Option<String> {
        let id = self.path_to_buffer.get(path)?;
        let entry = self.buffers.get(id)?;
        entry.buffer.is_modified().then(|| entry.buffer.text())
    }
}

fn file_type_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_ending::LineEnding;
    use crate::persistence::LoadedDocument;
    use std::cell::RefCell;
    use std::collections::HashMap as Map;

    /// In-memory store for session tests.
    #[derive(Default)]
    struct MemStore {
        files: RefCell<Map<PathBuf, String>>,
        fail_saves: bool,
    }

    impl MemStore {
        fn with(files: &[(&str, &str)]) -> Self {
            let map = files
                .iter()
                .map(|(p, t)| (PathBuf::from(p), t.to_string()))
                .collect();
            Self {
                files: RefCell::new(map),
                fail_saves: false,
            }
        }
    }

    impl DocumentStore for MemStore {
        fn load(&self, path: &Path) -> Result<LoadedDocument, PersistenceError> {
            let files = self.files.borrow();
            let raw = files.get(path).ok_or_else(|| PersistenceError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
            Ok(LoadedDocument {
                line_ending: LineEnding::detect(raw),
                text: LineEnding::normalize(raw),
            })
        }

        fn save(
            &self,
            path: &Path,
            text: &str,
            line_ending: LineEnding,
        ) -> Result<usize, PersistenceError> {
            if self.fail_saves {
                return Err(PersistenceError::Write {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            let encoded = line_ending.apply(text);
            let len = encoded.len();
            self.files.borrow_mut().insert(path.to_path_buf(), encoded);
            Ok(len)
        }
    }

    fn session(files: &[(&str, &str)]) -> SessionCoordinator {
        SessionCoordinator::new(
            Box::new(MemStore::with(files)),
            LexerRegistry::new(),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_open_reuses_buffer_for_same_path() {
        let mut s = session(&[("/ws/a.txt", "hello")]);
        let (buf1, view1) = s.open(Path::new("/ws/a.txt")).unwrap();
        let (buf2, view2) = s.open(Path::new("/ws/a.txt")).unwrap();

        assert_eq!(buf1, buf2);
        assert_eq!(view1, view2);
        assert_eq!(s.buffer_count(), 1);
        assert_eq!(s.view_count(), 1);
    }

    #[test]
    fn test_split_shares_buffer_and_highlighter() {
        let mut s = session(&[("/ws/a.txt", "hello")]);
        let (buffer, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        let second = s.split(view, SplitAxis::Vertical).unwrap();

        assert_eq!(s.buffer_of_view(second).unwrap(), buffer);
        assert_eq!(s.buffer_count(), 1);
        assert_eq!(s.view_count(), 2);
        // One shared pipeline: the engine map has exactly one entry.
        assert_eq!(s.highlighters.len(), 1);
    }

    #[test]
    fn test_close_last_view_destroys_clean_buffer() {
        let mut s = session(&[("/ws/a.txt", "hello")]);
        let (_, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        let second = s.split(view, SplitAxis::Horizontal).unwrap();

        assert_eq!(s.close(view).unwrap(), CloseOutcome::Closed);
        assert_eq!(s.buffer_count(), 1, "still referenced by the split");
        assert_eq!(s.close(second).unwrap(), CloseOutcome::BufferDestroyed);
        assert_eq!(s.buffer_count(), 0);
    }

    #[test]
    fn test_close_modified_buffer_needs_confirmation() {
        let mut s = session(&[("/ws/a.txt", "hello")]);
        let (buffer, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        s.edit(view, Edit::insert(5, "!")).unwrap();

        assert_eq!(s.close(view).unwrap(), CloseOutcome::NeedsConfirmation);
        assert_eq!(s.buffer_count(), 1, "buffer parked until the shell answers");

        let outcome = s.confirm_close(buffer, CloseDecision::Discard).unwrap();
        assert_eq!(outcome, CloseOutcome::BufferDestroyed);
        assert_eq!(s.buffer_count(), 0);
    }

    #[test]
    fn test_confirm_close_save_persists_then_destroys() {
        let mut s = session(&[("/ws/a.txt", "hello")]);
        let (buffer, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        s.edit(view, Edit::insert(5, "!")).unwrap();
        s.close(view).unwrap();

        let outcome = s.confirm_close(buffer, CloseDecision::Save).unwrap();
        assert_eq!(outcome, CloseOutcome::BufferDestroyed);

        // Reopening sees the saved content.
        let (reopened, _) = s.open(Path::new("/ws/a.txt")).unwrap();
        assert_eq!(s.buffer(reopened).unwrap().text(), "hello!");
    }

    #[test]
    fn test_confirm_close_cancel_parks_buffer_in_background() {
        let mut s = session(&[("/ws/a.txt", "hello")]);
        let (buffer, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        s.edit(view, Edit::insert(0, "x")).unwrap();
        s.close(view).unwrap();

        assert_eq!(
            s.confirm_close(buffer, CloseDecision::Cancel).unwrap(),
            CloseOutcome::Closed
        );
        assert_eq!(s.buffer_count(), 1);
        assert!(s.buffer(buffer).unwrap().is_modified());

        // Reopening attaches a fresh view to the parked buffer.
        let (same, _view) = s.open(Path::new("/ws/a.txt")).unwrap();
        assert_eq!(same, buffer);
    }

    #[test]
    fn test_pinned_buffer_survives_last_view() {
        let mut s = session(&[("/ws/a.txt", "hello")]);
        let (buffer, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        s.pin(buffer).unwrap();

        assert_eq!(s.close(view).unwrap(), CloseOutcome::Closed);
        assert_eq!(s.buffer_count(), 1);

        s.unpin(buffer).unwrap();
        assert_eq!(s.buffer_count(), 0);
    }

    #[test]
    fn test_edit_shifts_sibling_view_selections() {
        let mut s = session(&[("/ws/a.txt", "hello world")]);
        let (_, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        let sibling = s.split(view, SplitAxis::Vertical).unwrap();
        s.view_mut(sibling).unwrap().set_cursor(6); // before "world"

        s.edit(view, Edit::insert(0, ">> ")).unwrap();

        assert_eq!(s.view(sibling).unwrap().cursor(), 9);
        assert_eq!(s.view(view).unwrap().cursor(), 3, "caret after insert");
    }

    #[test]
    fn test_save_failure_keeps_buffer_modified() {
        let mut store = MemStore::with(&[("/ws/a.txt", "hello")]);
        store.fail_saves = true;
        let mut s = SessionCoordinator::new(
            Box::new(store),
            LexerRegistry::new(),
            EngineConfig::default(),
        );

        let (buffer, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        s.edit(view, Edit::insert(0, "x")).unwrap();

        assert!(s.save(buffer).is_err());
        assert!(s.buffer(buffer).unwrap().is_modified());
        assert_eq!(s.buffer(buffer).unwrap().text(), "xhello");
    }

    #[test]
    fn test_save_roundtrips_crlf() {
        let mut s = session(&[("/ws/a.txt", "one\r\ntwo\r\n")]);
        let (buffer, view) = s.open(Path::new("/ws/a.txt")).unwrap();
        assert_eq!(s.buffer(buffer).unwrap().text(), "one\ntwo\n");

        s.edit(view, Edit::insert(0, "zero\n")).unwrap();
        s.save(buffer).unwrap();

        let reloaded = s.store.load(Path::new("/ws/a.txt")).unwrap();
        assert_eq!(reloaded.line_ending, LineEnding::Crlf);
        assert_eq!(reloaded.text, "zero\none\ntwo\n");
    }

    #[test]
    fn test_live_text_overlay_prefers_modified_buffers() {
        let mut s = session(&[("/ws/a.txt", "disk")]);
        let (_, view) = s.open(Path::new("/ws/a.txt")).unwrap();

        assert_eq!(
            s.live_text(Path::new("/ws/a.txt")),
            None,
            "clean buffers read from disk"
        );

        s.edit(view, Edit::insert(4, " live")).unwrap();
        assert_eq!(
            s.live_text(Path::new("/ws/a.txt")).as_deref(),
            Some("disk live")
        );
    }

    #[test]
    fn test_scratch_buffers_have_no_path() {
        let mut s = session(&[]);
        let (buffer, _) = s.open_scratch("notes");
        assert!(s.path_of_buffer(buffer).is_none());
        assert!(matches!(s.save(buffer), Err(SessionError::NoPath(_))));

        s.save_as(buffer, Path::new("/ws/notes.txt")).unwrap();
        assert_eq!(
            s.buffer_for_path(Path::new("/ws/notes.txt")),
            Some(buffer)
        );
        assert!(!s.buffer(buffer).unwrap().is_modified());
    }

    #[test]
    fn test_pane_tree_split_and_remove() {
        let mut s = session(&[("/ws/a.txt", "a"), ("/ws/b.txt", "b")]);
        let (_, first) = s.open(Path::new("/ws/a.txt")).unwrap();
        let (_, second) = s.open(Path::new("/ws/b.txt")).unwrap();
        let third = s.split(first, SplitAxis::Vertical).unwrap();

        assert_eq!(s.panes().views(), vec![first, third, second]);

        s.close(third).unwrap();
        assert_eq!(s.panes().views(), vec![first, second]);

        s.close(first).unwrap();
        s.close(second).unwrap();
        assert!(s.panes().views().is_empty());
    }

    #[test]
    fn test_file_type_derived_from_extension() {
        let mut s = session(&[("/ws/mod.RS", "fn main() {}")]);
        let (buffer, _) = s.open(Path::new("/ws/mod.RS")).unwrap();
        assert_eq!(s.file_type_of_buffer(buffer), Some("rs"));
    }
}
