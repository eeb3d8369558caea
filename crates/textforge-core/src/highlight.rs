//! Incremental, line-oriented syntax highlighting.
//!
//! The engine owns a per-line cache of spans plus the lexer state at each
//! line boundary. An edit re-lexes only the lines overlapping the dirty
//! range, then keeps expanding forward while the lexer state entering a line
//! differs from what the cache recorded for it. The moment the state
//! reconverges, every following line is provably unchanged and the cached
//! entries are reused. The worst case (a construct that never closes, e.g.
//! an unterminated multi-line string) is a re-lex to end of document.
//!
//! Results stream lazily: [`RelexPass`] is an iterator of per-line
//! [`LineHighlight`] batches tagged with the snapshot revision, so a
//! consumer can start painting before the whole pass completes. Dropping a
//! pass mid-way is safe; the engine records the resume point and the next
//! update re-lexes from there. A pass for a revision older than the cache is
//! refused, so stale spans are never produced once newer ones exist.
//!
//! The engine knows nothing about any concrete language: grammars plug in
//! through the [`LineLexer`] trait (see the `textforge-highlight-simple`
//! crate for implementations).

use crate::buffer::BufferSnapshot;
use std::ops::Range;
use std::sync::Arc;

/// Opaque lexer state at a line boundary (e.g. "inside a multi-line
/// string"). Lexers define their own encoding; the engine only compares
/// states for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LexState(pub u32);

impl LexState {
    /// The default state outside any multi-line construct.
    pub const DEFAULT: LexState = LexState(0);

    /// Sentinel state that never compares equal to a lexer-produced state;
    /// used internally to poison cache entries that must be re-lexed.
    pub(crate) const INVALID: LexState = LexState(u32::MAX);
}

/// The token vocabulary shared between lexers and the shell's theme layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenCategory {
    /// Language keyword.
    Keyword,
    /// Identifier / name.
    Identifier,
    /// String literal (including multi-line strings).
    Str,
    /// Numeric literal.
    Number,
    /// Comment.
    Comment,
    /// Operator or punctuation.
    Punctuation,
    /// Anything else.
    Text,
}

/// A highlighted region, half-open in character offsets.
///
/// Lexers produce spans relative to the start of the line they lexed; the
/// engine converts them to document offsets before emitting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightSpan {
    /// Inclusive start character offset.
    pub start: usize,
    /// Exclusive end character offset.
    pub end: usize,
    /// Token category.
    pub category: TokenCategory,
}

impl HighlightSpan {
    /// Create a span.
    pub fn new(start: usize, end: usize, category: TokenCategory) -> Self {
        Self {
            start,
            end,
            category,
        }
    }
}

/// Freshly computed spans for one line, in document character offsets,
/// tagged with the revision they were computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineHighlight {
    /// Line index (0-based).
    pub line: usize,
    /// The buffer revision this batch was computed from.
    pub revision: u64,
    /// Spans covering the line, in document offsets.
    pub spans: Vec<HighlightSpan>,
}

/// A pluggable per-line tokenizer.
///
/// Implementations must be pure functions of `(line text, entry state)` so
/// the engine's convergence rule holds: equal entry states imply equal
/// output for equal text.
pub trait LineLexer: Send + Sync {
    /// The state in effect before the first line of a document.
    fn initial_state(&self) -> LexState {
        LexState::DEFAULT
    }

    /// Tokenize one line (without its trailing newline), returning
    /// line-relative spans and the state carried into the next line.
    fn lex_line(&self, line: &str, entry: LexState) -> (Vec<HighlightSpan>, LexState);
}

/// A lexer that produces no spans. Used for file types without a registered
/// grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextLexer;

impl LineLexer for PlainTextLexer {
    fn lex_line(&self, _line: &str, _entry: LexState) -> (Vec<HighlightSpan>, LexState) {
        (Vec::new(), LexState::DEFAULT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LineEntry {
    entry_state: LexState,
    exit_state: LexState,
    /// Line-relative spans, so unaffected lines never need offset fix-ups.
    spans: Vec<HighlightSpan>,
}

impl LineEntry {
    fn poisoned() -> Self {
        Self {
            entry_state: LexState::INVALID,
            exit_state: LexState::INVALID,
            spans: Vec::new(),
        }
    }
}

/// Incremental highlight engine for one buffer.
///
/// Splits showing the same buffer share one engine; the session coordinator
/// keys engines by buffer id.
pub struct HighlightEngine {
    lexer: Arc<dyn LineLexer>,
    lines: Vec<LineEntry>,
    /// Revision the cache reflects.
    generation: u64,
    primed: bool,
    /// First line an abandoned pass left un-lexed, if any.
    dirty_from: Option<usize>,
}

impl std::fmt::Debug for HighlightEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightEngine")
            .field("generation", &self.generation)
            .field("cached_lines", &self.lines.len())
            .field("dirty_from", &self.dirty_from)
            .finish()
    }
}

impl HighlightEngine {
    /// Create an engine using the given lexer.
    pub fn new(lexer: Arc<dyn LineLexer>) -> Self {
        Self {
            lexer,
            lines: Vec::new(),
            generation: 0,
            primed: false,
            dirty_from: None,
        }
    }

    /// The revision the cache was last updated to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start an incremental re-lex covering `dirty` (a character range in
    /// `snapshot`'s coordinates, typically [`crate::ChangeNotice::dirty_range`]).
    ///
    /// Returns `None` (leaving the cache untouched) when the snapshot
    /// is older than the cache generation: a newer revision's spans already
    /// exist and stale spans must never be produced. The first call on a
    /// fresh engine lexes the whole document regardless of `dirty`.
    pub fn update(
        &mut self,
        snapshot: BufferSnapshot,
        dirty: Range<usize>,
    ) -> Option<RelexPass<'_>> {
        if self.primed && snapshot.revision() < self.generation {
            log::debug!(
                "dropping stale relex request: snapshot revision {} < cache generation {}",
                snapshot.revision(),
                self.generation
            );
            return None;
        }

        let total = snapshot.len_lines();
        let (start_line, end_line) = if self.primed {
            let mut start = snapshot.char_to_line(dirty.start);
            if let Some(resume) = self.dirty_from {
                start = start.min(resume);
            }
            // `dirty.end` (not `end - 1`) on purpose: inserting a newline
            // splits a line, and the text spilled onto the new line is dirty
            // even though the inserted range ends at the newline itself.
            let end = snapshot.char_to_line(dirty.end).min(total - 1);
            (start.min(end), end)
        } else {
            (0, total - 1)
        };

        // Old cache entries past the affected zone, shifted by the line
        // delta, stay valid and seed the convergence check.
        let delta = total as isize - self.lines.len() as isize;
        let old_after = end_line as isize - delta + 1;
        let tail: Vec<LineEntry> =
            if old_after >= 0 && (old_after as usize) <= self.lines.len() {
                self.lines[old_after as usize..].to_vec()
            } else {
                Vec::new()
            };

        self.lines.truncate(start_line);
        let start_line = start_line.min(self.lines.len());
        let state = if start_line == 0 {
            self.lexer.initial_state()
        } else {
            self.lines[start_line - 1].exit_state
        };

        self.generation = snapshot.revision();
        self.primed = true;
        self.dirty_from = None;

        Some(RelexPass {
            engine: self,
            snapshot,
            next_line: start_line,
            converge_from: end_line + 1,
            state,
            tail,
            finished: false,
        })
    }

    /// Cached spans for `line`, converted to document offsets using
    /// `snapshot`'s line starts. Returns `None` for out-of-range lines, for
    /// snapshots that do not match the cache generation, or for lines an
    /// abandoned pass left un-lexed.
    pub fn line_spans(
        &self,
        snapshot: &BufferSnapshot,
        line: usize,
    ) -> Option<Vec<HighlightSpan>> {
        if !self.primed || snapshot.revision() != self.generation {
            return None;
        }
        let entry = self.lines.get(line)?;
        if entry.entry_state == LexState::INVALID {
            return None;
        }
        let line_start = snapshot.line_to_char(line);
        Some(
            entry
                .spans
                .iter()
                .map(|s| HighlightSpan::new(s.start + line_start, s.end + line_start, s.category))
                .collect(),
        )
    }
}

/// A lazily evaluated re-lex: each `next()` lexes one line, commits it to
/// the cache, and yields its spans. The pass ends when the lexer state
/// reconverges with the cache or the document ends. Dropping a pass early
/// records the resume point so the next update picks it up.
pub struct RelexPass<'a> {
    engine: &'a mut HighlightEngine,
    snapshot: BufferSnapshot,
    next_line: usize,
    /// First line past the dirty zone; from here on, convergence may stop
    /// the pass.
    converge_from: usize,
    state: LexState,
    tail: Vec<LineEntry>,
    finished: bool,
}

impl RelexPass<'_> {
    /// The revision this pass computes spans for.
    pub fn revision(&self) -> u64 {
        self.snapshot.revision()
    }

    /// Run the pass to completion, collecting all remaining batches.
    pub fn collect_all(mut self) -> Vec<LineHighlight> {
        let mut out = Vec::new();
        for batch in &mut self {
            out.push(batch);
        }
        out
    }
}

impl Iterator for RelexPass<'_> {
    type Item = LineHighlight;

    fn next(&mut self) -> Option<LineHighlight> {
        if self.finished {
            return None;
        }

        let total = self.snapshot.len_lines();
        if self.next_line >= total {
            self.finished = true;
            return None;
        }

        // Past the dirty zone: if the state entering this line matches what
        // the cache recorded, everything that follows is unchanged.
        if self.next_line >= self.converge_from {
            let tail_idx = self.next_line - self.converge_from;
            if self
                .tail
                .get(tail_idx)
                .is_some_and(|old| old.entry_state == self.state)
            {
                self.engine
                    .lines
                    .extend(self.tail[tail_idx..].iter().cloned());
                self.finished = true;
                return None;
            }
        }

        let line = self.next_line;
        let text = self.snapshot.line_text(line).unwrap_or_default();
        let (spans, exit) = self.engine.lexer.lex_line(&text, self.state);

        self.engine.lines.push(LineEntry {
            entry_state: self.state,
            exit_state: exit,
            spans: spans.clone(),
        });

        let line_start = self.snapshot.line_to_char(line);
        let absolute = spans
            .into_iter()
            .map(|s| HighlightSpan::new(s.start + line_start, s.end + line_start, s.category))
            .collect();

        self.state = exit;
        self.next_line += 1;

        Some(LineHighlight {
            line,
            revision: self.snapshot.revision(),
            spans: absolute,
        })
    }
}

impl Drop for RelexPass<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned mid-pass: poison the gap up to the convergence boundary,
        // re-attach the old tail, and remember where to resume.
        let total = self.snapshot.len_lines();
        while self.engine.lines.len() < self.converge_from.min(total) {
            self.engine.lines.push(LineEntry::poisoned());
        }
        self.engine.lines.extend(self.tail.drain(..));
        self.engine.lines.truncate(total);
        self.engine.dirty_from = Some(self.next_line);
    }
}
