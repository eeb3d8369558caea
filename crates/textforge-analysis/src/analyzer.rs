//! The analyzer protocol: request/result types and the provider registry.
//!
//! The engine implements no completion, lint, or symbol logic itself; it
//! defines the contract by which pluggable [`Analyzer`]s (in-process or
//! out-of-process language services) are invoked, and the registry that
//! selects one per file type when a buffer opens.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use textforge_core::{BufferId, CancelToken};
use thiserror::Error;

/// The kinds of analysis the orchestrator schedules. Kinds run concurrently
/// and independently for the same buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnalysisKind {
    /// Code completion at a cursor position. Interactive: never debounced.
    Completion,
    /// Diagnostics over the whole document.
    Lint,
    /// Document outline / symbol navigation.
    Symbols,
}

impl AnalysisKind {
    /// The kinds scheduled automatically after an edit (completion is
    /// trigger-driven instead).
    pub const EDIT_DRIVEN: [AnalysisKind; 2] = [AnalysisKind::Lint, AnalysisKind::Symbols];
}

/// A request dispatched to an analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Target buffer.
    pub buffer: BufferId,
    /// The revision of the text snapshot the analyzer will see. Results
    /// tagged with a superseded revision are discarded.
    pub revision: u64,
    /// What to compute.
    pub kind: AnalysisKind,
    /// Cursor offset, present for completion requests.
    pub cursor: Option<usize>,
    /// Cooperative cancellation; analyzers should check it at their own
    /// suspension points.
    pub token: CancelToken,
}

/// One completion suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionItem {
    /// The text to insert.
    pub text: String,
    /// Optional human-readable detail (signature, type).
    pub detail: Option<String>,
    /// Which provider produced this item.
    pub provider: String,
}

/// Severity of a lint note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LintSeverity {
    /// A definite problem.
    Error,
    /// A likely problem.
    Warning,
    /// Style or informational.
    Info,
}

/// One diagnostic produced by a lint pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintNote {
    /// 0-based line.
    pub line: usize,
    /// 0-based character column.
    pub column: usize,
    /// Severity.
    pub severity: LintSeverity,
    /// Message text.
    pub message: String,
}

/// One entry of a document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    /// Symbol name.
    pub name: String,
    /// Provider-defined kind tag (e.g. `"function"`, `"class"`).
    pub kind: String,
    /// 0-based line the symbol is declared on.
    pub line: usize,
}

/// The payload of a completed analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisPayload {
    /// Completion suggestions.
    Completions(Vec<CompletionItem>),
    /// Lint diagnostics.
    Lints(Vec<LintNote>),
    /// Document symbols.
    Symbols(Vec<SymbolEntry>),
    /// Degraded result after an analyzer failure: the kind's previous
    /// output should be cleared, nothing else is affected.
    Empty,
}

/// A completed analysis, tagged with the revision its text came from.
/// Produced by an analyzer, owned by the orchestrator until delivered or
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    /// The analyzed buffer.
    pub buffer: BufferId,
    /// Revision of the analyzed snapshot.
    pub revision: u64,
    /// What was computed.
    pub kind: AnalysisKind,
    /// The outcome.
    pub payload: AnalysisPayload,
}

/// Analyzer errors.
#[derive(Debug, Clone, Error)]
pub enum AnalyzerError {
    /// The request was cancelled before completion; no result follows.
    #[error("analysis cancelled")]
    Cancelled,
    /// The provider failed. The orchestrator degrades this kind's result to
    /// [`AnalysisPayload::Empty`]; other kinds and buffers are unaffected.
    #[error("analyzer failed: {0}")]
    Failed(String),
}

/// An external language service invoked by the worker pool.
///
/// Implementations receive the full snapshot text and must be `Send + Sync`;
/// they run on pool threads and may be called for several buffers
/// concurrently. Timeouts are the analyzer's own responsibility.
pub trait Analyzer: Send + Sync {
    /// Compute a payload for `request` against `text`.
    fn analyze(&self, request: &AnalysisRequest, text: &str) -> Result<AnalysisPayload, AnalyzerError>;
}

/// Maps file-type tags to analyzers. Resolution happens once, when a buffer
/// opens, never by runtime type inspection.
#[derive(Default)]
pub struct AnalyzerRegistry {
    by_file_type: HashMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an analyzer for a file type tag (usually the extension).
    pub fn register(&mut self, file_type: impl Into<String>, analyzer: Arc<dyn Analyzer>) {
        self.by_file_type.insert(file_type.into(), analyzer);
    }

    /// Resolve the analyzer for a file type, if one is registered.
    pub fn resolve(&self, file_type: Option<&str>) -> Option<Arc<dyn Analyzer>> {
        self.by_file_type.get(file_type?).cloned()
    }
}
