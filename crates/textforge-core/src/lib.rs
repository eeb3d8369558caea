#![warn(missing_docs)]
//! textforge-core - Headless Editor Engine
//!
//! # Overview
//!
//! `textforge-core` is the kernel of an interactive source-code editor: it
//! maintains live text buffers, renders incremental syntax highlighting,
//! streams workspace search results, and composes buffers into views, tabs,
//! and splits. It draws nothing and reads no keyboard: the windowing
//! toolkit, project explorer, and process shell are thin I/O layers around
//! this crate.
//!
//! The design goal is that editing feels instantaneous while background
//! analyses run without blocking input or producing stale results:
//!
//! - **Revisions**: every committed edit advances a strictly monotonic
//!   revision counter; all derived results (highlight spans, analysis
//!   payloads) are tagged with the revision they were computed from and
//!   discarded when superseded.
//! - **Snapshots**: background work reads cheap rope snapshots, never the
//!   live buffer, so it cannot observe a half-applied edit.
//! - **Single-writer buffers**: all mutations funnel through the session
//!   coordinator, including background-initiated ones (replace-all).
//! - **Cooperative cancellation**: long-running work checks a shared token
//!   at its own suspension points and stops promptly without corrupting
//!   state.
//!
//! Language intelligence (completion/lint/symbols scheduling) lives in the
//! companion `textforge-analysis` crate; pluggable lexers for the highlight
//! engine live in `textforge-highlight-simple`.
//!
//! # Quick Start
//!
//! ```rust
//! use textforge_core::{
//!     Edit, EngineConfig, FsDocumentStore, LexerRegistry, SessionCoordinator,
//! };
//!
//! let mut session = SessionCoordinator::new(
//!     Box::new(FsDocumentStore),
//!     LexerRegistry::new(),
//!     EngineConfig::default(),
//! );
//!
//! let (buffer, view) = session.open_scratch("fn main() {}\n");
//! let revision = session.edit(view, Edit::insert(0, "// demo\n")).unwrap();
//! assert_eq!(revision, 1);
//! assert!(session.buffer(buffer).unwrap().text().starts_with("// demo"));
//! ```
//!
//! # Module Description
//!
//! - [`buffer`] - revisioned buffers, reversible edits, undo/redo, journal
//! - [`highlight`] - incremental line-oriented highlight engine
//! - [`search`] - compiled queries, streaming workspace search, replace plans
//! - [`session`] - buffer registry, views, pane tree, persistence routing
//! - [`view`] - cursor/selection projections and motion helpers
//! - [`cancel`] - cooperative cancellation tokens
//! - [`config`] - engine configuration
//! - [`line_ending`] - LF/CRLF detection and conversion
//! - [`persistence`] - the document store seam

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod highlight;
pub mod line_ending;
pub mod persistence;
pub mod search;
pub mod session;
pub mod view;

pub use buffer::{Buffer, BufferError, BufferId, BufferSnapshot, ChangeNotice, Edit};
pub use cancel::CancelToken;
pub use config::{AnalysisSettings, BufferSettings, EngineConfig};
pub use highlight::{
    HighlightEngine, HighlightSpan, LexState, LineHighlight, LineLexer, PlainTextLexer,
    RelexPass, TokenCategory,
};
pub use line_ending::LineEnding;
pub use persistence::{DocumentStore, FsDocumentStore, LoadedDocument, PersistenceError};
pub use search::{
    CompiledQuery, FileIndex, LiveTextOverlay, NoOverlay, ReplaceConflict, ReplacePlan,
    ReplaceReport, SearchError, SearchEvent, SearchMatch, SearchQuery, SearchScope,
    SearchSession, run_search, spawn_search,
};
pub use session::{
    CloseDecision, CloseOutcome, LexerRegistry, PaneNode, PaneTree, SessionCoordinator,
    SessionError, SplitAxis,
};
pub use view::{Selection, View, ViewId};
