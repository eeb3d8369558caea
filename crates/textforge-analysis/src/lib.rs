#![warn(missing_docs)]
//! textforge-analysis - Analyzer Protocol & Scheduling
//!
//! This crate coordinates asynchronous code intelligence (completion, lint,
//! symbols) for `textforge-core` buffers without ever blocking input or
//! delivering stale results. It implements no language smarts of its own:
//! providers plug in through the [`Analyzer`] trait and are selected per
//! file type via the [`AnalyzerRegistry`], resolved once when a buffer
//! opens.
//!
//! The moving parts:
//!
//! - [`Orchestrator`]: the per-`(buffer, kind)` debounce/cancel/staleness
//!   state machine. Pure and clock-injected: the host drives it with
//!   `on_edit` / `on_completion_trigger` / `poll` / `on_result` from its
//!   event loop.
//! - [`AnalysisPool`]: plain worker threads executing dispatched requests,
//!   shared across all buffers.
//!
//! A typical poll-loop integration:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use textforge_analysis::{AnalysisPool, AnalyzerRegistry, Delivery, Orchestrator};
//! use textforge_core::{
//!     Edit, EngineConfig, FsDocumentStore, LexerRegistry, SessionCoordinator,
//! };
//!
//! let config = EngineConfig::default();
//! let mut session = SessionCoordinator::new(
//!     Box::new(FsDocumentStore),
//!     LexerRegistry::new(),
//!     config,
//! );
//! let registry = AnalyzerRegistry::new();
//! let mut orchestrator = Orchestrator::new(config.analysis);
//! let pool = AnalysisPool::new(config.analysis.pool_workers);
//!
//! let (buffer, view) = session.open_scratch("fn main() {}\n");
//! session.edit(view, Edit::insert(0, "x")).unwrap();
//! orchestrator.on_edit(buffer, 1, Instant::now());
//!
//! loop {
//!     let now = Instant::now();
//!     for item in orchestrator.poll(now, &session) {
//!         let file_type = session.file_type_of_buffer(item.request.buffer);
//!         if let Some(analyzer) = registry.resolve(file_type) {
//!             pool.dispatch(item, Arc::clone(&analyzer)).unwrap();
//!         }
//!     }
//!     while let Some(result) = pool.try_recv() {
//!         let current = session
//!             .buffer(result.buffer)
//!             .map(|b| b.revision())
//!             .unwrap_or_default();
//!         if let Delivery::Deliver(result) = orchestrator.on_result(result, current, now) {
//!             // hand `result` to the shell
//!             let _ = result;
//!         }
//!     }
//!     # break;
//! }
//! ```

mod analyzer;
mod orchestrator;
mod pool;

pub use analyzer::{
    AnalysisKind, AnalysisPayload, AnalysisRequest, AnalysisResult, Analyzer, AnalyzerError,
    AnalyzerRegistry, CompletionItem, LintNote, LintSeverity, SymbolEntry,
};
pub use orchestrator::{Delivery, DispatchItem, LaneHealth, Orchestrator, SnapshotSource};
pub use pool::{AnalysisPool, PoolClosed};
