//! Workspace and single-file search.
//!
//! Queries are compiled once (literal text is escaped and compiled into a
//! regex, like the single representation the find/replace UI needs) and an
//! invalid pattern fails synchronously, before any file is scanned. Matching
//! then streams: results are pushed to the caller as they are found, so a
//! shell can display them progressively and cancel mid-scan. Cancellation is
//! cooperative (the token is checked between files and every few hundred
//! lines inside a file), and a cancelled search never mutates any buffer.
//!
//! Search reads an externally supplied [`FileIndex`] (ignore rules are that
//! collaborator's concern) and prefers live buffer text over disk content
//! through [`LiveTextOverlay`], so unsaved changes are searched.
//!
//! Replace-all is modeled as a [`ReplacePlan`] built from the match set; the
//! session coordinator applies it file by file as single-undo-step buffer
//! transactions, revalidating every match first (see
//! [`crate::SessionCoordinator::apply_replace_plan`]).

use crate::cancel::CancelToken;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use thiserror::Error;

/// What a query scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// One file (or open buffer) identified by path.
    SingleFile(PathBuf),
    /// Every file the workspace index enumerates.
    Workspace,
}

/// A search query as entered by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// The pattern: literal text, or a regex when `is_regex` is set.
    pub pattern: String,
    /// Treat `pattern` as a regular expression.
    pub is_regex: bool,
    /// Case-sensitive matching.
    pub case_sensitive: bool,
    /// Match only whole words (ASCII-alphanumeric and `_` boundaries).
    pub whole_word: bool,
    /// What to scan.
    pub scope: SearchScope,
}

impl SearchQuery {
    /// A case-sensitive literal workspace query.
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_regex: false,
            case_sensitive: true,
            whole_word: false,
            scope: SearchScope::Workspace,
        }
    }

    /// A regex workspace query.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            is_regex: true,
            ..Self::literal(pattern)
        }
    }

    /// Restrict the query to a single file.
    pub fn in_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.scope = SearchScope::SingleFile(path.into());
        self
    }
}

/// One match, expressed as user-facing coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    /// The file the match was found in; `None` for pathless scratch text.
    pub path: Option<PathBuf>,
    /// 1-based line number (search results are display rows; buffer APIs
    /// stay 0-based).
    pub line: usize,
    /// Half-open character-column range within the line (0-based).
    pub columns: Range<usize>,
    /// The matched text.
    pub text: String,
    /// The full line the match occurred on, for context display.
    pub context: String,
}

/// Search errors. Raised before any scanning starts.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The pattern failed to compile.
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Progress events streamed by a running search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    /// A match was found.
    Match(SearchMatch),
    /// A file could not be read and was skipped.
    FileSkipped {
        /// The unreadable file.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },
    /// The search ended; no further events follow.
    Finished {
        /// `true` when the search was cancelled rather than exhausted.
        cancelled: bool,
    },
}

/// Enumerates workspace files, applying whatever ignore rules the
/// surrounding project model defines. Supplied by the shell.
pub trait FileIndex {
    /// The files to scan, in scan order.
    fn files(&self) -> Vec<PathBuf>;
}

/// Supplies live text for files whose open buffers differ from disk, so
/// search sees unsaved changes. The session coordinator implements this.
pub trait LiveTextOverlay {
    /// Current in-memory text for `path`, or `None` to read from disk.
    fn live_text(&self, path: &Path) -> Option<String>;
}

/// An overlay that never intercepts; every file is read from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverlay;

impl LiveTextOverlay for NoOverlay {
    fn live_text(&self, _path: &Path) -> Option<String> {
        None
    }
}

/// A compiled query, shared by literal and regex modes.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    regex: Regex,
    whole_word: bool,
}

/// Lines scanned between cancellation checks inside one file.
const CANCEL_CHECK_LINES: usize = 256;

fn is_word_char(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}

impl CompiledQuery {
    /// Compile a query. Invalid regex patterns fail here, synchronously,
    /// with the underlying error message.
    pub fn compile(query: &SearchQuery) -> Result<Self, SearchError> {
        let pattern = if query.is_regex {
            query.pattern.clone()
        } else {
            regex::escape(&query.pattern)
        };

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(!query.case_sensitive)
            .build()?;

        Ok(Self {
            regex,
            whole_word: query.whole_word,
        })
    }

    /// Scan `text` line by line, pushing each match into `sink`.
    ///
    /// Returns `false` if the token was cancelled mid-scan (the sink sees no
    /// further matches), `true` when the text was exhausted. Patterns match
    /// within single lines; `\n` never participates in a match.
    pub fn search_text(
        &self,
        text: &str,
        path: Option<&Path>,
        token: &CancelToken,
        sink: &mut dyn FnMut(SearchMatch),
    ) -> bool {
        for (index, line) in text.lines().enumerate() {
            if index % CANCEL_CHECK_LINES == 0 && token.is_cancelled() {
                return false;
            }

            for found in self.regex.find_iter(line) {
                if found.start() == found.end() {
                    continue;
                }
                let start_col = line[..found.start()].chars().count();
                let end_col = start_col + found.as_str().chars().count();

                if self.whole_word {
                    let before = line[..found.start()].chars().next_back();
                    let after = line[found.end()..].chars().next();
                    if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
                        continue;
                    }
                }

                sink(SearchMatch {
                    path: path.map(Path::to_path_buf),
                    line: index + 1,
                    columns: start_col..end_col,
                    text: found.as_str().to_string(),
                    context: line.to_string(),
                });
            }
        }
        true
    }
}

/// Run a query to completion (or cancellation), streaming events into
/// `on_event`.
///
/// Compilation errors surface before any file is read. Unreadable files are
/// skipped with a [`SearchEvent::FileSkipped`] and never abort the scan.
pub fn run_search(
    query: &SearchQuery,
    index: &dyn FileIndex,
    overlay: &dyn LiveTextOverlay,
    token: &CancelToken,
    on_event: &mut dyn FnMut(SearchEvent),
) -> Result<(), SearchError> {
    let compiled = CompiledQuery::compile(query)?;

    let files = match &query.scope {
        SearchScope::SingleFile(path) => vec![path.clone()],
        SearchScope::Workspace => index.files(),
    };

    for path in files {
        if token.is_cancelled() {
            on_event(SearchEvent::Finished { cancelled: true });
            return Ok(());
        }

        let text = match overlay.live_text(&path) {
            Some(live) => live,
            None => match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(err) => {
                    log::debug!("skipping unreadable file {}: {err}", path.display());
                    on_event(SearchEvent::FileSkipped {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            },
        };

        let completed = compiled.search_text(&text, Some(&path), token, &mut |m| {
            on_event(SearchEvent::Match(m));
        });
        if !completed {
            on_event(SearchEvent::Finished { cancelled: true });
            return Ok(());
        }
    }

    on_event(SearchEvent::Finished { cancelled: false });
    Ok(())
}

/// Spawn a query on a background thread, returning the event stream.
///
/// The pattern is compiled (and rejected) synchronously before the thread
/// starts. Dropping the receiver cancels the search at its next check.
pub fn spawn_search(
    query: SearchQuery,
    index: Arc<dyn FileIndex + Send + Sync>,
    overlay: Arc<dyn LiveTextOverlay + Send + Sync>,
    token: CancelToken,
) -> Result<mpsc::Receiver<SearchEvent>, SearchError> {
    // Fail fast on a bad pattern; the thread recompiles the validated query.
    CompiledQuery::compile(&query)?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = run_search(&query, index.as_ref(), overlay.as_ref(), &token, &mut |event| {
            if tx.send(event).is_err() {
                // Receiver gone: nobody wants these results anymore.
                token.cancel();
            }
        });
        debug_assert!(result.is_ok(), "pattern was validated before spawning");
    });
    Ok(rx)
}

/// Last-query-wins controller: beginning a new search cancels and supersedes
/// the running one.
#[derive(Debug, Default)]
pub struct SearchSession {
    active: Option<CancelToken>,
}

impl SearchSession {
    /// Create a session with no active search.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any running search and hand out the token for the next one.
    pub fn begin(&mut self) -> CancelToken {
        if let Some(previous) = self.active.take() {
            previous.cancel();
        }
        let token = CancelToken::new();
        self.active = Some(token.clone());
        token
    }

    /// Cancel the active search, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
    }
}

/// The replacements planned for one file, ordered by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReplaceBatch {
    /// Target file.
    pub path: PathBuf,
    /// Matches to replace, sorted by (line, column).
    pub matches: Vec<SearchMatch>,
}

/// A replace-all staged from a completed match set.
///
/// The plan itself mutates nothing; applying it goes through the session
/// coordinator's single-writer edit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacePlan {
    /// The replacement text.
    pub replacement: String,
    /// Per-file batches in deterministic path order.
    pub files: Vec<FileReplaceBatch>,
}

impl ReplacePlan {
    /// Group a match set by file. Pathless matches cannot be addressed by a
    /// workspace replace and are dropped with a warning.
    pub fn build(
        matches: impl IntoIterator<Item = SearchMatch>,
        replacement: impl Into<String>,
    ) -> Self {
        let mut by_path: BTreeMap<PathBuf, Vec<SearchMatch>> = BTreeMap::new();
        for m in matches {
            match m.path.clone() {
                Some(path) => by_path.entry(path).or_default().push(m),
                None => log::warn!("dropping pathless match from replace plan: {:?}", m.text),
            }
        }

        let files = by_path
            .into_iter()
            .map(|(path, mut matches)| {
                matches.sort_by_key(|m| (m.line, m.columns.start));
                FileReplaceBatch { path, matches }
            })
            .collect();

        Self {
            replacement: replacement.into(),
            files,
        }
    }

    /// Total number of matches across all files.
    pub fn match_count(&self) -> usize {
        self.files.iter().map(|f| f.matches.len()).sum()
    }
}

/// A file whose content changed between search and replace; its batch was
/// skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("replace conflict in {}: {reason}", path.display())]
pub struct ReplaceConflict {
    /// The conflicting file.
    pub path: PathBuf,
    /// What no longer lined up.
    pub reason: String,
}

/// Batch summary of a replace-all application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    /// `(path, replacement count)` per successfully replaced file.
    pub replaced: Vec<(PathBuf, usize)>,
    /// Files skipped because their content changed concurrently.
    pub conflicts: Vec<ReplaceConflict>,
    /// `true` when cancellation stopped the batch before all files were
    /// attempted. Files already replaced stay replaced.
    pub cancelled: bool,
}

impl ReplaceReport {
    /// Total replacements applied.
    pub fn total_replacements(&self) -> usize {
        self.replaced.iter().map(|(_, n)| n).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(results: &mut Vec<SearchMatch>) -> impl FnMut(SearchMatch) + '_ {
        |m| results.push(m)
    }

    #[test]
    fn test_literal_match_positions() {
        let query = SearchQuery::literal("bar");
        let compiled = CompiledQuery::compile(&query).unwrap();

        let mut results = Vec::new();
        let done = compiled.search_text(
            "foo bar\nbar = 2\n",
            None,
            &CancelToken::new(),
            &mut sink(&mut results),
        );

        assert!(done);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].line, 1);
        assert_eq!(results[0].columns, 4..7);
        assert_eq!(results[1].line, 2);
        assert_eq!(results[1].columns, 0..3);
        assert_eq!(results[1].context, "bar = 2");
    }

    #[test]
    fn test_literal_mode_escapes_metacharacters() {
        let query = SearchQuery::literal("a.b");
        let compiled = CompiledQuery::compile(&query).unwrap();

        let mut results = Vec::new();
        compiled.search_text("a.b axb\n", None, &CancelToken::new(), &mut sink(&mut results));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].columns, 0..3);
    }

    #[test]
    fn test_case_insensitive_and_regex_modes() {
        let mut query = SearchQuery::regex(r"ba[rz]");
        query.case_sensitive = false;
        let compiled = CompiledQuery::compile(&query).unwrap();

        let mut results = Vec::new();
        compiled.search_text("BAR baz\n", None, &CancelToken::new(), &mut sink(&mut results));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_whole_word_filter() {
        let mut query = SearchQuery::literal("bar");
        query.whole_word = true;
        let compiled = CompiledQuery::compile(&query).unwrap();

        let mut results = Vec::new();
        compiled.search_text(
            "bar rebar bars bar\n",
            None,
            &CancelToken::new(),
            &mut sink(&mut results),
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].columns, 0..3);
        assert_eq!(results[1].columns, 15..18);
    }

    #[test]
    fn test_invalid_regex_fails_before_scanning() {
        let query = SearchQuery::regex("(unclosed");
        let err = CompiledQuery::compile(&query).unwrap_err();
        assert!(matches!(err, SearchError::InvalidPattern(_)));
        assert!(err.to_string().contains("invalid search pattern"));
    }

    #[test]
    fn test_unicode_columns_are_characters() {
        let query = SearchQuery::literal("où");
        let compiled = CompiledQuery::compile(&query).unwrap();

        let mut results = Vec::new();
        compiled.search_text("déjà où\n", None, &CancelToken::new(), &mut sink(&mut results));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].columns, 5..7);
    }

    #[test]
    fn test_cancelled_token_stops_immediately() {
        let query = SearchQuery::literal("x");
        let compiled = CompiledQuery::compile(&query).unwrap();
        let token = CancelToken::new();
        token.cancel();

        let mut results = Vec::new();
        let done = compiled.search_text("x x x\n", None, &token, &mut sink(&mut results));
        assert!(!done);
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_session_supersedes_previous_query() {
        let mut session = SearchSession::new();
        let first = session.begin();
        assert!(!first.is_cancelled());

        let second = session.begin();
        assert!(first.is_cancelled(), "last query wins");
        assert!(!second.is_cancelled());

        session.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_replace_plan_groups_and_sorts_by_file() {
        let m = |path: &str, line: usize, col: usize| SearchMatch {
            path: Some(PathBuf::from(path)),
            line,
            columns: col..col + 3,
            text: "bar".to_string(),
            context: String::new(),
        };

        let plan = ReplacePlan::build(
            vec![m("b.txt", 2, 0), m("a.txt", 1, 4), m("b.txt", 1, 8)],
            "baz",
        );

        assert_eq!(plan.match_count(), 3);
        assert_eq!(plan.files.len(), 2);
        assert_eq!(plan.files[0].path, PathBuf::from("a.txt"));
        assert_eq!(plan.files[1].path, PathBuf::from("b.txt"));
        assert_eq!(
            plan.files[1].matches.iter().map(|m| m.line).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_replace_plan_drops_pathless_matches() {
        let plan = ReplacePlan::build(
            vec![SearchMatch {
                path: None,
                line: 1,
                columns: 0..1,
                text: "x".to_string(),
                context: String::new(),
            }],
            "y",
        );
        assert_eq!(plan.match_count(), 0);
    }
}
