//! Document persistence seam.
//!
//! The engine never touches encodings: a [`DocumentStore`] collaborator
//! hands it decoded, LF-normalized text on load and re-encodes on save.
//! [`FsDocumentStore`] is the plain-UTF-8 filesystem implementation; shells
//! with charset detection provide their own.

use crate::line_ending::LineEnding;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Persistence errors. A failed save leaves the buffer state untouched.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading the file failed.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Writing the file failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// The file being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A document as loaded: decoded text plus the line ending to restore at
/// save time.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// LF-normalized text.
    pub text: String,
    /// The line ending detected in the source bytes.
    pub line_ending: LineEnding,
}

/// Load/save collaborator. Implementations own encoding and line-ending
/// conversion; the engine only ever sees LF-normalized text.
pub trait DocumentStore {
    /// Load and decode a document.
    fn load(&self, path: &Path) -> Result<LoadedDocument, PersistenceError>;

    /// Encode and write a document, returning the number of bytes written.
    fn save(
        &self,
        path: &Path,
        text: &str,
        line_ending: LineEnding,
    ) -> Result<usize, PersistenceError>;
}

/// UTF-8 filesystem store with CRLF normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDocumentStore;

impl DocumentStore for FsDocumentStore {
    fn load(&self, path: &Path) -> Result<LoadedDocument, PersistenceError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(LoadedDocument {
            line_ending: LineEnding::detect(&raw),
            text: LineEnding::normalize(&raw),
        })
    }

    fn save(
        &self,
        path: &Path,
        text: &str,
        line_ending: LineEnding,
    ) -> Result<usize, PersistenceError> {
        let encoded = line_ending.apply(text);
        std::fs::write(path, encoded.as_bytes()).map_err(|source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(encoded.len())
    }
}
