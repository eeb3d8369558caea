//! Line ending helpers.
//!
//! `textforge-core` stores buffer text using LF (`'\n'`) newlines. Files that
//! use CRLF (`"\r\n"`) are normalized on load; the preferred line ending is
//! tracked per buffer and re-applied when saving.

/// The preferred newline sequence used when saving a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// Unix-style LF (`'\n'`).
    Lf,
    /// Windows-style CRLF (`"\r\n"`).
    Crlf,
}

impl LineEnding {
    /// Detect the dominant line ending from a source text.
    ///
    /// Policy: if the input contains any CRLF (`"\r\n"`), returns
    /// [`LineEnding::Crlf`], otherwise [`LineEnding::Lf`].
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            Self::Crlf
        } else {
            Self::Lf
        }
    }

    /// Normalize a source text to LF newlines for in-memory storage.
    pub fn normalize(text: &str) -> String {
        if text.contains('\r') {
            text.replace("\r\n", "\n")
        } else {
            text.to_string()
        }
    }

    /// Convert an LF-normalized text to this line ending for saving.
    pub fn apply(self, text: &str) -> String {
        match self {
            Self::Lf => text.to_string(),
            Self::Crlf => text.replace('\n', "\r\n"),
        }
    }
}
