//! `textforge-highlight-simple` - Simple lexers for textforge's highlight
//! engine.
//!
//! Two flavors are provided, both implementing the core
//! [`LineLexer`] seam:
//!
//! - [`RuleLexer`]: stateless regex rules per line, intended for lightweight
//!   formats (INI/CONF/etc.) where a real grammar is unnecessary.
//! - [`ScriptLexer`]: a small scanner for script-like languages with `#`
//!   comments, quoted strings, and triple-quoted multi-line strings, the
//!   construct that exercises the engine's cross-line state convergence.

use regex::Regex;
use std::collections::HashSet;
use textforge_core::{HighlightSpan, LexState, LineLexer, TokenCategory};

/// A single regex highlighting rule.
#[derive(Debug, Clone)]
pub struct TokenRule {
    regex: Regex,
    category: TokenCategory,
    capture_group: Option<usize>,
}

impl TokenRule {
    /// Compile a rule mapping every match of `pattern` to `category`.
    pub fn new(pattern: &str, category: TokenCategory) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            category,
            capture_group: None,
        })
    }

    /// Highlight only a capture group of each match.
    ///
    /// Example (INI key):
    /// - pattern: `^\s*([^=\s]+)\s*=`
    /// - capture_group: `1` (the key)
    pub fn with_capture_group(mut self, group: usize) -> Self {
        self.capture_group = Some(group);
        self
    }
}

/// A stateless regex-rule lexer for simple formats.
///
/// Rules run per line and never carry state across lines, so the highlight
/// engine converges immediately after the edited lines.
#[derive(Debug, Clone)]
pub struct RuleLexer {
    rules: Vec<TokenRule>,
}

impl RuleLexer {
    /// Create a lexer from a rule list.
    pub fn new(rules: Vec<TokenRule>) -> Self {
        Self { rules }
    }

    /// A small default INI grammar (section, key, comment).
    pub fn ini_default() -> Result<Self, regex::Error> {
        Ok(Self::new(vec![
            TokenRule::new(r"^\s*\[([^\]]+)\]\s*$", TokenCategory::Keyword)?
                .with_capture_group(1),
            TokenRule::new(r"^\s*([^=\s]+)\s*=", TokenCategory::Identifier)?
                .with_capture_group(1),
            TokenRule::new(r"^\s*[;#].*$", TokenCategory::Comment)?,
        ]))
    }
}

impl LineLexer for RuleLexer {
    fn lex_line(&self, line: &str, _entry: LexState) -> (Vec<HighlightSpan>, LexState) {
        let mut spans = Vec::new();
        for rule in &self.rules {
            if let Some(group) = rule.capture_group {
                for caps in rule.regex.captures_iter(line) {
                    let Some(m) = caps.get(group) else {
                        continue;
                    };
                    if let Some(span) = span_from_match(line, m.start(), m.end(), rule.category) {
                        spans.push(span);
                    }
                }
            } else {
                for m in rule.regex.find_iter(line) {
                    if let Some(span) = span_from_match(line, m.start(), m.end(), rule.category) {
                        spans.push(span);
                    }
                }
            }
        }
        spans.sort_by_key(|s| (s.start, s.end));
        (spans, LexState::DEFAULT)
    }
}

fn span_from_match(
    line: &str,
    start_byte: usize,
    end_byte: usize,
    category: TokenCategory,
) -> Option<HighlightSpan> {
    if start_byte >= end_byte || end_byte > line.len() {
        return None;
    }
    let start = line[..start_byte].chars().count();
    let end = line[..end_byte].chars().count();
    (start < end).then(|| HighlightSpan::new(start, end, category))
}

/// Lexer state: inside a `"""` string.
const IN_TRIPLE_DOUBLE: LexState = LexState(1);
/// Lexer state: inside a `'''` string.
const IN_TRIPLE_SINGLE: LexState = LexState(2);

/// A scanner for Python-flavored scripts: keywords, identifiers, numbers,
/// `#` comments, quoted strings, and triple-quoted strings that span lines.
#[derive(Debug, Clone)]
pub struct ScriptLexer {
    keywords: HashSet<&'static str>,
}

impl Default for ScriptLexer {
    fn default() -> Self {
        Self::python_like()
    }
}

impl ScriptLexer {
    /// A lexer with Python's keyword set.
    pub fn python_like() -> Self {
        let keywords = [
            "and", "as", "assert", "async", "await", "break", "class", "continue", "def",
            "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
            "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise",
            "return", "try", "while", "with", "yield", "None", "True", "False",
        ];
        Self {
            keywords: keywords.into_iter().collect(),
        }
    }

    /// A lexer with a caller-supplied keyword set.
    pub fn with_keywords(keywords: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            keywords: keywords.into_iter().collect(),
        }
    }
}

fn quote_of(state: LexState) -> Option<char> {
    match state {
        IN_TRIPLE_DOUBLE => Some('"'),
        IN_TRIPLE_SINGLE => Some('\''),
        _ => None,
    }
}

fn state_of(quote: char) -> LexState {
    if quote == '"' {
        IN_TRIPLE_DOUBLE
    } else {
        IN_TRIPLE_SINGLE
    }
}

fn triple_at(chars: &[char], i: usize, quote: char) -> bool {
    chars.len() >= i + 3 && chars[i] == quote && chars[i + 1] == quote && chars[i + 2] == quote
}

fn find_triple(chars: &[char], from: usize, quote: char) -> Option<usize> {
    (from..chars.len()).find(|&i| triple_at(chars, i, quote))
}

impl LineLexer for ScriptLexer {
    fn lex_line(&self, line: &str, entry: LexState) -> (Vec<HighlightSpan>, LexState) {
        let chars: Vec<char> = line.chars().collect();
        let len = chars.len();
        let mut spans = Vec::new();
        let mut i = 0;

        // Resume inside a multi-line string from the previous line.
        if let Some(quote) = quote_of(entry) {
            match find_triple(&chars, 0, quote) {
                Some(close) => {
                    if close + 3 > 0 {
                        spans.push(HighlightSpan::new(0, close + 3, TokenCategory::Str));
                    }
                    i = close + 3;
                }
                None => {
                    if len > 0 {
                        spans.push(HighlightSpan::new(0, len, TokenCategory::Str));
                    }
                    return (spans, entry);
                }
            }
        }

        while i < len {
            let c = chars[i];

            if c == '#' {
                spans.push(HighlightSpan::new(i, len, TokenCategory::Comment));
                break;
            }

            if c == '"' || c == '\'' {
                if triple_at(&chars, i, c) {
                    match find_triple(&chars, i + 3, c) {
                        Some(close) => {
                            spans.push(HighlightSpan::new(i, close + 3, TokenCategory::Str));
                            i = close + 3;
                            continue;
                        }
                        None => {
                            spans.push(HighlightSpan::new(i, len, TokenCategory::Str));
                            return (spans, state_of(c));
                        }
                    }
                }
                // Single-line string; honor backslash escapes, and treat an
                // unterminated literal as running to end of line.
                let mut j = i + 1;
                while j < len {
                    if chars[j] == '\\' {
                        j += 2;
                        continue;
                    }
                    if chars[j] == c {
                        break;
                    }
                    j += 1;
                }
                let end = (j + 1).min(len);
                spans.push(HighlightSpan::new(i, end, TokenCategory::Str));
                i = end;
                continue;
            }

            if c.is_ascii_digit() {
                let mut j = i + 1;
                while j < len && (chars[j].is_ascii_alphanumeric() || chars[j] == '.' || chars[j] == '_')
                {
                    j += 1;
                }
                spans.push(HighlightSpan::new(i, j, TokenCategory::Number));
                i = j;
                continue;
            }

            if c.is_alphabetic() || c == '_' {
                let mut j = i + 1;
                while j < len && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                let category = if self.keywords.contains(word.as_str()) {
                    TokenCategory::Keyword
                } else {
                    TokenCategory::Identifier
                };
                spans.push(HighlightSpan::new(i, j, category));
                i = j;
                continue;
            }

            i += 1;
        }

        (spans, LexState::DEFAULT)
    }
}
