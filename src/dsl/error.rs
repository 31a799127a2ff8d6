//! Error types for the DSL front end.
//!
//! A [`SyntaxError`] is fatal to one parse attempt. It carries a 0-based
//! source position and, when built through [`SyntaxError::with_excerpt`], a
//! bounded source excerpt with a caret pointing at the offending column.
//! The rendered shape is part of the contract consumed by editor tooling.

use std::fmt;

/// Maximum width of the excerpt window shown under a parse error.
const MAX_CONTEXT_LEN: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    ScanError,
    ParseError,
}

/// An error raised while scanning or parsing a source buffer.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub kind: ErrorKind,
    excerpt: Option<String>,
}

impl SyntaxError {
    pub fn scan(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            kind: ErrorKind::ScanError,
            excerpt: None,
        }
    }

    pub fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            kind: ErrorKind::ParseError,
            excerpt: None,
        }
    }

    /// Attach a caret-annotated excerpt of the offending source line.
    pub fn with_excerpt(mut self, source: &str) -> Self {
        self.excerpt = excerpt_at(source, self.line, self.column);
        self
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ErrorKind::ScanError => "ScanError",
            ErrorKind::ParseError => "ParseError",
        };
        write!(
            f,
            "{}: {}\n    at line {}, column {}",
            label,
            self.message,
            self.line + 1,
            self.column
        )?;
        if let Some(excerpt) = &self.excerpt {
            write!(f, "\n{excerpt}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

/// Build a two-line excerpt: a window of the source line, and a caret under
/// the error column. Lines longer than [`MAX_CONTEXT_LEN`] are windowed
/// around the error position.
fn excerpt_at(source: &str, line: usize, column: usize) -> Option<String> {
    let context: Vec<char> = source.lines().nth(line)?.chars().collect();
    let half = MAX_CONTEXT_LEN / 2;

    let (start, window): (usize, String) = if context.len() > MAX_CONTEXT_LEN {
        let start = column.saturating_sub(half).min(context.len() - MAX_CONTEXT_LEN);
        let end = (start + MAX_CONTEXT_LEN).min(context.len());
        (start, context[start..end].iter().collect())
    } else {
        (0, context.iter().collect())
    };

    let pointer = " ".repeat(column.saturating_sub(start)) + "^";
    Some(format!("    {window}\n    {pointer}"))
}

/// Receives errors raised at the parse boundary. Injected into the player so
/// a failed re-parse during live playback is surfaced without interrupting
/// the scheduling loop.
pub trait ErrorReporter {
    fn report(&mut self, error: &SyntaxError);
}

/// Default reporter: routes errors to the `log` facade.
#[derive(Debug, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&mut self, error: &SyntaxError) {
        log::error!("{error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position() {
        let err = SyntaxError::parse("unexpected token", 2, 5);
        let text = err.to_string();
        assert!(text.contains("line 3, column 5"), "{text}");
        assert!(text.starts_with("ParseError"));
    }

    #[test]
    fn excerpt_points_at_column() {
        let source = "a = [\nb = oops here\n]";
        let err = SyntaxError::parse("bad", 1, 4).with_excerpt(source);
        let text = err.to_string();
        assert!(text.contains("b = oops here"));
        let caret_line = text.lines().last().unwrap();
        assert_eq!(caret_line.trim_end(), "        ^");
    }

    #[test]
    fn excerpt_windows_long_lines() {
        let long = "x = ".to_string() + &"abcdefghij".repeat(10);
        let err = SyntaxError::parse("bad", 0, 50).with_excerpt(&long);
        let text = err.to_string();
        let window_line = text.lines().nth(2).unwrap().trim();
        assert_eq!(window_line.chars().count(), 30);
    }

    #[test]
    fn excerpt_missing_line_is_none() {
        let err = SyntaxError::parse("bad", 9, 0).with_excerpt("one line");
        assert!(err.excerpt.is_none());
    }
}
