//! Source locations carried by AST nodes and diagnostics.

use std::fmt;
use std::sync::Arc;

/// A half-open region of a source file, with 1-based lines and columns.
///
/// The file path is shared via `Arc` so that every node of a parsed module
/// can carry its location without cloning the path string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSpan {
    pub path: Arc<str>,
    pub first_line: u32,
    pub last_line: u32,
    pub first_col: u32,
    pub last_col: u32,
}

impl SourceSpan {
    pub fn new(path: Arc<str>, first_line: u32, first_col: u32, last_line: u32, last_col: u32) -> Self {
        Self {
            path,
            first_line,
            last_line,
            first_col,
            last_col,
        }
    }

    /// A zero-width span at the start of a file. Used for module-level
    /// diagnostics that have no better anchor.
    pub fn file_start(path: impl Into<Arc<str>>) -> Self {
        Self {
            path: path.into(),
            first_line: 1,
            last_line: 1,
            first_col: 1,
            last_col: 1,
        }
    }

    /// Extend this span to also cover `other`.
    pub fn to(&self, other: &SourceSpan) -> SourceSpan {
        SourceSpan {
            path: self.path.clone(),
            first_line: self.first_line,
            first_col: self.first_col,
            last_line: other.last_line,
            last_col: other.last_col,
        }
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.first_line, self.first_col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_display_is_path_line_col() {
        let span = SourceSpan::new("app.jac".into(), 3, 7, 3, 12);
        assert_eq!(span.to_string(), "app.jac:3:7");
    }

    #[test]
    fn span_join_covers_both() {
        let a = SourceSpan::new("app.jac".into(), 1, 1, 1, 4);
        let b = SourceSpan::new("app.jac".into(), 2, 1, 2, 9);
        let joined = a.to(&b);
        assert_eq!(joined.first_line, 1);
        assert_eq!(joined.last_line, 2);
        assert_eq!(joined.last_col, 9);
    }
}
