//! Source location tracking
#![allow(dead_code)]

use serde::{Deserialize, Serialize};

/// A span represents a range in the original script source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Start line (1-based)
    pub lineno: u32,
    /// Start column (0-based)
    pub col: u32,
    /// End line (inclusive)
    pub end_lineno: u32,
    /// End column (exclusive)
    pub end_col: u32,
}

impl Span {
    /// Create a new span
    pub fn new(lineno: u32, col: u32, end_lineno: u32, end_col: u32) -> Self {
        Self { lineno, col, end_lineno, end_col }
    }

    /// Create a dummy span (for testing)
    pub fn dummy() -> Self {
        Self { lineno: 0, col: 0, end_lineno: 0, end_col: 0 }
    }

    /// Merge two spans
    pub fn merge(&self, other: &Span) -> Span {
        let (lineno, col) = (self.lineno, self.col).min((other.lineno, other.col));
        let (end_lineno, end_col) = (self.end_lineno, self.end_col).max((other.end_lineno, other.end_col));
        Span { lineno, col, end_lineno, end_col }
    }

    /// Check if the span covers a single line
    pub fn is_single_line(&self) -> bool {
        self.lineno == self.end_lineno
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_spans() {
        let a = Span::new(3, 4, 3, 10);
        let b = Span::new(2, 8, 5, 1);
        let merged = a.merge(&b);
        assert_eq!(merged, Span::new(2, 8, 5, 1));
        assert!(!merged.is_single_line());
        assert!(a.is_single_line());
    }
}
