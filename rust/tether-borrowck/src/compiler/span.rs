use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of a syntax node, as assigned by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the start in the source
    pub start: usize,
    /// Byte offset of the end (exclusive) in the source
    pub end: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { start, end, line, col }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0, line: 0, col: 0 }
    }

    /// A span that only knows its line. Used by tree builders in tests and benches.
    pub fn line(line: usize) -> Self {
        Self { start: 0, end: 0, line, col: 1 }
    }

    /// Byte range is known (not a line-only span).
    pub fn has_offsets(&self) -> bool {
        self.end > self.start
    }

    /// One span lies inside the other. Line-only spans compare by line.
    pub fn overlaps(&self, other: &Span) -> bool {
        if self.has_offsets() && other.has_offsets() {
            let inside = |a: &Span, b: &Span| a.start <= b.start && b.end <= a.end;
            inside(self, other) || inside(other, self)
        } else {
            self.line == other.line
        }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
            col: if self.line <= other.line { self.col } else { other.col },
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
