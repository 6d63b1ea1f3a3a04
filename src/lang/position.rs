use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Location of a single token in a source file.
///
/// `line` and both columns are 0-based character offsets; `col_end` is
/// exclusive. The `Display` form is 1-based (`file:line:col`) for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub file: Arc<str>,
    pub line: u32,
    pub col_start: u32,
    pub col_end: u32,
}

impl Position {
    pub fn new(file: Arc<str>, line: u32, col_start: u32, col_end: u32) -> Self {
        Self {
            file,
            line,
            col_start,
            col_end,
        }
    }

    /// `(line, col_start)`, the ordering key used for breakpoint targeting.
    pub fn start(&self) -> (u32, u32) {
        (self.line, self.col_start)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line + 1, self.col_start + 1)
    }
}

/// Source extent of a word definition: from its begin marker up to the
/// column just past its terminating `;`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub file: Arc<str>,
    pub start: (u32, u32),
    pub end: (u32, u32),
}

impl Span {
    /// Start inclusive, end exclusive; `(line, col)` pairs compare
    /// lexicographically.
    pub fn contains(&self, file: &str, line: u32, col: u32) -> bool {
        &*self.file == file && self.start <= (line, col) && (line, col) < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.file,
            self.start.0 + 1,
            self.start.1 + 1,
            self.end.0 + 1,
            self.end.1 + 1
        )
    }
}
