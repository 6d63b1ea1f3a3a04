//! `(UBRK<n>)` markers.
//!
//! Test sources mark breakpoint locations inline. The markers are comments
//! to the tokenizer, but they are stripped before compiling so they cannot
//! shift any column after them; each marker records the 0-based line and
//! column of its `(`.

use std::collections::BTreeMap;

use thiserror::Error;

const OPEN: &str = "(UBRK";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerError {
    /// 1-based in the message.
    #[error("{}:{}: malformed breakpoint marker", .line + 1, .col + 1)]
    Malformed { line: u32, col: u32 },

    #[error("{}:{}: breakpoint marker {id} used twice", .line + 1, .col + 1)]
    Duplicate { id: u32, line: u32, col: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedSource {
    pub source: String,
    /// Marker id to `(line, col)`.
    pub markers: BTreeMap<u32, (u32, u32)>,
}

impl MarkedSource {
    pub fn marker(&self, id: u32) -> Option<(u32, u32)> {
        self.markers.get(&id).copied()
    }
}

pub fn strip_breakpoint_markers(src: &str) -> Result<MarkedSource, MarkerError> {
    let mut source = String::with_capacity(src.len());
    let mut markers = BTreeMap::new();

    for (line_no, line) in src.split_inclusive('\n').enumerate() {
        let line_no = line_no as u32;
        let mut rest = line;
        let mut col = 0u32;
        while let Some(at) = rest.find(OPEN) {
            let (before, from) = rest.split_at(at);
            source.push_str(before);
            col += before.chars().count() as u32;

            let after = &from[OPEN.len()..];
            let digits = after.len() - after.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            let id = after[..digits].parse::<u32>().ok();
            let closed = after[digits..].starts_with(')');
            let Some(id) = id.filter(|_| closed) else {
                return Err(MarkerError::Malformed { line: line_no, col });
            };
            if markers.insert(id, (line_no, col)).is_some() {
                return Err(MarkerError::Duplicate {
                    id,
                    line: line_no,
                    col,
                });
            }
            rest = &after[digits + 1..];
        }
        source.push_str(rest);
    }

    Ok(MarkedSource { source, markers })
}
