//! `#include` flattening.
//!
//! Includes are expanded depth-first: the directive token is replaced by the
//! included file's tokens, which keep their own file name in their positions.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::lang::Position;

use super::lexer::Lexer;
use super::syntax_error::SyntaxError;
use super::token::{Spanned, Token};

/// Supplies source text by file name.
pub trait SourceReader {
    fn read_source(&self, name: &str) -> io::Result<String>;
}

/// Reads files relative to a base directory.
pub struct FsReader {
    root: PathBuf,
}

impl FsReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceReader for FsReader {
    fn read_source(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(name))
    }
}

/// In-memory file set, used by tests and by embedders that already hold
/// their sources.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    files: HashMap<String, String>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.files.insert(name.into(), source.into());
    }
}

impl SourceReader for MemoryReader {
    fn read_source(&self, name: &str) -> io::Result<String> {
        self.files.get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", name))
        })
    }
}

fn at_prefix(at: &Option<Position>) -> String {
    at.as_ref().map(|p| format!("{}: ", p)).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("{}cannot read '{path}': {source}", at_prefix(.at))]
    Unresolved {
        path: String,
        at: Option<Position>,
        source: io::Error,
    },

    #[error("{}include cycle: {}", at_prefix(.at), .chain.join(" -> "))]
    Cycle {
        chain: Vec<String>,
        at: Option<Position>,
    },

    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

/// Tokenizes `entry` and every file it includes into one flat stream.
pub fn preprocess(reader: &dyn SourceReader, entry: &str) -> Result<Vec<Spanned>, IncludeError> {
    let mut out = Vec::new();
    let mut chain = Vec::new();
    expand(reader, entry, None, &mut chain, &mut out)?;
    Ok(out)
}

fn expand(
    reader: &dyn SourceReader,
    name: &str,
    from: Option<&Position>,
    chain: &mut Vec<String>,
    out: &mut Vec<Spanned>,
) -> Result<(), IncludeError> {
    if chain.iter().any(|c| c == name) {
        let mut cycle = chain.clone();
        cycle.push(name.to_string());
        return Err(IncludeError::Cycle {
            chain: cycle,
            at: from.cloned(),
        });
    }

    let source = reader
        .read_source(name)
        .map_err(|source| IncludeError::Unresolved {
            path: name.to_string(),
            at: from.cloned(),
            source,
        })?;
    debug!(file = name, depth = chain.len(), "tokenizing source");

    let tokens = Lexer::new(name, &source).tokenize()?;
    chain.push(name.to_string());
    for t in tokens {
        match &t.token {
            Token::Directive { name: d, arg } if d == "include" => {
                let arg = arg.clone();
                expand(reader, &arg, Some(&t.pos), chain, out)?;
            }
            _ => out.push(t),
        }
    }
    chain.pop();
    Ok(())
}
