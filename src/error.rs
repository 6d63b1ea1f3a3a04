//! Crate-level error type.

use thiserror::Error;

use crate::bytecode::{LinkError, LoadError};
use crate::frontend::{IncludeError, SyntaxError};
use crate::runtime::{DebugError, MarkerError, PersistError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("include error: {0}")]
    Include(IncludeError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("debug error: {0}")]
    Debug(#[from] DebugError),

    #[error("breakpoint marker error: {0}")]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl From<IncludeError> for Error {
    /// Syntax errors found while tokenizing an included file are reported
    /// as syntax errors.
    fn from(e: IncludeError) -> Self {
        match e {
            IncludeError::Syntax(s) => Error::Syntax(s),
            other => Error::Include(other),
        }
    }
}
