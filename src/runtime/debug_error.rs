use thiserror::Error;

use super::state::ProgramCounter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    #[error("no export with index {0}")]
    NoSuchExport(usize),

    /// `line` and `col` are 0-based; displayed 1-based.
    #[error("no compiled word contains {file}:{}:{}", .line + 1, .col + 1)]
    NoWordAt { file: String, line: u32, col: u32 },

    #[error("breakpoint already set at {0}")]
    BreakpointAlreadySet(ProgramCounter),

    #[error("no breakpoint at {0}")]
    NoBreakpoint(ProgramCounter),

    #[error("program counter {0} is outside the program")]
    InvalidProgramCounter(ProgramCounter),

    #[error("debug session has not been started")]
    NotStarted,
}
