use std::fmt;
use thiserror::Error;

/// Recoverable faults raised by a running program, surfaced as
/// [`HaltingReason::Exception`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmException {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow (limit {limit})")]
    StackOverflow { limit: usize },

    #[error("return stack overflow (limit {limit})")]
    ReturnStackOverflow { limit: usize },

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: f64, len: usize },

    #[error("invalid global index {0}")]
    InvalidGlobal(f64),

    #[error("invalid call target {0}")]
    InvalidCallTarget(f64),

    #[error("loop control word without an active loop")]
    MissingLoopFrame,

    #[error("array is empty")]
    EmptyArray,

    #[error("too many arrays (limit {limit})")]
    ArrayLimit { limit: usize },
}

/// Why [`Machine::run`](super::Machine::run) returned.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltingReason {
    /// Returned from the outermost word.
    End,
    /// Cycle budget exhausted.
    OutOfGas,
    /// A `brk` op executed, or a persistent breakpoint fired before its
    /// instruction.
    Brk,
    /// `assert` popped a falsy value.
    Assert,
    /// Reached the temporary breakpoint passed to `run`.
    UsrBrk,
    Exception(VmException),
}

impl HaltingReason {
    /// `End`, `OutOfGas`, `Brk` and `UsrBrk` can be continued from.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            HaltingReason::End | HaltingReason::OutOfGas | HaltingReason::Brk | HaltingReason::UsrBrk
        )
    }
}

impl fmt::Display for HaltingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltingReason::End => write!(f, "end"),
            HaltingReason::OutOfGas => write!(f, "outofgas"),
            HaltingReason::Brk => write!(f, "brk"),
            HaltingReason::Assert => write!(f, "assert"),
            HaltingReason::UsrBrk => write!(f, "usrbrk"),
            HaltingReason::Exception(e) => write!(f, "exception: {}", e),
        }
    }
}
