use thiserror::Error;

use super::link_error::LinkError;

/// Errors raised while encoding a [`Program`] or checking one decoded from
/// bytes.
///
/// [`Program`]: super::ir::Program
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to encode program: {0}")]
    Encode(#[source] postcard::Error),

    #[error("failed to decode program: {0}")]
    Decode(#[source] postcard::Error),

    #[error("bad opcode map: {reason}")]
    OpcodeMap { reason: &'static str },

    #[error("{word}:{op}: opcode {opcode} is not in the opcode map")]
    UnknownOpcode { word: usize, op: usize, opcode: u16 },

    #[error("{word}:{op}: operand does not fit '{mnemonic}'")]
    BadOperand {
        word: usize,
        op: usize,
        mnemonic: &'static str,
    },

    #[error("word {word} has {instrs} instructions but {positions} positions")]
    PositionCount {
        word: usize,
        instrs: usize,
        positions: usize,
    },

    #[error("export '{path}' refers to word {index} but the program has {words}")]
    DanglingExport {
        path: String,
        index: usize,
        words: usize,
    },

    /// Control structure or catalog order the linker would have rejected.
    #[error("invalid program: {0}")]
    Structure(#[from] LinkError),
}
