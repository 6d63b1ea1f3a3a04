use crate::lang::Position;
use thiserror::Error;

/// Tokenizer and word-tree errors. Every variant carries the offending
/// position and formats as `file:line:col: message`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    #[error("{at}: unexpected character: '{ch}'")]
    UnexpectedCharacter { ch: char, at: Position },

    #[error("{at}: comment not terminated before end of line")]
    UnterminatedComment { at: Position },

    #[error("{at}: unknown directive: #{name}")]
    UnknownDirective { name: String, at: Position },

    #[error("{at}: #include needs a file name")]
    MissingIncludePath { at: Position },

    #[error("{at}: line cannot contain both directives and non-directives")]
    MixedDirectiveLine { at: Position },

    #[error("{at}: line cannot contain more than one directive")]
    MultipleDirectives { at: Position },

    #[error("{at}: expected word name after '{marker}'")]
    ExpectedWord { marker: &'static str, at: Position },

    #[error("{at}: '{token}' is not allowed outside a word definition")]
    TopLevelOpNotAllowed { token: String, at: Position },

    #[error("{at}: definition of '{name}' is not terminated")]
    UnterminatedDefinition { name: String, at: Position },

    #[error("{at}: ';' without an open definition")]
    UnexpectedEndWord { at: Position },
}

impl SyntaxError {
    pub fn position(&self) -> &Position {
        match self {
            SyntaxError::UnexpectedCharacter { at, .. }
            | SyntaxError::UnterminatedComment { at }
            | SyntaxError::UnknownDirective { at, .. }
            | SyntaxError::MissingIncludePath { at }
            | SyntaxError::MixedDirectiveLine { at }
            | SyntaxError::MultipleDirectives { at }
            | SyntaxError::ExpectedWord { at, .. }
            | SyntaxError::TopLevelOpNotAllowed { at, .. }
            | SyntaxError::UnterminatedDefinition { at, .. }
            | SyntaxError::UnexpectedEndWord { at } => at,
        }
    }
}
