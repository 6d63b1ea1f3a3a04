use crate::lang::Position;
use thiserror::Error;

fn at_prefix(at: &Option<Position>) -> String {
    at.as_ref().map(|p| format!("{}: ", p)).unwrap_or_default()
}

/// Errors raised while tracing and linking a word tree into a [`Program`].
///
/// [`Program`]: super::ir::Program
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("{at}: word not found in scope: {name}")]
    WordNotFoundInScope { name: String, at: Position },

    /// A library-backed builtin whose backing word is not defined, or a
    /// reference that escaped resolution.
    #[error("{}could not resolve word: {name}", at_prefix(.at))]
    UnresolvedWord { name: String, at: Option<Position> },

    /// Internal consistency guard between the catalog and the dispatch
    /// builder.
    #[error("catalog order violated: section '{section}' needs catalog index {index}")]
    IsaOrderViolation { section: String, index: usize },

    #[error("{at}: inline word '{name}' sits inside a table run")]
    InlineOfTableWord { name: String, at: Position },

    #[error("{at}: cannot take the address of '{name}': not a table word")]
    TopLevelAddressOfNonTableWord { name: String, at: Position },

    #[error("{at}: inline word '{name}' expands into itself")]
    RecursiveInline { name: String, at: Position },

    #[error("{at}: '{op}' is only available in debug builds")]
    DebugOpInRelease { op: String, at: Position },

    #[error("{at}: {reason}")]
    UnbalancedConditional { reason: &'static str, at: Position },

    /// `times`/`loop` or `do`/`while` missing a partner, or crossing another
    /// control structure.
    #[error("{at}: {reason}")]
    UnbalancedLoop { reason: &'static str, at: Position },
}
