use crate::lang::{Position, WordKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Any `[A-Za-z_][A-Za-z0-9_]*` spelling. Builtin vs. user word is
    /// decided by the parser.
    Word(String),
    Number(f64),
    /// One of the catalog's one-character operators.
    Op(char),
    /// `\name` or `` `name ``
    WordIndex(String),
    /// `:`, `:@` or `:=`; the word name follows as a separate token.
    BeginWord(WordKind),
    /// `;`
    EndWord,
    /// `#name arg`
    Directive { name: String, arg: String },
    /// `( ... )`
    Comment,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w),
            Token::Number(n) => write!(f, "{}", n),
            Token::Op(c) => write!(f, "{}", c),
            Token::WordIndex(w) => write!(f, "\\{}", w),
            Token::BeginWord(kind) => write!(f, "{}", kind.marker()),
            Token::EndWord => write!(f, ";"),
            Token::Directive { name, arg } => write!(f, "#{} {}", name, arg),
            Token::Comment => write!(f, "(...)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: Position,
}
