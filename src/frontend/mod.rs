//! Source text to word tree: tokenizer, `#include` flattening and the
//! word-tree builder.

pub mod include;
pub mod lexer;
pub mod parser;
pub mod syntax_error;
pub mod token;
pub mod token_dumper;

pub use include::{FsReader, IncludeError, MemoryReader, SourceReader, preprocess};
pub use lexer::Lexer;
pub use parser::Parser;
pub use syntax_error::SyntaxError;
pub use token::{Spanned, Token};

use crate::lang::Word;

/// Tokenizes and parses a single source text. `#include` is not expanded.
pub fn parse_source(file: &str, source: &str) -> Result<Word, SyntaxError> {
    let tokens = Lexer::new(file, source).tokenize()?;
    Parser::new(tokens).parse()
}
