use crate::bytecode::isa::Isa;
use crate::lang::{Op, OpKind, Position, Span, Word, WordKind};

use super::syntax_error::SyntaxError;
use super::token::{Spanned, Token};

/// Builds the word tree from a flattened token stream.
///
/// Begin/end markers push and pop a lexical scope; every other token inside
/// a definition becomes an [`Op`]. Names are left unresolved: a word
/// spelling is classified only as catalog builtin or user call.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    serial: u32,
    isa: &'static Isa,
}

impl Parser {
    /// Comments are dropped here; directives must already be expanded.
    pub fn new(tokens: Vec<Spanned>) -> Self {
        let tokens = tokens
            .into_iter()
            .filter(|t| t.token != Token::Comment)
            .collect();
        Parser {
            tokens,
            pos: 0,
            serial: 0,
            isa: Isa::get(),
        }
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// Parses the whole stream into the unnamed root word.
    pub fn parse(&mut self) -> Result<Word, SyntaxError> {
        let mut root = Word::root();

        while let Some(Spanned { token, pos }) = self.advance() {
            match token {
                Token::BeginWord(kind) => {
                    let word = self.parse_definition(kind, pos)?;
                    root.children.push(word);
                }
                Token::EndWord => return Err(SyntaxError::UnexpectedEndWord { at: pos }),
                Token::Directive { name, .. } => {
                    return Err(SyntaxError::UnknownDirective { name, at: pos });
                }
                other => {
                    return Err(SyntaxError::TopLevelOpNotAllowed {
                        token: other.to_string(),
                        at: pos,
                    });
                }
            }
        }

        Ok(root)
    }

    /// Parses `<marker> name ... ;`. The begin marker has been consumed.
    fn parse_definition(&mut self, kind: WordKind, begin: Position) -> Result<Word, SyntaxError> {
        self.serial += 1;
        let serial = self.serial;

        let name = match self.advance() {
            Some(Spanned {
                token: Token::Word(name),
                ..
            }) => name,
            _ => {
                return Err(SyntaxError::ExpectedWord {
                    marker: kind.marker(),
                    at: begin,
                });
            }
        };

        let mut word = Word {
            name: Some(name),
            kind,
            ops: Vec::new(),
            children: Vec::new(),
            serial,
            span: None,
        };

        loop {
            let Some(Spanned { token, pos }) = self.advance() else {
                return Err(SyntaxError::UnterminatedDefinition {
                    name: word.name().to_string(),
                    at: begin,
                });
            };

            let op = match token {
                Token::BeginWord(kind) => {
                    let child = self.parse_definition(kind, pos)?;
                    word.children.push(child);
                    continue;
                }
                Token::EndWord => {
                    word.span = Some(Span {
                        file: begin.file.clone(),
                        start: begin.start(),
                        end: (pos.line, pos.col_end),
                    });
                    return Ok(word);
                }
                Token::Word(w) => match self.isa.lookup_word(&w) {
                    Some(i) => OpKind::Builtin(i),
                    None => OpKind::Call(w),
                },
                Token::Number(n) => OpKind::PushNumber(n),
                Token::Op(c) => match self.isa.lookup_op1(c) {
                    Some(i) => OpKind::OneCharOp(i),
                    None => return Err(SyntaxError::UnexpectedCharacter { ch: c, at: pos }),
                },
                Token::WordIndex(w) => OpKind::PushWordIndex(w),
                Token::Directive { name, .. } => {
                    return Err(SyntaxError::UnknownDirective { name, at: pos });
                }
                Token::Comment => continue,
            };
            word.ops.push(Op { kind: op, pos });
        }
    }
}
