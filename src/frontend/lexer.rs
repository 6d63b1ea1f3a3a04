use std::sync::Arc;

use crate::bytecode::isa::Isa;
use crate::lang::{Position, WordKind};

use super::syntax_error::SyntaxError;
use super::token::{Spanned, Token};

/// Line-oriented tokenizer for 4st source.
///
/// Tokens never span lines. Columns count characters, not bytes.
pub struct Lexer {
    file: Arc<str>,
    source: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    line_has_directive: bool,
    line_has_other: bool,
}

fn is_word_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn is_path_char(ch: char) -> bool {
    is_word_char(ch) || matches!(ch, '.' | '/' | '-')
}

impl Lexer {
    pub fn new(file: &str, source: &str) -> Self {
        Lexer {
            file: Arc::from(file),
            source: source.chars().collect(),
            pos: 0,
            line: 0,
            col: 0,
            line_has_directive: false,
            line_has_other: false,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 0;
            self.line_has_directive = false;
            self.line_has_other = false;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    /// Position from `col_start` on the current line up to the cursor.
    fn position_from(&self, col_start: u32) -> Position {
        Position::new(self.file.clone(), self.line, col_start, self.col)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while let Some(ch) = self.current() {
            if !pred(ch) {
                break;
            }
            s.push(ch);
            self.advance();
        }
        s
    }

    fn read_comment(&mut self, start: u32) -> Result<Token, SyntaxError> {
        self.advance(); // '('
        let mut depth = 1;
        while depth > 0 {
            match self.current() {
                None | Some('\n') => {
                    return Err(SyntaxError::UnterminatedComment {
                        at: self.position_from(start),
                    });
                }
                Some('(') => depth += 1,
                Some(')') => depth -= 1,
                Some(_) => {}
            }
            self.advance();
        }
        Ok(Token::Comment)
    }

    fn read_directive(&mut self, start: u32) -> Result<Token, SyntaxError> {
        self.advance(); // '#'
        let name = self.eat_while(|c| c.is_ascii_lowercase());
        if name != "include" {
            return Err(SyntaxError::UnknownDirective {
                name,
                at: self.position_from(start),
            });
        }
        self.skip_whitespace();
        let arg = self.eat_while(is_path_char);
        if arg.is_empty() {
            return Err(SyntaxError::MissingIncludePath {
                at: self.position_from(start),
            });
        }
        Ok(Token::Directive { name, arg })
    }

    fn read_begin_word(&mut self) -> Token {
        self.advance(); // ':'
        let kind = match self.current() {
            Some('@') => WordKind::Table,
            Some('=') => WordKind::Inline,
            _ => return Token::BeginWord(WordKind::Plain),
        };
        self.advance();
        Token::BeginWord(kind)
    }

    fn read_word_index(&mut self, start: u32) -> Result<Token, SyntaxError> {
        let marker = if self.advance() == Some('`') { "`" } else { "\\" };
        let name = self.eat_while(is_word_char);
        if name.is_empty() {
            return Err(SyntaxError::ExpectedWord {
                marker,
                at: self.position_from(start),
            });
        }
        Ok(Token::WordIndex(name))
    }

    fn read_number(&mut self) -> Token {
        let digits = self.eat_while(|c| c.is_ascii_digit());
        Token::Number(digits.parse().unwrap_or(f64::INFINITY))
    }

    /// Enforces the per-line rule: at most one directive, and never a
    /// directive next to other non-comment tokens.
    fn push(
        &mut self,
        tokens: &mut Vec<Spanned>,
        token: Token,
        pos: Position,
    ) -> Result<(), SyntaxError> {
        match token {
            Token::Directive { .. } => {
                if self.line_has_directive {
                    return Err(SyntaxError::MultipleDirectives { at: pos });
                }
                self.line_has_directive = true;
            }
            Token::Comment => {}
            _ => self.line_has_other = true,
        }
        if self.line_has_directive && self.line_has_other {
            return Err(SyntaxError::MixedDirectiveLine { at: pos });
        }
        tokens.push(Spanned { token, pos });
        Ok(())
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let isa = Isa::get();
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let start = self.col;

            let token = match self.current() {
                None => break,
                Some('\n') => {
                    self.advance();
                    continue;
                }
                Some('(') => self.read_comment(start)?,
                Some('#') => self.read_directive(start)?,
                Some(':') => self.read_begin_word(),
                Some(';') => {
                    self.advance();
                    Token::EndWord
                }
                Some('\\') | Some('`') => self.read_word_index(start)?,
                Some(ch) if is_word_start(ch) => Token::Word(self.eat_while(is_word_char)),
                Some(ch) if ch.is_ascii_digit() => self.read_number(),
                Some(ch) if isa.is_op1(ch) => {
                    self.advance();
                    Token::Op(ch)
                }
                Some(ch) => {
                    self.advance();
                    return Err(SyntaxError::UnexpectedCharacter {
                        ch,
                        at: self.position_from(start),
                    });
                }
            };

            let pos = self.position_from(start);
            self.push(&mut tokens, token, pos)?;
        }

        Ok(tokens)
    }

    /// Like [`tokenize`](Self::tokenize) but without comments.
    pub fn tokenize_clean(&mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let tokens = self.tokenize()?;
        Ok(tokens
            .into_iter()
            .filter(|t| t.token != Token::Comment)
            .collect())
    }
}
