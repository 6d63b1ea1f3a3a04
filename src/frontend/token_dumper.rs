use crate::bytecode::isa::Isa;
use crate::frontend::token::{Spanned, Token};

/// Prints a token stream, one token per line, for `--tokens`.
pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints source spelling instead
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Spanned]) -> String {
        tokens.iter().map(|s| self.render_one(s) + "\n").collect()
    }

    fn render_one(&self, s: &Spanned) -> String {
        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            format!(
                "[{}:{:02}:{:02}] {}{:<9} {:?}{}",
                s.pos.file,
                s.pos.line + 1,
                s.pos.col_start + 1,
                colr,
                kind,
                s.token,
                reset
            )
        } else {
            format!(
                "[{}:{:02}:{:02}] {}{:<9} {}{}",
                s.pos.file,
                s.pos.line + 1,
                s.pos.col_start + 1,
                colr,
                kind,
                s.token,
                reset
            )
        }
    }

    fn kind(&self, t: &Token) -> &'static str {
        match t {
            Token::Word(w) if Isa::get().is_keyword(w) => "KEYWORD",
            Token::Word(w) if Isa::get().lookup_word(w).is_some() => "BUILTIN",
            Token::Word(_) => "WORD",
            Token::Number(_) => "NUMBER",
            Token::Op(_) => "OP",
            Token::WordIndex(_) => "INDEX",
            Token::BeginWord(_) => "BEGIN",
            Token::EndWord => "END",
            Token::Directive { .. } => "DIRECTIVE",
            Token::Comment => "COMMENT",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        match t {
            Token::Comment => Self::DIM,
            Token::Directive { .. } => Self::GRN,
            Token::Number(_) => Self::CYN,
            Token::Word(w) if Isa::get().lookup_word(w).is_some() => Self::BLU,
            Token::Word(_) | Token::WordIndex(_) => Self::YEL,
            Token::Op(_) => Self::MAG,
            Token::BeginWord(_) | Token::EndWord => Self::RESET,
        }
    }
}
