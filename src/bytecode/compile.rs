use tracing::debug;

use crate::error::Result;
use crate::frontend::{Lexer, MemoryReader, Parser, SourceReader, preprocess};
use crate::lang::Word;

use super::ir::{BuildMode, Program};
use super::link::link;
use super::link_error::LinkError;

pub const PREAMBLE_FILE: &str = "<preamble.4st>";

/// Source prepended to every compile. `DTGRAPH` tags graph arrays in debug
/// builds and compiles to nothing in release builds.
pub fn preamble(mode: BuildMode) -> &'static str {
    match mode {
        BuildMode::Debug => ":= DTGRAPH _DTGRAPH ;\n",
        BuildMode::Release => ":= DTGRAPH ;\n",
    }
}

/// `test_` prefix on the last path segment.
pub fn is_test_word(path: &str) -> bool {
    path.rsplit(':').next().is_some_and(|w| w.starts_with("test_"))
}

/// `main_` prefix on the last path segment.
pub fn is_main_word(path: &str) -> bool {
    path.rsplit(':').next().is_some_and(|w| w.starts_with("main_"))
}

/// Front half of the pipeline: sources in, word tree out.
pub struct Compiler<R: SourceReader> {
    reader: R,
}

impl<R: SourceReader> Compiler<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn compile(&self, entry: &str, mode: BuildMode) -> Result<CompileUnit> {
        let mut tokens = Lexer::new(PREAMBLE_FILE, preamble(mode)).tokenize()?;
        tokens.extend(preprocess(&self.reader, entry)?);
        debug!(entry, tokens = tokens.len(), "compiling");

        let root = Parser::new(tokens).parse()?;
        Ok(CompileUnit { root, mode })
    }
}

/// Compiles a single in-memory source.
pub fn compile_str(file: &str, source: &str, mode: BuildMode) -> Result<CompileUnit> {
    Compiler::new(MemoryReader::new().with_file(file, source)).compile(file, mode)
}

/// A parsed program, ready to be traced any number of times.
#[derive(Debug, Clone)]
pub struct CompileUnit {
    pub root: Word,
    pub mode: BuildMode,
}

impl CompileUnit {
    pub fn trace(&self, export: impl Fn(&str) -> bool) -> std::result::Result<Program, LinkError> {
        link(&self.root, &export, self.mode)
    }

    pub fn word_path_at(&self, file: &str, line: u32, col: u32) -> String {
        self.root.word_path_at(file, line, col)
    }
}
