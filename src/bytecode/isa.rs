//! Instruction catalog.
//!
//! [`ISA`] is the single ordered table mapping every source-level token to a
//! VM operation. Declaration order is load-bearing: compacted opcodes are
//! assigned in this order and the dispatch table is built in this order, so
//! reordering entries here must be mirrored in
//! [`SECTION_ORDER`](crate::runtime::dispatch::SECTION_ORDER).
//!
//! The first four entries are always present in every compiled program and
//! always occupy opcodes 0..=3 (see [`OP_RETURN`] and friends).

use std::collections::HashMap;
use std::sync::LazyLock;

/// How an entry is spelled in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A word such as `drop` or `sqrt`.
    Word,
    /// Any numeric literal (exactly one entry).
    Number,
    /// A call to a user word (exactly one entry).
    Call,
    /// A one-character operator such as `+`.
    Op1,
}

/// How the VM implements an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmCategory {
    /// Fixed handler named by `vm_id`.
    Id,
    /// Binary operator; `vm_id` is the operator spelling.
    Infix,
    /// Unary operator; `vm_id` is the operator spelling.
    Prefix,
    /// Unary math function; `vm_id` is the function name.
    Math1,
    /// Rewritten by the linker into a call of the user word `vm_id`.
    LibraryWord,
}

pub const FLAG_KEYWORD: u8 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsaEntry {
    pub source: SourceKind,
    /// Source spelling; empty for the NUMBER and CALL entries.
    pub token: &'static str,
    pub category: VmCategory,
    pub vm_id: &'static str,
    pub flags: u8,
}

impl IsaEntry {
    pub fn is_keyword(&self) -> bool {
        self.flags & FLAG_KEYWORD != 0
    }

    pub fn is_static(&self) -> bool {
        self.category == VmCategory::Id && self.vm_id == VM_ID_STATIC
    }

    pub fn is_debug(&self) -> bool {
        self.category == VmCategory::Id && self.vm_id == VM_ID_DEBUG
    }

    /// Name shown by the disassembler.
    pub fn mnemonic(&self) -> &'static str {
        match self.source {
            SourceKind::Number => "push",
            SourceKind::Call => "call_imm",
            _ => self.token,
        }
    }
}

pub const VM_ID_STATIC: &str = "STATIC";
pub const VM_ID_DEBUG: &str = "DEBUG";

/// Runtime opcodes of the always-present entries.
pub const OP_RETURN: u16 = 0;
pub const OP_IF: u16 = 1;
pub const OP_ELSE: u16 = 2;
pub const OP_ENDIF: u16 = 3;

const fn entry(
    source: SourceKind,
    token: &'static str,
    category: VmCategory,
    vm_id: &'static str,
    flags: u8,
) -> IsaEntry {
    IsaEntry {
        source,
        token,
        category,
        vm_id,
        flags,
    }
}

use SourceKind::{Call, Number, Op1, Word};
use VmCategory::{Id, Infix, LibraryWord, Math1, Prefix};

const KW: u8 = FLAG_KEYWORD;

pub static ISA: &[IsaEntry] = &[
    // always in the vm
    entry(Word, "return", Id, VM_ID_STATIC, KW),
    entry(Word, "if", Id, VM_ID_STATIC, KW),
    entry(Word, "else", Id, VM_ID_STATIC, KW),
    entry(Word, "endif", Id, VM_ID_STATIC, KW),
    // compiled out when unused
    entry(Number, "", Id, "PUSH_IMM", 0),
    entry(Word, "times", Id, "TIMES_LOOP", KW),
    entry(Word, "loop", Id, "TIMES_LOOP", KW),
    entry(Word, "do", Id, "DO_WHILE", KW),
    entry(Word, "while", Id, "DO_WHILE", KW),
    entry(Call, "", Id, "CALL_IMM", 0),
    entry(Word, "call", Id, "CALL_POP", 0),
    entry(Word, "pick", Id, "pick", 0),
    entry(Word, "drop", Id, "drop", 0),
    entry(Word, "nrot", Id, "nrot", 0),
    entry(Word, "ntro", Id, "ntro", 0),
    entry(Op1, "+", Infix, "+", 0),
    entry(Op1, "-", Infix, "-", 0),
    entry(Op1, "*", Infix, "*", 0),
    entry(Op1, "/", Infix, "/", 0),
    entry(Op1, "%", Infix, "%", 0),
    entry(Op1, "^", Infix, "**", 0),
    entry(Op1, "&", Infix, "&", 0),
    entry(Op1, "|", Infix, "|", 0),
    entry(Word, "xor", Infix, "^", 0),
    entry(Word, "and", Infix, "&&", 0),
    entry(Word, "or", Infix, "||", 0),
    entry(Word, "lshift", Infix, "<<", 0),
    entry(Word, "rshift", Infix, ">>", 0),
    entry(Op1, "=", Infix, "==", 0),
    entry(Word, "ne", Infix, "!=", 0),
    entry(Word, "gt", Infix, ">", 0),
    entry(Word, "ge", Infix, ">=", 0),
    entry(Word, "lt", Infix, "<", 0),
    entry(Word, "le", Infix, "<=", 0),
    entry(Word, "not", Prefix, "!", 0),
    entry(Word, "neg", Prefix, "-", 0),
    // math
    entry(Word, "sqrt", Math1, "sqrt", 0),
    entry(Word, "sin", Math1, "sin", 0),
    entry(Word, "cos", Math1, "cos", 0),
    entry(Word, "tan", Math1, "tan", 0),
    entry(Word, "atan", Math1, "atan", 0),
    entry(Word, "log", Math1, "log", 0),
    entry(Word, "log2", Math1, "log2", 0),
    entry(Word, "floor", Math1, "floor", 0),
    entry(Word, "ceil", Math1, "ceil", 0),
    entry(Word, "round", Math1, "round", 0),
    entry(Word, "sign", Math1, "sign", 0),
    entry(Word, "abs", Math1, "abs", 0),
    // ( index -- globals[index] ) and ( index value -- )
    entry(Word, "getglobal", Id, "getglobal", 0),
    entry(Word, "setglobal", Id, "setglobal", 0),
    // ( x -- x flag )
    entry(Word, "isnumber", Id, "isnumber", 0),
    entry(Word, "isarr", Id, "isarr", 0),
    // arrays
    entry(Word, "arrnew", Id, "arrnew", 0),
    entry(Word, "arrlen", Id, "arrlen", 0),
    entry(Word, "arrpush", Id, "arrpush", 0),
    entry(Word, "arrpop", Id, "arrpop", 0),
    entry(Word, "arrunshift", Id, "arrunshift", 0),
    entry(Word, "arrshift", Id, "arrshift", 0),
    entry(Word, "arrget", Id, "arrget", 0),
    entry(Word, "arrset", Id, "arrset", 0),
    entry(Word, "arrjoin", Id, "arrjoin", 0),
    entry(Word, "arrsplit", Id, "arrsplit", 0),
    // graph words, backed by user words from a library source
    entry(Word, "thru", LibraryWord, "graph_thru", 0),
    entry(Word, "curvegen", LibraryWord, "graph_curvegen", 0),
    entry(Op1, "~", LibraryWord, "graph_compseq", 0),
    entry(Op1, ",", LibraryWord, "graph_comppar", 0),
    entry(Word, "swizz", LibraryWord, "graph_swizz", 0),
    entry(Op1, "@", LibraryWord, "graph_comprec", 0),
    entry(Word, "boxen", LibraryWord, "graph_boxen", 0),
    // debug builds only
    entry(Word, "assert", Id, VM_ID_DEBUG, 0),
    entry(Word, "dump", Id, VM_ID_DEBUG, 0),
    entry(Word, "brk", Id, VM_ID_DEBUG, 0),
    entry(Word, "_DTGRAPH", Id, VM_ID_DEBUG, 0),
];

/// Lookup tables derived from [`ISA`], built once and shared by all compiles.
pub struct Isa {
    words: HashMap<&'static str, usize>,
    op1: HashMap<char, usize>,
    number: usize,
    call: usize,
}

static CATALOG: LazyLock<Isa> = LazyLock::new(Isa::build);

impl Isa {
    pub fn get() -> &'static Isa {
        &CATALOG
    }

    fn build() -> Isa {
        let mut words = HashMap::new();
        let mut op1 = HashMap::new();
        let mut number = None;
        let mut call = None;
        for (i, e) in ISA.iter().enumerate() {
            match e.source {
                SourceKind::Word => {
                    words.insert(e.token, i);
                }
                SourceKind::Op1 => {
                    if let Some(c) = e.token.chars().next() {
                        op1.insert(c, i);
                    }
                }
                SourceKind::Number => number = Some(i),
                SourceKind::Call => call = Some(i),
            }
        }
        let (Some(number), Some(call)) = (number, call) else {
            panic!("instruction catalog lacks a NUMBER or CALL entry");
        };
        Isa {
            words,
            op1,
            number,
            call,
        }
    }

    pub fn entry(&self, index: usize) -> &'static IsaEntry {
        &ISA[index]
    }

    pub fn len(&self) -> usize {
        ISA.len()
    }

    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.words.get(word).copied()
    }

    pub fn lookup_op1(&self, ch: char) -> Option<usize> {
        self.op1.get(&ch).copied()
    }

    pub fn is_op1(&self, ch: char) -> bool {
        self.op1.contains_key(&ch)
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn call(&self) -> usize {
        self.call
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.lookup_word(word)
            .is_some_and(|i| ISA[i].is_keyword())
    }

    /// `vm_id`s of the entries of `category` kept by `opcodes`, in
    /// declaration order.
    pub fn vm_ids_in(
        &self,
        category: VmCategory,
        opcodes: &super::ir::OpcodeMap,
    ) -> Vec<&'static str> {
        opcodes
            .isa_indices()
            .iter()
            .map(|&i| &ISA[i])
            .filter(|e| e.category == category)
            .map(|e| e.vm_id)
            .collect()
    }
}
