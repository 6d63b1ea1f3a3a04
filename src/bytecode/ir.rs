use crate::lang::{Position, Span};
use crate::runtime::dispatch::SECTION_ORDER;
use serde::{Deserialize, Serialize};

use super::isa::{ISA, IsaEntry, OP_ENDIF, SourceKind, VmCategory};
use super::load_error::LoadError;
use super::verify::{check_conditionals, check_loops, check_section_order};

/// Which flavor of program the linker produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildMode {
    /// DEBUG-category ops (`assert`, `dump`, `brk`, `_DTGRAPH`) are always
    /// present in the dispatch table.
    Debug,
    /// DEBUG-category ops are rejected at link time.
    Release,
}

impl BuildMode {
    pub fn is_debug(self) -> bool {
        self == BuildMode::Debug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Number(f64),
    /// Index into [`Program::words`].
    Word(usize),
}

/// One compacted instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub opcode: u16,
    pub operand: Option<Operand>,
}

/// A flattened word: instruction list plus the parallel debug positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledWord {
    pub path: String,
    pub instrs: Vec<Instr>,
    pub positions: Vec<Position>,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub index: usize,
    pub path: String,
    /// `true` when the path itself satisfied the export predicate; `false`
    /// for lifted words nested inside an exported root.
    pub root: bool,
}

/// Dense remap between catalog indices and runtime opcodes.
///
/// Holds the kept catalog indices in ascending order; a catalog index's
/// position in that list is its opcode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpcodeMap {
    isa_indices: Vec<usize>,
}

impl OpcodeMap {
    /// `keep` is consulted once per catalog entry, in declaration order.
    pub fn from_fn(mut keep: impl FnMut(usize, &IsaEntry) -> bool) -> Self {
        let isa_indices = ISA
            .iter()
            .enumerate()
            .filter(|(i, e)| keep(*i, e))
            .map(|(i, _)| i)
            .collect();
        Self { isa_indices }
    }

    pub fn opcode_of(&self, isa_index: usize) -> Option<u16> {
        self.isa_indices
            .binary_search(&isa_index)
            .ok()
            .map(|op| op as u16)
    }

    pub fn isa_index(&self, opcode: u16) -> Option<usize> {
        self.isa_indices.get(opcode as usize).copied()
    }

    pub fn entry(&self, opcode: u16) -> Option<&'static IsaEntry> {
        self.isa_index(opcode).map(|i| &ISA[i])
    }

    pub fn isa_indices(&self) -> &[usize] {
        &self.isa_indices
    }

    pub fn len(&self) -> usize {
        self.isa_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.isa_indices.is_empty()
    }

    /// Opcode of the entry spelled `token`, if the program kept it.
    pub fn opcode_of_token(&self, token: &str) -> Option<u16> {
        ISA.iter()
            .position(|e| e.token == token)
            .and_then(|i| self.opcode_of(i))
    }
}

/// A linked program.
///
/// Word indices are only meaningful for this program; a new trace yields new
/// indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub words: Vec<CompiledWord>,
    pub exports: Vec<Export>,
    pub opcodes: OpcodeMap,
    pub mode: BuildMode,
}

impl Program {
    pub fn export(&self, i: usize) -> Option<&Export> {
        self.exports.get(i)
    }

    pub fn root_exports(&self) -> impl Iterator<Item = (usize, &Export)> {
        self.exports.iter().enumerate().filter(|(_, e)| e.root)
    }

    pub fn find_export(&self, path: &str) -> Option<usize> {
        self.exports.iter().position(|e| e.path == path)
    }

    pub fn instr_count(&self) -> usize {
        self.words.iter().map(|w| w.instrs.len()).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LoadError> {
        postcard::to_allocvec(self).map_err(LoadError::Encode)
    }

    /// Decodes a program and runs [`Program::validate`] on it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let program: Program = postcard::from_bytes(bytes).map_err(LoadError::Decode)?;
        program.validate()?;
        Ok(program)
    }

    /// Checks everything the VM relies on without re-checking at run time:
    /// a dispatchable opcode map, known opcodes with fitting operands, word
    /// and export indices in range, one position per instruction, and
    /// balanced control structures.
    pub fn validate(&self) -> Result<(), LoadError> {
        self.check_opcode_map()?;

        let words = self.words.len();
        for (w, word) in self.words.iter().enumerate() {
            if word.positions.len() != word.instrs.len() {
                return Err(LoadError::PositionCount {
                    word: w,
                    instrs: word.instrs.len(),
                    positions: word.positions.len(),
                });
            }

            let mut ops = Vec::with_capacity(word.instrs.len());
            for (op, (instr, pos)) in word.instrs.iter().zip(&word.positions).enumerate() {
                let (Some(isa), Some(entry)) = (
                    self.opcodes.isa_index(instr.opcode),
                    self.opcodes.entry(instr.opcode),
                ) else {
                    return Err(LoadError::UnknownOpcode {
                        word: w,
                        op,
                        opcode: instr.opcode,
                    });
                };
                let fits = match (entry.source, instr.operand) {
                    (SourceKind::Number, Some(Operand::Number(_))) => true,
                    (SourceKind::Number | SourceKind::Call, Some(Operand::Word(i))) => i < words,
                    (SourceKind::Word | SourceKind::Op1, None) => true,
                    _ => false,
                };
                if !fits {
                    return Err(LoadError::BadOperand {
                        word: w,
                        op,
                        mnemonic: entry.mnemonic(),
                    });
                }
                ops.push((isa, pos));
            }
            check_conditionals(ops.iter().copied())?;
            check_loops(ops.iter().copied())?;
        }

        if let Some(e) = self.exports.iter().find(|e| e.index >= words) {
            return Err(LoadError::DanglingExport {
                path: e.path.clone(),
                index: e.index,
                words,
            });
        }
        Ok(())
    }

    fn check_opcode_map(&self) -> Result<(), LoadError> {
        let indices = self.opcodes.isa_indices();
        let fail = |reason| Err(LoadError::OpcodeMap { reason });
        if !indices.windows(2).all(|w| w[0] < w[1]) {
            return fail("catalog indices are not strictly increasing");
        }
        if indices.last().is_some_and(|&i| i >= ISA.len()) {
            return fail("catalog index past the end of the catalog");
        }
        let statics: Vec<usize> = (0..=OP_ENDIF as usize).collect();
        if indices.get(..statics.len()) != Some(&statics[..]) {
            return fail("always-present entries missing");
        }
        if indices
            .iter()
            .any(|&i| ISA[i].category == VmCategory::LibraryWord)
        {
            return fail("library word in the opcode map");
        }
        check_section_order(&self.opcodes, SECTION_ORDER)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::LinkError;
    use crate::bytecode::isa::Isa;

    #[test]
    fn test_opcode_map_is_dense_and_ordered() {
        let isa = Isa::get();
        let drop = isa.lookup_word("drop").unwrap();
        let map = OpcodeMap::from_fn(|i, e| e.is_static() || i == drop || i == isa.number());
        assert_eq!(map.len(), 6);
        assert_eq!(map.opcode_of(0), Some(0));
        assert_eq!(map.opcode_of(isa.number()), Some(4));
        assert_eq!(map.opcode_of(drop), Some(5));
        assert_eq!(map.isa_index(5), Some(drop));
        assert_eq!(map.opcode_of(isa.call()), None);
        assert_eq!(map.opcode_of_token("drop"), Some(5));
        assert_eq!(map.entry(5).map(|e| e.token), Some("drop"));
    }

    #[test]
    fn test_program_bytes_survive_reload() {
        use crate::lang::Position;
        use std::sync::Arc;

        let file: Arc<str> = Arc::from("a.4st");
        let program = Program {
            words: vec![CompiledWord {
                path: "main".to_string(),
                instrs: vec![
                    Instr {
                        opcode: 4,
                        operand: Some(Operand::Number(1.5)),
                    },
                    Instr {
                        opcode: 5,
                        operand: Some(Operand::Word(0)),
                    },
                ],
                positions: vec![
                    Position::new(file.clone(), 0, 6, 9),
                    Position::new(file.clone(), 0, 10, 14),
                ],
                span: None,
            }],
            exports: vec![Export {
                index: 0,
                path: "main".to_string(),
                root: true,
            }],
            opcodes: OpcodeMap::from_fn(|i, _| i < 5 || i == Isa::get().call()),
            mode: BuildMode::Debug,
        };
        let bytes = program.to_bytes().unwrap();
        let back = Program::from_bytes(&bytes).unwrap();
        assert_eq!(back.words[0].instrs, program.words[0].instrs);
        assert_eq!(back.words[0].positions, program.words[0].positions);
        assert_eq!(back.exports, program.exports);
        assert_eq!(back.opcodes, program.opcodes);
        assert_eq!(back.mode, BuildMode::Debug);
    }

    fn linked() -> Program {
        crate::bytecode::compile_str("a.4st", ":main :w 1 ; 2 if w endif ;", BuildMode::Debug)
            .unwrap()
            .trace(|p| p == "main")
            .unwrap()
    }

    fn reload(program: &Program) -> Result<Program, LoadError> {
        Program::from_bytes(&program.to_bytes().unwrap())
    }

    #[test]
    fn test_linked_program_reloads() {
        let program = linked();
        assert_eq!(program.words[0].path, "main");
        assert!(reload(&program).is_ok());
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let mut program = linked();
        program.words[0].instrs[0].opcode = 200;
        assert!(matches!(
            reload(&program),
            Err(LoadError::UnknownOpcode {
                word: 0,
                op: 0,
                opcode: 200
            })
        ));
    }

    #[test]
    fn test_operand_mismatch_is_rejected() {
        let mut program = linked();
        program.words[0].instrs[2].operand = Some(Operand::Word(99));
        assert!(matches!(
            reload(&program),
            Err(LoadError::BadOperand { word: 0, op: 2, .. })
        ));

        let mut program = linked();
        program.words[0].instrs[1].operand = Some(Operand::Number(1.0));
        assert!(matches!(
            reload(&program),
            Err(LoadError::BadOperand {
                mnemonic: "if",
                ..
            })
        ));
    }

    #[test]
    fn test_position_count_is_checked() {
        let mut program = linked();
        program.words[1].positions.clear();
        assert!(matches!(
            reload(&program),
            Err(LoadError::PositionCount {
                word: 1,
                instrs: 1,
                positions: 0
            })
        ));
    }

    #[test]
    fn test_dangling_export_is_rejected() {
        let mut program = linked();
        program.exports[0].index = 7;
        let err = reload(&program).unwrap_err();
        assert_eq!(
            err.to_string(),
            "export 'main' refers to word 7 but the program has 2"
        );
    }

    #[test]
    fn test_broken_structure_is_rejected() {
        let mut program = linked();
        program.words[0].instrs.pop();
        program.words[0].positions.pop();
        assert!(matches!(
            reload(&program),
            Err(LoadError::Structure(LinkError::UnbalancedConditional { .. }))
        ));
    }

    #[test]
    fn test_opcode_map_without_static_entries_is_rejected() {
        let mut program = linked();
        program.opcodes = OpcodeMap::from_fn(|i, _| (1..6).contains(&i));
        assert!(matches!(reload(&program), Err(LoadError::OpcodeMap { .. })));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        assert!(matches!(
            Program::from_bytes(&[0xff, 0xff, 0xff]),
            Err(LoadError::Decode(_))
        ));
    }
}
