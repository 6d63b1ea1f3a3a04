pub mod compile;
pub mod disasm;
pub mod ir;
pub mod isa;
pub mod link;
pub mod link_error;
pub mod load_error;
pub mod verify;

pub use compile::{CompileUnit, Compiler, compile_str, is_main_word, is_test_word};
pub use ir::{BuildMode, CompiledWord, Export, Instr, OpcodeMap, Operand, Program};
pub use isa::{ISA, Isa, IsaEntry, SourceKind, VmCategory};
pub use link::link;
pub use link_error::LinkError;
pub use load_error::LoadError;
