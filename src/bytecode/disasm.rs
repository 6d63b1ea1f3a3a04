use std::fmt::Write;

use crate::bytecode::{Instr, Operand, Program};

/// Print disassembly of a linked program
pub fn print_program(program: &Program) {
    print!("{}", disassemble(program));
}

/// Render every compiled word, preceded by the compacted opcode table.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== BYTECODE PROGRAM ({:?}) ===\n", program.mode);

    let _ = write!(out, "opcodes:");
    for op in 0..program.opcodes.len() as u16 {
        let name = program.opcodes.entry(op).map(|e| e.mnemonic()).unwrap_or("?");
        let _ = write!(out, " {}={}", op, name);
    }
    let _ = writeln!(out, "\n");

    for (index, word) in program.words.iter().enumerate() {
        let marker = match program.exports.iter().find(|e| e.index == index) {
            Some(e) if e.root => "  (export)",
            Some(_) => "  (export, nested)",
            None => "",
        };
        let _ = writeln!(out, "════════════════════════════════════════");
        let _ = writeln!(out, " [{}] {}{}", index, word.path, marker);
        let _ = writeln!(out, " {} instructions", word.instrs.len());
        let _ = writeln!(out, "════════════════════════════════════════");
        for (ip, instr) in word.instrs.iter().enumerate() {
            let text = format_instr(program, instr);
            match word.positions.get(ip) {
                Some(pos) => {
                    let _ = writeln!(out, "{:04}   {:<24} ; {}", ip, text, pos);
                }
                None => {
                    let _ = writeln!(out, "{:04}   {}", ip, text);
                }
            }
        }
        let _ = writeln!(out);
    }
    out
}

fn format_instr(program: &Program, instr: &Instr) -> String {
    let name = program
        .opcodes
        .entry(instr.opcode)
        .map(|e| e.mnemonic())
        .unwrap_or("???");
    match instr.operand {
        None => name.to_string(),
        Some(Operand::Number(n)) => format!("{} {}", name, n),
        Some(Operand::Word(w)) => {
            let target = program.words.get(w).map(|w| w.path.as_str()).unwrap_or("?");
            format!("{} ->{} ({})", name, w, target)
        }
    }
}
