//! Structural checks run by the linker before a program is emitted.

use crate::lang::Position;
use crate::runtime::dispatch::Section;

use super::ir::OpcodeMap;
use super::isa::{ISA, Isa, OP_ELSE, OP_ENDIF, OP_IF};
use super::link_error::LinkError;

/// Checks `if`/`else`/`endif` nesting of one flattened word.
///
/// The VM's forward skip stops at the first `else` or `endif` at depth zero,
/// so every `if` needs a matching `endif` and at most one `else`.
/// `ops` yields catalog indices, which coincide with opcodes for these three.
pub fn check_conditionals<'p>(
    ops: impl IntoIterator<Item = (usize, &'p Position)>,
) -> Result<(), LinkError> {
    // (position of the `if`, saw `else`)
    let mut open: Vec<(&Position, bool)> = Vec::new();

    for (isa, pos) in ops {
        match isa {
            i if i == OP_IF as usize => open.push((pos, false)),
            i if i == OP_ELSE as usize => match open.last_mut() {
                Some((_, seen)) if !*seen => *seen = true,
                Some(_) => {
                    return Err(LinkError::UnbalancedConditional {
                        reason: "second 'else' for the same 'if'",
                        at: pos.clone(),
                    });
                }
                None => {
                    return Err(LinkError::UnbalancedConditional {
                        reason: "'else' without 'if'",
                        at: pos.clone(),
                    });
                }
            },
            i if i == OP_ENDIF as usize => {
                if open.pop().is_none() {
                    return Err(LinkError::UnbalancedConditional {
                        reason: "'endif' without 'if'",
                        at: pos.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    match open.pop() {
        Some((pos, _)) => Err(LinkError::UnbalancedConditional {
            reason: "'if' without 'endif'",
            at: pos.clone(),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    If,
    Times,
    Do,
}

fn unbalanced_loop(reason: &'static str, at: &Position) -> LinkError {
    LinkError::UnbalancedLoop {
        reason,
        at: at.clone(),
    }
}

/// Checks `times`/`loop` and `do`/`while` pairing of one flattened word.
///
/// `loop` and `while` jump back to an index saved on the return stack by
/// their opener, so each must close the innermost open structure of its own
/// kind, and no loop may straddle an `if`/`else`/`endif` boundary. Expects
/// conditionals to be balanced already.
pub fn check_loops<'p>(
    ops: impl IntoIterator<Item = (usize, &'p Position)>,
) -> Result<(), LinkError> {
    let isa = Isa::get();
    let index = |token: &str| isa.lookup_word(token);
    let (times_op, loop_op, do_op, while_op) = (
        index("times"),
        index("loop"),
        index("do"),
        index("while"),
    );
    let mut open: Vec<(Open, &Position)> = Vec::new();

    for (i, pos) in ops {
        let top = open.last().map(|(kind, _)| *kind);
        if i == OP_IF as usize {
            open.push((Open::If, pos));
        } else if i == OP_ELSE as usize || i == OP_ENDIF as usize {
            match top {
                Some(Open::If) if i == OP_ELSE as usize => {}
                Some(Open::If) => {
                    open.pop();
                }
                Some(_) => return Err(unbalanced_loop("loop crosses an 'if' boundary", pos)),
                None => {}
            }
        } else if Some(i) == times_op {
            open.push((Open::Times, pos));
        } else if Some(i) == do_op {
            open.push((Open::Do, pos));
        } else if Some(i) == loop_op {
            match top {
                Some(Open::Times) => {
                    open.pop();
                }
                Some(Open::Do) => return Err(unbalanced_loop("'loop' closes a 'do'", pos)),
                Some(Open::If) if open.iter().any(|(k, _)| *k == Open::Times) => {
                    return Err(unbalanced_loop("loop crosses an 'if' boundary", pos));
                }
                _ => return Err(unbalanced_loop("'loop' without 'times'", pos)),
            }
        } else if Some(i) == while_op {
            match top {
                Some(Open::Do) => {
                    open.pop();
                }
                Some(Open::Times) => return Err(unbalanced_loop("'while' closes a 'times'", pos)),
                Some(Open::If) if open.iter().any(|(k, _)| *k == Open::Do) => {
                    return Err(unbalanced_loop("loop crosses an 'if' boundary", pos));
                }
                _ => return Err(unbalanced_loop("'while' without 'do'", pos)),
            }
        }
    }

    match open.pop() {
        Some((Open::Times, pos)) => Err(unbalanced_loop("'times' without 'loop'", pos)),
        Some((Open::Do, pos)) => Err(unbalanced_loop("'do' without 'while'", pos)),
        _ => Ok(()),
    }
}

/// Checks that building handlers section by section, in `sections` order,
/// visits the kept catalog entries in strictly increasing catalog order and
/// that every kept entry has a section.
pub fn check_section_order(opcodes: &OpcodeMap, sections: &[Section]) -> Result<(), LinkError> {
    let mut max: Option<usize> = None;
    for section in sections {
        for &i in opcodes.isa_indices() {
            if !section.covers(&ISA[i]) {
                continue;
            }
            if max.is_some_and(|m| i <= m) {
                return Err(LinkError::IsaOrderViolation {
                    section: section.name().to_string(),
                    index: i,
                });
            }
            max = Some(i);
        }
    }

    for &i in opcodes.isa_indices() {
        if !sections.iter().any(|s| s.covers(&ISA[i])) {
            return Err(LinkError::IsaOrderViolation {
                section: format!("<none for '{}'>", ISA[i].mnemonic()),
                index: i,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::isa::{Isa, VmCategory};
    use crate::runtime::dispatch::SECTION_ORDER;
    use std::sync::Arc;

    fn pos(col: u32) -> Position {
        Position::new(Arc::from("t.4st"), 0, col, col + 1)
    }

    fn check(ops: &[usize]) -> Result<(), LinkError> {
        let positions: Vec<Position> = (0..ops.len() as u32).map(pos).collect();
        check_conditionals(ops.iter().copied().zip(positions.iter()))
    }

    const IF: usize = OP_IF as usize;
    const ELSE: usize = OP_ELSE as usize;
    const ENDIF: usize = OP_ENDIF as usize;

    #[test]
    fn test_balanced_conditionals() {
        assert!(check(&[]).is_ok());
        assert!(check(&[IF, ENDIF]).is_ok());
        assert!(check(&[IF, ELSE, ENDIF]).is_ok());
        assert!(check(&[IF, IF, ENDIF, ELSE, IF, ELSE, ENDIF, ENDIF]).is_ok());
    }

    #[test]
    fn test_unbalanced_conditionals() {
        let reason = |r: Result<(), LinkError>| match r {
            Err(LinkError::UnbalancedConditional { reason, at }) => (reason, at.col_start),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(reason(check(&[ELSE])), ("'else' without 'if'", 0));
        assert_eq!(reason(check(&[IF, ELSE, ELSE, ENDIF])).0, "second 'else' for the same 'if'");
        assert_eq!(reason(check(&[ENDIF])).0, "'endif' without 'if'");
        assert_eq!(reason(check(&[IF, IF, ENDIF])), ("'if' without 'endif'", 0));
    }

    fn check_loop_ops(tokens: &[&str]) -> Result<(), LinkError> {
        let isa = Isa::get();
        let ops: Vec<usize> = tokens
            .iter()
            .map(|t| isa.lookup_word(t).unwrap())
            .collect();
        let positions: Vec<Position> = (0..ops.len() as u32).map(pos).collect();
        check_loops(ops.iter().copied().zip(positions.iter()))
    }

    #[test]
    fn test_balanced_loops() {
        assert!(check_loop_ops(&[]).is_ok());
        assert!(check_loop_ops(&["times", "loop"]).is_ok());
        assert!(check_loop_ops(&["do", "while"]).is_ok());
        assert!(check_loop_ops(&["times", "do", "if", "else", "endif", "while", "loop"]).is_ok());
        assert!(check_loop_ops(&["if", "times", "loop", "else", "do", "while", "endif"]).is_ok());
        assert!(check_loop_ops(&["times", "return", "loop"]).is_ok());
    }

    #[test]
    fn test_unbalanced_loops() {
        let reason = |r: Result<(), LinkError>| match r {
            Err(LinkError::UnbalancedLoop { reason, at }) => (reason, at.col_start),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(reason(check_loop_ops(&["loop"])), ("'loop' without 'times'", 0));
        assert_eq!(reason(check_loop_ops(&["while"])).0, "'while' without 'do'");
        assert_eq!(reason(check_loop_ops(&["times", "do", "loop", "while"])), ("'loop' closes a 'do'", 2));
        assert_eq!(reason(check_loop_ops(&["do", "times", "while", "loop"])).0, "'while' closes a 'times'");
        assert_eq!(reason(check_loop_ops(&["times", "times", "loop"])), ("'times' without 'loop'", 0));
        assert_eq!(reason(check_loop_ops(&["do"])).0, "'do' without 'while'");
        assert_eq!(reason(check_loop_ops(&["times", "if", "loop", "endif"])), ("loop crosses an 'if' boundary", 2));
        assert_eq!(reason(check_loop_ops(&["if", "times", "endif", "loop"])).1, 2);
        assert_eq!(reason(check_loop_ops(&["if", "do", "else", "while", "endif"])).0, "loop crosses an 'if' boundary");
    }

    #[test]
    fn test_full_catalog_matches_dispatch_order() {
        let everything = OpcodeMap::from_fn(|_, e| e.category != VmCategory::LibraryWord);
        assert!(check_section_order(&everything, SECTION_ORDER).is_ok());
    }

    #[test]
    fn test_misordered_sections_are_rejected() {
        let isa = Isa::get();
        let plus = isa.lookup_op1('+').unwrap();
        let sqrt = isa.lookup_word("sqrt").unwrap();
        let map = OpcodeMap::from_fn(|i, e| e.is_static() || i == plus || i == sqrt);
        let swapped = [
            Section::Id("STATIC"),
            Section::Category(VmCategory::Math1),
            Section::Category(VmCategory::Infix),
        ];
        match check_section_order(&map, &swapped) {
            Err(LinkError::IsaOrderViolation { section, index }) => {
                assert_eq!(section, "INFIX");
                assert_eq!(index, plus);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_entry_without_section_is_rejected() {
        let isa = Isa::get();
        let drop = isa.lookup_word("drop").unwrap();
        let map = OpcodeMap::from_fn(|i, e| e.is_static() || i == drop);
        let sections = [Section::Id("STATIC")];
        assert!(matches!(
            check_section_order(&map, &sections),
            Err(LinkError::IsaOrderViolation { .. })
        ));
    }
}
