//! Reachability tracer and linker.
//!
//! Starting from the words whose path satisfies an export predicate, the
//! tracer lifts every word reachable through calls and `\name` references,
//! splices inline words into their call sites, keeps jump-table runs whole
//! and contiguous, and finally emits a [`Program`] whose instructions use the
//! compacted opcode numbering.
//!
//! Names resolve lexically, innermost scope first, by word identity: two
//! words that share a name in different scopes never bind to each other.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::lang::{OpKind, Position, Word, WordKind};
use crate::runtime::dispatch::SECTION_ORDER;

use super::ir::{BuildMode, CompiledWord, Export, Instr, OpcodeMap, Operand, Program};
use super::isa::{Isa, VmCategory};
use super::link_error::LinkError;
use super::verify::{check_conditionals, check_loops, check_section_order};

#[derive(Debug, Clone)]
enum Pending {
    Number(f64),
    /// Target word by serial, resolved to a program index once all words
    /// are lifted and ordered.
    Word { serial: u32, name: String },
}

#[derive(Debug, Clone)]
struct LinkedOp {
    isa: usize,
    operand: Option<Pending>,
    pos: Position,
}

#[derive(Debug)]
struct Lifted<'a> {
    word: &'a Word,
    path: String,
    ops: Vec<LinkedOp>,
    /// `(serial, 0)` for ordinary words, `(first serial of run, offset)`
    /// for table words, so a run sorts as one dense block.
    sort_key: (u32, u32),
}

struct Tracer<'a> {
    isa: &'static Isa,
    mode: BuildMode,
    lifted: HashMap<u32, usize>,
    out: Vec<Lifted<'a>>,
    roots: HashSet<u32>,
    inline_stack: Vec<u32>,
}

fn path_of(scope: &[&Word]) -> String {
    scope
        .iter()
        .filter(|w| !w.is_root())
        .map(|w| w.name())
        .collect::<Vec<_>>()
        .join(":")
}

/// Innermost `(scope depth, child index)` whose child is named `name`.
fn resolve(scope: &[&Word], name: &str) -> Option<(usize, usize)> {
    (0..scope.len()).rev().find_map(|depth| {
        scope[depth]
            .children
            .iter()
            .position(|w| w.name() == name)
            .map(|i| (depth, i))
    })
}

/// Inclusive bounds of the table run around `siblings[i]`.
fn table_run(siblings: &[Word], i: usize) -> (usize, usize) {
    let mut left = i;
    while left > 0 && siblings[left - 1].kind == WordKind::Table {
        left -= 1;
    }
    let mut right = i;
    while right + 1 < siblings.len() && siblings[right + 1].kind == WordKind::Table {
        right += 1;
    }
    (left, right)
}

impl<'a> Tracer<'a> {
    fn new(mode: BuildMode) -> Self {
        Self {
            isa: Isa::get(),
            mode,
            lifted: HashMap::new(),
            out: Vec::new(),
            roots: HashSet::new(),
            inline_stack: Vec::new(),
        }
    }

    fn trace_exports(
        &mut self,
        scope: &mut Vec<&'a Word>,
        export: &dyn Fn(&str) -> bool,
    ) -> Result<(), LinkError> {
        let Some(&word) = scope.last() else {
            return Ok(());
        };
        for child in &word.children {
            scope.push(child);
            if export(&path_of(scope)) {
                self.lift(scope)?;
                self.roots.insert(child.serial);
            }
            self.trace_exports(scope, export)?;
            scope.pop();
        }
        Ok(())
    }

    fn sort_key(scope: &[&'a Word]) -> (u32, u32) {
        let word = scope[scope.len() - 1];
        if word.kind == WordKind::Table && scope.len() >= 2 {
            let siblings = &scope[scope.len() - 2].children;
            if let Some(i) = siblings.iter().position(|w| w.serial == word.serial) {
                let (left, _) = table_run(siblings, i);
                return (siblings[left].serial, (i - left) as u32);
            }
        }
        (word.serial, 0)
    }

    /// Adds the last word of `scope` to the output, once.
    fn lift(&mut self, scope: &[&'a Word]) -> Result<(), LinkError> {
        let word = scope[scope.len() - 1];
        if self.lifted.contains_key(&word.serial) {
            return Ok(());
        }

        let slot = self.out.len();
        self.out.push(Lifted {
            word,
            path: path_of(scope),
            ops: Vec::new(),
            sort_key: Self::sort_key(scope),
        });
        // registered before expanding so recursive calls terminate
        self.lifted.insert(word.serial, slot);
        trace!(path = %self.out[slot].path, serial = word.serial, "lift");

        let mut ops = Vec::with_capacity(word.ops.len());
        self.expand_ops(scope, &mut ops)?;
        self.out[slot].ops = ops;
        Ok(())
    }

    fn expand_ops(&mut self, scope: &[&'a Word], out: &mut Vec<LinkedOp>) -> Result<(), LinkError> {
        let word = scope[scope.len() - 1];
        for op in &word.ops {
            match &op.kind {
                OpKind::PushNumber(n) => out.push(LinkedOp {
                    isa: self.isa.number(),
                    operand: Some(Pending::Number(*n)),
                    pos: op.pos.clone(),
                }),
                OpKind::Builtin(i) | OpKind::OneCharOp(i) => {
                    let entry = self.isa.entry(*i);
                    if entry.category == VmCategory::LibraryWord {
                        if resolve(scope, entry.vm_id).is_none() {
                            return Err(LinkError::UnresolvedWord {
                                name: entry.vm_id.to_string(),
                                at: Some(op.pos.clone()),
                            });
                        }
                        self.expand_call(scope, entry.vm_id, &op.pos, out)?;
                        continue;
                    }
                    if entry.is_debug() && !self.mode.is_debug() {
                        return Err(LinkError::DebugOpInRelease {
                            op: entry.token.to_string(),
                            at: op.pos.clone(),
                        });
                    }
                    out.push(LinkedOp {
                        isa: *i,
                        operand: None,
                        pos: op.pos.clone(),
                    });
                }
                OpKind::Call(name) => self.expand_call(scope, name, &op.pos, out)?,
                OpKind::PushWordIndex(name) => {
                    self.expand_address_of(scope, name, &op.pos, out)?;
                }
            }
        }
        Ok(())
    }

    fn expand_call(
        &mut self,
        scope: &[&'a Word],
        name: &str,
        pos: &Position,
        out: &mut Vec<LinkedOp>,
    ) -> Result<(), LinkError> {
        let (depth, i) = resolve(scope, name).ok_or_else(|| LinkError::WordNotFoundInScope {
            name: name.to_string(),
            at: pos.clone(),
        })?;
        let parent: &'a Word = scope[depth];
        let target = &parent.children[i];
        let mut target_scope = scope[..=depth].to_vec();
        target_scope.push(target);

        if target.kind == WordKind::Inline {
            if self.inline_stack.contains(&target.serial) {
                return Err(LinkError::RecursiveInline {
                    name: name.to_string(),
                    at: pos.clone(),
                });
            }
            self.inline_stack.push(target.serial);
            self.expand_ops(&target_scope, out)?;
            self.inline_stack.pop();
            return Ok(());
        }

        self.lift(&target_scope)?;
        out.push(LinkedOp {
            isa: self.isa.call(),
            operand: Some(Pending::Word {
                serial: target.serial,
                name: name.to_string(),
            }),
            pos: pos.clone(),
        });
        Ok(())
    }

    /// `\name`: lifts the whole table run around the target.
    fn expand_address_of(
        &mut self,
        scope: &[&'a Word],
        name: &str,
        pos: &Position,
        out: &mut Vec<LinkedOp>,
    ) -> Result<(), LinkError> {
        let (depth, i) = resolve(scope, name).ok_or_else(|| LinkError::WordNotFoundInScope {
            name: name.to_string(),
            at: pos.clone(),
        })?;
        let parent: &'a Word = scope[depth];
        let siblings = &parent.children;
        let target = &siblings[i];
        if target.kind != WordKind::Table {
            return Err(LinkError::TopLevelAddressOfNonTableWord {
                name: name.to_string(),
                at: pos.clone(),
            });
        }

        let (left, right) = table_run(siblings, i);
        // an inline definition splitting what reads as one table
        let kind_at = |k: Option<usize>| k.and_then(|k| siblings.get(k)).map(|w| w.kind);
        let before = left.checked_sub(1).map(|e| (e, e.checked_sub(1)));
        let after = Some((right + 1, Some(right + 2)));
        for (edge, beyond) in [before, after].into_iter().flatten() {
            if kind_at(Some(edge)) == Some(WordKind::Inline)
                && kind_at(beyond) == Some(WordKind::Table)
            {
                return Err(LinkError::InlineOfTableWord {
                    name: siblings[edge].name().to_string(),
                    at: pos.clone(),
                });
            }
        }

        let mut member_scope = scope[..=depth].to_vec();
        for member in &siblings[left..=right] {
            member_scope.push(member);
            self.lift(&member_scope)?;
            member_scope.pop();
        }

        out.push(LinkedOp {
            isa: self.isa.number(),
            operand: Some(Pending::Word {
                serial: target.serial,
                name: name.to_string(),
            }),
            pos: pos.clone(),
        });
        Ok(())
    }
}

/// Links the words reachable from every path accepted by `export`.
///
/// Output words are ordered by definition order (table runs kept dense);
/// exports list the predicate-matched roots and, as non-root entries, the
/// lifted words nested inside them.
pub fn link(root: &Word, export: &dyn Fn(&str) -> bool, mode: BuildMode) -> Result<Program, LinkError> {
    let mut tracer = Tracer::new(mode);
    let mut scope = vec![root];
    tracer.trace_exports(&mut scope, export)?;

    let roots = std::mem::take(&mut tracer.roots);
    let mut lifted = tracer.out;
    lifted.sort_by_key(|l| l.sort_key);

    let index_of: HashMap<u32, usize> = lifted
        .iter()
        .enumerate()
        .map(|(i, l)| (l.word.serial, i))
        .collect();

    // compacted opcode set
    let isa = Isa::get();
    let mut required_ids = HashSet::new();
    let mut required_other = HashSet::new();
    for l in &lifted {
        check_conditionals(l.ops.iter().map(|op| (op.isa, &op.pos)))?;
        check_loops(l.ops.iter().map(|op| (op.isa, &op.pos)))?;
        for op in &l.ops {
            let entry = isa.entry(op.isa);
            if entry.category == VmCategory::Id {
                required_ids.insert(entry.vm_id);
            } else {
                required_other.insert(op.isa);
            }
        }
    }
    let opcodes = OpcodeMap::from_fn(|i, e| {
        (e.category == VmCategory::Id
            && (e.is_static() || (mode.is_debug() && e.is_debug()) || required_ids.contains(e.vm_id)))
            || required_other.contains(&i)
    });
    check_section_order(&opcodes, SECTION_ORDER)?;

    let mut words = Vec::with_capacity(lifted.len());
    for l in &lifted {
        let mut instrs = Vec::with_capacity(l.ops.len());
        for op in &l.ops {
            let opcode = opcodes.opcode_of(op.isa).ok_or_else(|| LinkError::IsaOrderViolation {
                section: isa.entry(op.isa).vm_id.to_string(),
                index: op.isa,
            })?;
            let operand = match &op.operand {
                None => None,
                Some(Pending::Number(n)) => Some(Operand::Number(*n)),
                Some(Pending::Word { serial, name }) => {
                    let index = index_of.get(serial).ok_or_else(|| LinkError::UnresolvedWord {
                        name: name.clone(),
                        at: Some(op.pos.clone()),
                    })?;
                    Some(Operand::Word(*index))
                }
            };
            instrs.push(Instr { opcode, operand });
        }
        words.push(CompiledWord {
            path: l.path.clone(),
            instrs,
            positions: l.ops.iter().map(|op| op.pos.clone()).collect(),
            span: l.word.span.clone(),
        });
    }

    let root_paths: Vec<&str> = lifted
        .iter()
        .filter(|l| roots.contains(&l.word.serial))
        .map(|l| l.path.as_str())
        .collect();
    let exports: Vec<Export> = lifted
        .iter()
        .enumerate()
        .filter_map(|(index, l)| {
            let root = roots.contains(&l.word.serial);
            let nested = root_paths
                .iter()
                .any(|r| l.path.len() > r.len() && l.path.starts_with(r) && l.path[r.len()..].starts_with(':'));
            (root || nested).then(|| Export {
                index,
                path: l.path.clone(),
                root,
            })
        })
        .collect();

    debug!(
        words = words.len(),
        exports = exports.len(),
        opcodes = opcodes.len(),
        ?mode,
        "linked program"
    );

    Ok(Program {
        words,
        exports,
        opcodes,
        mode,
    })
}
