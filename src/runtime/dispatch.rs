//! Opcode dispatch.
//!
//! A program's dispatch table is built section by section in
//! [`SECTION_ORDER`]. Within a section, kept entries are taken in catalog
//! order. The linker verifies that this walk visits the kept entries in
//! strictly ascending catalog order, so the n-th handler pushed is the
//! handler of opcode n.

use crate::bytecode::{CompiledWord, ISA, IsaEntry, OpcodeMap, Operand, SourceKind, VmCategory};
use crate::bytecode::isa::{OP_ELSE, OP_ENDIF, OP_IF, VM_ID_DEBUG, VM_ID_STATIC};
use crate::lang::Value;

use super::halt::{HaltingReason, VmException};
use super::state::{GRAPH_TAG, ProgramCounter, ReturnFrame, VmState};

/// One slice of the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// `Id` entries with this `vm_id`.
    Id(&'static str),
    /// Every entry of a generated category.
    Category(VmCategory),
}

impl Section {
    pub fn covers(&self, entry: &IsaEntry) -> bool {
        match *self {
            Section::Id(id) => entry.category == VmCategory::Id && entry.vm_id == id,
            Section::Category(c) => entry.category == c,
        }
    }

    pub fn name(&self) -> &'static str {
        match *self {
            Section::Id(id) => id,
            Section::Category(VmCategory::Id) => "ID",
            Section::Category(VmCategory::Infix) => "INFIX",
            Section::Category(VmCategory::Prefix) => "PREFIX",
            Section::Category(VmCategory::Math1) => "MATH1",
            Section::Category(VmCategory::LibraryWord) => "LIBRARY",
        }
    }
}

pub const SECTION_ORDER: &[Section] = &[
    Section::Id(VM_ID_STATIC),
    Section::Id("PUSH_IMM"),
    Section::Id("TIMES_LOOP"),
    Section::Id("DO_WHILE"),
    Section::Id("CALL_IMM"),
    Section::Id("CALL_POP"),
    Section::Id("pick"),
    Section::Id("drop"),
    Section::Id("nrot"),
    Section::Id("ntro"),
    Section::Category(VmCategory::Infix),
    Section::Category(VmCategory::Prefix),
    Section::Category(VmCategory::Math1),
    Section::Id("getglobal"),
    Section::Id("setglobal"),
    Section::Id("isnumber"),
    Section::Id("isarr"),
    Section::Id("arrnew"),
    Section::Id("arrlen"),
    Section::Id("arrpush"),
    Section::Id("arrpop"),
    Section::Id("arrunshift"),
    Section::Id("arrshift"),
    Section::Id("arrget"),
    Section::Id("arrset"),
    Section::Id("arrjoin"),
    Section::Id("arrsplit"),
    Section::Id(VM_ID_DEBUG),
];

#[derive(Debug)]
pub enum Flow {
    Continue,
    Halt(HaltingReason),
}

/// What a handler sees while executing one instruction.
pub struct Cpu<'a> {
    pub state: &'a mut VmState,
    pub words: &'a [CompiledWord],
    pub operand: Option<Operand>,
    /// Counter of the executing instruction, already advanced past it.
    pub pc: ProgramCounter,
    pub dump: &'a mut dyn FnMut(&VmState),
}

impl Cpu<'_> {
    fn goto_op(&mut self, op: usize) {
        self.state.pc = Some(ProgramCounter::new(self.pc.word, op));
    }

    fn call(&mut self, target: f64) -> Result<Flow, VmException> {
        let index = as_index(target)
            .filter(|&i| i < self.words.len())
            .ok_or(VmException::InvalidCallTarget(target))?;
        self.state.push_frame(ReturnFrame::Address(self.pc))?;
        self.state.pc = Some(ProgramCounter::new(index, 0));
        Ok(Flow::Continue)
    }

    /// Scans forward from the current counter to just past the matching
    /// `endif` (or `else`, with `stop_at_else`), honoring nesting.
    fn skip_conditional(&mut self, stop_at_else: bool) {
        let instrs = &self.words[self.pc.word].instrs;
        let mut op = self.pc.op;
        let mut depth = 0usize;
        loop {
            let Some(instr) = instrs.get(op) else {
                panic!(
                    "vm fault: conditional skip ran off the end of word {}",
                    self.pc.word
                );
            };
            op += 1;
            match instr.opcode {
                OP_IF => depth += 1,
                OP_ELSE if depth == 0 && stop_at_else => break,
                OP_ENDIF if depth == 0 => break,
                OP_ENDIF => depth -= 1,
                _ => {}
            }
        }
        self.goto_op(op);
    }

    /// Jump-back index saved by `times` or `do`, checked against the
    /// current word. An index of the word's length lands on its implicit
    /// return.
    fn loop_start(&self, saved: i64) -> Result<usize, VmException> {
        let len = self.words[self.pc.word].instrs.len();
        usize::try_from(saved)
            .ok()
            .filter(|&op| op <= len)
            .ok_or(VmException::MissingLoopFrame)
    }

    fn loop_scalar(&self, from_top: usize) -> Result<i64, VmException> {
        let len = self.state.rstack.len();
        match len.checked_sub(from_top + 1).map(|i| self.state.rstack[i]) {
            Some(ReturnFrame::LoopScalar(n)) => Ok(n),
            _ => Err(VmException::MissingLoopFrame),
        }
    }
}

pub type Handler = Box<dyn Fn(&mut Cpu<'_>) -> Result<Flow, VmException> + Send + Sync>;

fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut Cpu<'_>) -> Result<Flow, VmException> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Handlers indexed by compacted opcode.
pub struct DispatchTable {
    handlers: Vec<Handler>,
    names: Vec<&'static str>,
}

impl DispatchTable {
    /// Panics with a vm fault when `opcodes` cannot be walked in section
    /// order; linked programs never trigger this.
    pub fn build(opcodes: &OpcodeMap) -> Self {
        let mut handlers = Vec::with_capacity(opcodes.len());
        let mut names = Vec::with_capacity(opcodes.len());
        for section in SECTION_ORDER {
            for &i in opcodes.isa_indices() {
                let entry = &ISA[i];
                if !section.covers(entry) {
                    continue;
                }
                if opcodes.opcode_of(i) != Some(handlers.len() as u16) {
                    panic!(
                        "vm fault: '{}' would get handler {} out of opcode order",
                        entry.mnemonic(),
                        handlers.len()
                    );
                }
                handlers.push(handler_for(entry));
                names.push(entry.mnemonic());
            }
        }
        if handlers.len() != opcodes.len() {
            panic!(
                "vm fault: {} opcodes but {} handlers",
                opcodes.len(),
                handlers.len()
            );
        }
        Self { handlers, names }
    }

    pub fn get(&self, opcode: u16) -> Option<&Handler> {
        self.handlers.get(opcode as usize)
    }

    pub fn name(&self, opcode: u16) -> Option<&'static str> {
        self.names.get(opcode as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn handler_for(entry: &IsaEntry) -> Handler {
    match entry.category {
        VmCategory::Id => id_handler(entry),
        VmCategory::Infix => infix(entry.vm_id),
        VmCategory::Prefix => prefix(entry.vm_id),
        VmCategory::Math1 => math1(entry.vm_id),
        VmCategory::LibraryWord => panic!(
            "vm fault: library word '{}' reached the dispatch table",
            entry.token
        ),
    }
}

fn id_handler(entry: &IsaEntry) -> Handler {
    match (entry.source, entry.token) {
        (SourceKind::Number, _) => handler(push_imm),
        (SourceKind::Call, _) => handler(call_imm),
        (_, "return") => handler(op_return),
        (_, "if") => handler(op_if),
        (_, "else") => handler(op_else),
        (_, "endif") => handler(|_: &mut Cpu<'_>| Ok(Flow::Continue)),
        (_, "times") => handler(times),
        (_, "loop") => handler(op_loop),
        (_, "do") => handler(op_do),
        (_, "while") => handler(op_while),
        (_, "call") => handler(call_pop),
        (_, "pick") => handler(pick),
        (_, "drop") => handler(|cpu: &mut Cpu<'_>| cpu.state.pop().map(|_| Flow::Continue)),
        (_, "nrot") => handler(|cpu: &mut Cpu<'_>| rotate(cpu, true)),
        (_, "ntro") => handler(|cpu: &mut Cpu<'_>| rotate(cpu, false)),
        (_, "getglobal") => handler(getglobal),
        (_, "setglobal") => handler(setglobal),
        (_, "isnumber") => handler(|cpu: &mut Cpu<'_>| {
            let v = cpu.state.peek()?;
            push(cpu, Value::from_bool(v.as_number().is_some()))
        }),
        (_, "isarr") => handler(|cpu: &mut Cpu<'_>| {
            let v = cpu.state.peek()?;
            push(cpu, Value::from_bool(v.as_array().is_some()))
        }),
        (_, "arrnew") => handler(|cpu: &mut Cpu<'_>| {
            let a = cpu.state.new_array(Vec::new())?;
            push(cpu, Value::Array(a))
        }),
        (_, "arrlen") => handler(|cpu: &mut Cpu<'_>| {
            let a = cpu.state.peek_array()?;
            let len = cpu.state.array(a).len();
            push(cpu, Value::Number(len as f64))
        }),
        (_, "arrpush") => handler(|cpu: &mut Cpu<'_>| {
            let v = cpu.state.pop()?;
            let a = cpu.state.peek_array()?;
            cpu.state.array_mut(a).push(v);
            Ok(Flow::Continue)
        }),
        (_, "arrpop") => handler(|cpu: &mut Cpu<'_>| {
            let a = cpu.state.peek_array()?;
            let v = cpu.state.array_mut(a).pop().ok_or(VmException::EmptyArray)?;
            push(cpu, v)
        }),
        (_, "arrunshift") => handler(|cpu: &mut Cpu<'_>| {
            let v = cpu.state.pop()?;
            let a = cpu.state.peek_array()?;
            cpu.state.array_mut(a).insert(0, v);
            Ok(Flow::Continue)
        }),
        (_, "arrshift") => handler(|cpu: &mut Cpu<'_>| {
            let a = cpu.state.peek_array()?;
            let items = cpu.state.array_mut(a);
            if items.is_empty() {
                return Err(VmException::EmptyArray);
            }
            let v = items.remove(0);
            push(cpu, v)
        }),
        (_, "arrget") => handler(|cpu: &mut Cpu<'_>| {
            let n = cpu.state.pop_number()?;
            let a = cpu.state.peek_array()?;
            let items = cpu.state.array(a);
            let v = element_index(n, items.len()).map(|i| items[i])?;
            push(cpu, v)
        }),
        (_, "arrset") => handler(|cpu: &mut Cpu<'_>| {
            let v = cpu.state.pop()?;
            let n = cpu.state.pop_number()?;
            let a = cpu.state.peek_array()?;
            let items = cpu.state.array_mut(a);
            let i = element_index(n, items.len())?;
            items[i] = v;
            Ok(Flow::Continue)
        }),
        (_, "arrjoin") => handler(|cpu: &mut Cpu<'_>| {
            let b = cpu.state.pop_array()?;
            let a = cpu.state.peek_array()?;
            let tail = cpu.state.array(b).clone();
            cpu.state.array_mut(a).extend(tail);
            Ok(Flow::Continue)
        }),
        (_, "arrsplit") => handler(|cpu: &mut Cpu<'_>| {
            let n = cpu.state.pop_number()?;
            let a = cpu.state.peek_array()?;
            let len = cpu.state.array(a).len();
            let at = as_index(n)
                .filter(|&i| i <= len)
                .ok_or(VmException::IndexOutOfBounds { index: n, len })?;
            let tail = cpu.state.array(a)[at..].to_vec();
            let b = cpu.state.new_array(tail)?;
            cpu.state.array_mut(a).truncate(at);
            push(cpu, Value::Array(b))
        }),
        (_, "assert") => handler(|cpu: &mut Cpu<'_>| {
            let v = cpu.state.pop()?;
            Ok(if v.truthy() {
                Flow::Continue
            } else {
                Flow::Halt(HaltingReason::Assert)
            })
        }),
        (_, "dump") => handler(|cpu: &mut Cpu<'_>| {
            (cpu.dump)(&*cpu.state);
            Ok(Flow::Continue)
        }),
        (_, "brk") => handler(|_: &mut Cpu<'_>| Ok(Flow::Halt(HaltingReason::Brk))),
        (_, "_DTGRAPH") => handler(|cpu: &mut Cpu<'_>| {
            let a = cpu.state.peek_array()?;
            cpu.state.tag(a, GRAPH_TAG);
            Ok(Flow::Continue)
        }),
        (_, other) => panic!("vm fault: no handler for '{}'", other),
    }
}

fn push(cpu: &mut Cpu<'_>, v: Value) -> Result<Flow, VmException> {
    cpu.state.push(v)?;
    Ok(Flow::Continue)
}

/// Non-negative integral `n`, as an index.
fn as_index(n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0 && n <= usize::MAX as f64).then_some(n as usize)
}

fn element_index(n: f64, len: usize) -> Result<usize, VmException> {
    as_index(n)
        .filter(|&i| i < len)
        .ok_or(VmException::IndexOutOfBounds { index: n, len })
}

fn push_imm(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let v = match cpu.operand {
        Some(Operand::Number(n)) => n,
        Some(Operand::Word(i)) => i as f64,
        None => panic!("vm fault: push without operand at {}", cpu.pc),
    };
    push(cpu, Value::Number(v))
}

fn call_imm(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    match cpu.operand {
        Some(Operand::Word(i)) => cpu.call(i as f64),
        _ => panic!("vm fault: call without word operand at {}", cpu.pc),
    }
}

fn call_pop(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let target = cpu.state.pop_number()?;
    cpu.call(target)
}

/// Unwinds loop bookkeeping down to the nearest return address. An empty
/// return stack ends the run.
fn op_return(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    loop {
        match cpu.state.rstack.pop() {
            Some(ReturnFrame::LoopScalar(_)) => continue,
            Some(ReturnFrame::Address(pc)) => {
                cpu.state.pc = Some(pc);
                break;
            }
            None => {
                cpu.state.pc = None;
                break;
            }
        }
    }
    Ok(Flow::Continue)
}

fn op_if(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    if !cpu.state.pop()?.truthy() {
        cpu.skip_conditional(true);
    }
    Ok(Flow::Continue)
}

fn op_else(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    cpu.skip_conditional(false);
    Ok(Flow::Continue)
}

/// `( n -- )`, return stack `( -- n start )`.
fn times(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let n = cpu.state.pop_number()?;
    cpu.state.push_frame(ReturnFrame::LoopScalar(n as i64))?;
    cpu.state
        .push_frame(ReturnFrame::LoopScalar(cpu.pc.op as i64))?;
    Ok(Flow::Continue)
}

/// The body has run once per `times` count, and always at least once.
fn op_loop(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let start = cpu.loop_scalar(0)?;
    let counter = cpu.loop_scalar(1)? - 1;
    let len = cpu.state.rstack.len();
    if counter > 0 {
        let op = cpu.loop_start(start)?;
        cpu.state.rstack[len - 2] = ReturnFrame::LoopScalar(counter);
        cpu.goto_op(op);
    } else {
        cpu.state.rstack.truncate(len - 2);
    }
    Ok(Flow::Continue)
}

fn op_do(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    cpu.state
        .push_frame(ReturnFrame::LoopScalar(cpu.pc.op as i64))?;
    Ok(Flow::Continue)
}

fn op_while(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let start = cpu.loop_scalar(0)?;
    if cpu.state.pop()?.truthy() {
        let op = cpu.loop_start(start)?;
        cpu.goto_op(op);
    } else {
        cpu.state.rstack.pop();
    }
    Ok(Flow::Continue)
}

/// `( n -- v )`, `0 pick` copies the top.
fn pick(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let n = cpu.state.pop_number()?;
    let len = cpu.state.stack.len();
    let i = as_index(n)
        .and_then(|n| len.checked_sub(n + 1))
        .ok_or(VmException::StackUnderflow)?;
    let v = cpu.state.stack[i];
    push(cpu, v)
}

/// `nrot` brings the n-th cell from the top up to the top; `ntro` sends the
/// top down to n-th place.
fn rotate(cpu: &mut Cpu<'_>, up: bool) -> Result<Flow, VmException> {
    let n = cpu.state.pop_number()?;
    let len = cpu.state.stack.len();
    let start = as_index(n)
        .and_then(|n| len.checked_sub(n))
        .ok_or(VmException::StackUnderflow)?;
    let cells = &mut cpu.state.stack[start..];
    if !cells.is_empty() {
        if up {
            cells.rotate_left(1);
        } else {
            cells.rotate_right(1);
        }
    }
    Ok(Flow::Continue)
}

fn getglobal(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let n = cpu.state.pop_number()?;
    let i = as_index(n).ok_or(VmException::InvalidGlobal(n))?;
    let v = cpu.state.global(i);
    push(cpu, v)
}

fn setglobal(cpu: &mut Cpu<'_>) -> Result<Flow, VmException> {
    let v = cpu.state.pop()?;
    let n = cpu.state.pop_number()?;
    let i = as_index(n).ok_or(VmException::InvalidGlobal(n))?;
    cpu.state.set_global(i, v)?;
    Ok(Flow::Continue)
}

fn pop_operand(cpu: &mut Cpu<'_>) -> Result<f64, VmException> {
    cpu.state.pop_number()
}

/// JS-style ToInt32.
fn to_int32(x: f64) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    x.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn numeric_infix(spelling: &str) -> fn(f64, f64) -> f64 {
    match spelling {
        "+" => |a, b| a + b,
        "-" => |a, b| a - b,
        "*" => |a, b| a * b,
        "/" => |a, b| a / b,
        "%" => |a, b| a % b,
        "**" => f64::powf,
        "&" => |a, b| (to_int32(a) & to_int32(b)) as f64,
        "|" => |a, b| (to_int32(a) | to_int32(b)) as f64,
        "^" => |a, b| (to_int32(a) ^ to_int32(b)) as f64,
        "<<" => |a, b| to_int32(a).wrapping_shl(to_int32(b) as u32 & 31) as f64,
        ">>" => |a, b| to_int32(a).wrapping_shr(to_int32(b) as u32 & 31) as f64,
        ">" => |a, b| flag(a > b),
        ">=" => |a, b| flag(a >= b),
        "<" => |a, b| flag(a < b),
        "<=" => |a, b| flag(a <= b),
        other => panic!("vm fault: unknown infix operator '{}'", other),
    }
}

/// `( a b -- a op b )`.
fn infix(spelling: &'static str) -> Handler {
    match spelling {
        // Logical ops yield one of their operands; equality compares arrays
        // by identity.
        "&&" | "||" | "==" | "!=" => handler(move |cpu: &mut Cpu<'_>| {
            let b = cpu.state.pop()?;
            let a = cpu.state.pop()?;
            let v = match spelling {
                "&&" => if a.truthy() { b } else { a },
                "||" => if a.truthy() { a } else { b },
                "==" => Value::from_bool(a == b),
                _ => Value::from_bool(a != b),
            };
            push(cpu, v)
        }),
        _ => {
            let f = numeric_infix(spelling);
            handler(move |cpu: &mut Cpu<'_>| {
                let b = pop_operand(cpu)?;
                let a = pop_operand(cpu)?;
                push(cpu, Value::Number(f(a, b)))
            })
        }
    }
}

fn prefix(spelling: &'static str) -> Handler {
    match spelling {
        "!" => handler(|cpu: &mut Cpu<'_>| {
            let v = cpu.state.pop()?;
            push(cpu, Value::from_bool(!v.truthy()))
        }),
        "-" => handler(|cpu: &mut Cpu<'_>| {
            let v = pop_operand(cpu)?;
            push(cpu, Value::Number(-v))
        }),
        other => panic!("vm fault: unknown prefix operator '{}'", other),
    }
}

fn math_fn(name: &str) -> fn(f64) -> f64 {
    match name {
        "sqrt" => f64::sqrt,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "atan" => f64::atan,
        "log" => f64::ln,
        "log2" => f64::log2,
        "floor" => f64::floor,
        "ceil" => f64::ceil,
        // halves round up, as in JS
        "round" => |x| (x + 0.5).floor(),
        "sign" => |x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                x
            }
        },
        "abs" => f64::abs,
        other => panic!("vm fault: unknown math function '{}'", other),
    }
}

fn math1(name: &'static str) -> Handler {
    let f = math_fn(name);
    handler(move |cpu: &mut Cpu<'_>| {
        let v = pop_operand(cpu)?;
        push(cpu, Value::Number(f(v)))
    })
}
