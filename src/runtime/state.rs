use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lang::{ArrayRef, Value};

use super::halt::VmException;

/// `(word index, op index)`. The op index may equal the word's length,
/// which addresses the implicit return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramCounter {
    pub word: usize,
    pub op: usize,
}

impl ProgramCounter {
    pub fn new(word: usize, op: usize) -> Self {
        Self { word, op }
    }
}

impl fmt::Display for ProgramCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.word, self.op)
    }
}

/// Return-stack entry: a call's return address, or loop bookkeeping left by
/// `times` (counter, start) and `do` (start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnFrame {
    Address(ProgramCounter),
    LoopScalar(i64),
}

pub type Tag = u32;

/// Tag attached by `_DTGRAPH`.
pub const GRAPH_TAG: Tag = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_stack_size: usize,
    pub max_return_depth: usize,
    pub max_globals: usize,
    /// Arrays a run may allocate; the arena never shrinks during a run.
    pub max_arrays: usize,
}

/// Stack value with arrays expanded and tags made visible, for debuggers.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugValue {
    Number(f64),
    Array(Vec<DebugValue>),
    Tagged { tag: Tag, value: Box<DebugValue> },
    /// An array already being expanded further up.
    Cyclic,
}

/// Complete mutable state of one VM run.
#[derive(Debug, Clone)]
pub struct VmState {
    /// `None` once the outermost word has returned.
    pub pc: Option<ProgramCounter>,
    pub stack: Vec<Value>,
    pub rstack: Vec<ReturnFrame>,
    pub globals: Vec<Value>,
    pub cycles: i64,
    pub(crate) arrays: Vec<Vec<Value>>,
    pub(crate) tags: HashMap<ArrayRef, Tag>,
    /// Set when `run` halted *before* executing the instruction at this
    /// counter; the next `run` executes it instead of halting again.
    pub(crate) parked: Option<ProgramCounter>,
    pub(crate) limits: Limits,
}

impl VmState {
    pub fn new(limits: Limits) -> Self {
        Self {
            pc: None,
            stack: Vec::new(),
            rstack: Vec::new(),
            globals: Vec::new(),
            cycles: 0,
            arrays: Vec::new(),
            tags: HashMap::new(),
            parked: None,
            limits,
        }
    }

    pub fn did_exit(&self) -> bool {
        self.pc.is_none()
    }

    pub fn can_run(&self) -> bool {
        self.pc.is_some() && self.cycles > 0
    }

    pub fn push(&mut self, v: Value) -> Result<(), VmException> {
        if self.stack.len() >= self.limits.max_stack_size {
            return Err(VmException::StackOverflow {
                limit: self.limits.max_stack_size,
            });
        }
        self.stack.push(v);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmException> {
        self.stack.pop().ok_or(VmException::StackUnderflow)
    }

    pub fn peek(&self) -> Result<Value, VmException> {
        self.stack.last().copied().ok_or(VmException::StackUnderflow)
    }

    pub fn pop_number(&mut self) -> Result<f64, VmException> {
        let v = self.pop()?;
        v.as_number().ok_or(VmException::TypeMismatch {
            expected: "number",
            got: v.type_name(),
        })
    }

    pub fn pop_array(&mut self) -> Result<ArrayRef, VmException> {
        let v = self.pop()?;
        v.as_array().ok_or(VmException::TypeMismatch {
            expected: "array",
            got: v.type_name(),
        })
    }

    pub fn peek_array(&self) -> Result<ArrayRef, VmException> {
        let v = self.peek()?;
        v.as_array().ok_or(VmException::TypeMismatch {
            expected: "array",
            got: v.type_name(),
        })
    }

    pub fn push_frame(&mut self, frame: ReturnFrame) -> Result<(), VmException> {
        if self.rstack.len() >= self.limits.max_return_depth {
            return Err(VmException::ReturnStackOverflow {
                limit: self.limits.max_return_depth,
            });
        }
        self.rstack.push(frame);
        Ok(())
    }

    pub fn new_array(&mut self, items: Vec<Value>) -> Result<ArrayRef, VmException> {
        let limit = self.limits.max_arrays.min(u32::MAX as usize);
        if self.arrays.len() >= limit {
            return Err(VmException::ArrayLimit {
                limit: self.limits.max_arrays,
            });
        }
        self.arrays.push(items);
        Ok(ArrayRef((self.arrays.len() - 1) as u32))
    }

    /// Panics on a handle from another state.
    pub fn array(&self, r: ArrayRef) -> &Vec<Value> {
        &self.arrays[r.0 as usize]
    }

    pub fn array_mut(&mut self, r: ArrayRef) -> &mut Vec<Value> {
        &mut self.arrays[r.0 as usize]
    }

    pub fn tag(&mut self, r: ArrayRef, tag: Tag) {
        self.tags.insert(r, tag);
    }

    pub fn tag_of(&self, r: ArrayRef) -> Option<Tag> {
        self.tags.get(&r).copied()
    }

    /// The global slot array grows on demand; unwritten slots read as 0.
    pub fn global(&self, index: usize) -> Value {
        self.globals.get(index).copied().unwrap_or(Value::Number(0.0))
    }

    pub fn set_global(&mut self, index: usize, v: Value) -> Result<(), VmException> {
        if index >= self.limits.max_globals {
            return Err(VmException::InvalidGlobal(index as f64));
        }
        if index >= self.globals.len() {
            self.globals.resize(index + 1, Value::Number(0.0));
        }
        self.globals[index] = v;
        Ok(())
    }

    pub fn expand(&self, v: Value) -> DebugValue {
        fn rec(state: &VmState, v: Value, open: &mut HashSet<ArrayRef>) -> DebugValue {
            let r = match v {
                Value::Number(n) => return DebugValue::Number(n),
                Value::Array(r) => r,
            };
            if !open.insert(r) {
                return DebugValue::Cyclic;
            }
            let items = state.array(r).iter().map(|x| rec(state, *x, open)).collect();
            open.remove(&r);
            let value = DebugValue::Array(items);
            match state.tag_of(r) {
                Some(tag) => DebugValue::Tagged {
                    tag,
                    value: Box::new(value),
                },
                None => value,
            }
        }
        rec(self, v, &mut HashSet::new())
    }

    pub fn tagged_stack(&self) -> Vec<DebugValue> {
        self.stack.iter().map(|v| self.expand(*v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> VmState {
        VmState::new(Limits {
            max_stack_size: 4,
            max_return_depth: 2,
            max_globals: 8,
            max_arrays: 4,
        })
    }

    #[test]
    fn test_stack_limits() {
        let mut s = state();
        for i in 0..4 {
            s.push(Value::Number(i as f64)).unwrap();
        }
        assert_eq!(
            s.push(Value::Number(9.0)),
            Err(VmException::StackOverflow { limit: 4 })
        );
        s.stack.clear();
        assert_eq!(s.pop(), Err(VmException::StackUnderflow));
    }

    #[test]
    fn test_array_limit() {
        let mut s = state();
        for _ in 0..4 {
            s.new_array(vec![]).unwrap();
        }
        assert_eq!(
            s.new_array(vec![]),
            Err(VmException::ArrayLimit { limit: 4 })
        );
        assert_eq!(s.arrays.len(), 4);
    }

    #[test]
    fn test_return_depth_limit() {
        let mut s = state();
        s.push_frame(ReturnFrame::LoopScalar(1)).unwrap();
        s.push_frame(ReturnFrame::LoopScalar(2)).unwrap();
        assert_eq!(
            s.push_frame(ReturnFrame::LoopScalar(3)),
            Err(VmException::ReturnStackOverflow { limit: 2 })
        );
    }

    #[test]
    fn test_pop_number_type_mismatch() {
        let mut s = state();
        let a = s.new_array(vec![]).unwrap();
        s.push(Value::Array(a)).unwrap();
        assert_eq!(
            s.pop_number(),
            Err(VmException::TypeMismatch {
                expected: "number",
                got: "array"
            })
        );
    }

    #[test]
    fn test_globals_default_and_grow() {
        let mut s = state();
        assert_eq!(s.global(5), Value::Number(0.0));
        s.set_global(3, Value::Number(7.0)).unwrap();
        assert_eq!(s.globals.len(), 4);
        assert_eq!(s.global(3), Value::Number(7.0));
        assert_eq!(s.set_global(8, Value::Number(1.0)), Err(VmException::InvalidGlobal(8.0)));
    }

    #[test]
    fn test_tagged_stack_expands_arrays() {
        let mut s = state();
        let inner = s.new_array(vec![Value::Number(42.0)]).unwrap();
        let outer = s.new_array(vec![Value::Array(inner), Value::Number(1.0)]).unwrap();
        s.tag(inner, GRAPH_TAG);
        s.push(Value::Array(outer)).unwrap();
        assert_eq!(
            s.tagged_stack(),
            vec![DebugValue::Array(vec![
                DebugValue::Tagged {
                    tag: GRAPH_TAG,
                    value: Box::new(DebugValue::Array(vec![DebugValue::Number(42.0)]))
                },
                DebugValue::Number(1.0),
            ])]
        );
    }

    #[test]
    fn test_tagged_stack_survives_self_reference() {
        let mut s = state();
        let a = s.new_array(vec![]).unwrap();
        s.array_mut(a).push(Value::Array(a));
        s.push(Value::Array(a)).unwrap();
        assert_eq!(
            s.tagged_stack(),
            vec![DebugValue::Array(vec![DebugValue::Cyclic])]
        );
    }
}
