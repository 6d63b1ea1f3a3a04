//! Deep copies of a [`VmState`].
//!
//! Array identity and tags are keyed by arena slot, which means nothing
//! outside the state they came from. A snapshot therefore renumbers every
//! reachable array into its own table and stores each array's tag beside
//! its items; restoring builds fresh arena slots and re-keys the tags. Arrays
//! shared between several stack cells or globals stay shared after the
//! round trip.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lang::{ArrayRef, Value};

use super::state::{ProgramCounter, ReturnFrame, Tag, VmState};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] postcard::Error),

    #[error("failed to decode snapshot: {0}")]
    Decode(#[source] postcard::Error),

    #[error("snapshot refers to array {index} but holds only {len}")]
    DanglingArray { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SnapValue {
    Number(f64),
    /// Index into [`Snapshot::arrays`].
    Array(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapArray {
    pub tag: Option<Tag>,
    pub items: Vec<SnapValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub pc: Option<ProgramCounter>,
    pub cycles: i64,
    pub stack: Vec<SnapValue>,
    pub rstack: Vec<ReturnFrame>,
    pub globals: Vec<SnapValue>,
    pub arrays: Vec<SnapArray>,
    pub parked: Option<ProgramCounter>,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistError> {
        postcard::to_allocvec(self).map_err(PersistError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistError> {
        let snap: Snapshot = postcard::from_bytes(bytes).map_err(PersistError::Decode)?;
        snap.validate()?;
        Ok(snap)
    }

    fn validate(&self) -> Result<(), PersistError> {
        let len = self.arrays.len();
        let items = self.arrays.iter().flat_map(|a| a.items.iter());
        for v in self.stack.iter().chain(&self.globals).chain(items) {
            if let SnapValue::Array(index) = *v {
                if index >= len {
                    return Err(PersistError::DanglingArray { index, len });
                }
            }
        }
        Ok(())
    }
}

struct Capture<'s> {
    state: &'s VmState,
    ids: HashMap<ArrayRef, usize>,
    arrays: Vec<SnapArray>,
}

impl Capture<'_> {
    fn value(&mut self, v: Value) -> SnapValue {
        match v {
            Value::Number(n) => SnapValue::Number(n),
            Value::Array(r) => SnapValue::Array(self.array(r)),
        }
    }

    fn array(&mut self, r: ArrayRef) -> usize {
        if let Some(&id) = self.ids.get(&r) {
            return id;
        }
        let id = self.arrays.len();
        self.ids.insert(r, id);
        self.arrays.push(SnapArray {
            tag: self.state.tag_of(r),
            items: Vec::new(),
        });
        let state = self.state;
        let items = state.array(r).iter().map(|v| self.value(*v)).collect();
        self.arrays[id].items = items;
        id
    }
}

impl VmState {
    /// Captures everything `restore` needs. Arrays unreachable from the
    /// stack and globals are dropped.
    pub fn snapshot(&self) -> Snapshot {
        let mut cap = Capture {
            state: self,
            ids: HashMap::new(),
            arrays: Vec::new(),
        };
        let stack = self.stack.iter().map(|v| cap.value(*v)).collect();
        let globals = self.globals.iter().map(|v| cap.value(*v)).collect();
        Snapshot {
            pc: self.pc,
            cycles: self.cycles,
            stack,
            rstack: self.rstack.clone(),
            globals,
            arrays: cap.arrays,
            parked: self.parked,
        }
    }

    /// Replaces this state's contents with `snap`. Limits are kept.
    pub fn restore(&mut self, snap: &Snapshot) {
        let value = |v: &SnapValue| match *v {
            SnapValue::Number(n) => Value::Number(n),
            SnapValue::Array(i) => Value::Array(ArrayRef(i as u32)),
        };
        self.arrays = snap
            .arrays
            .iter()
            .map(|a| a.items.iter().map(value).collect())
            .collect();
        self.tags = snap
            .arrays
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.tag.map(|t| (ArrayRef(i as u32), t)))
            .collect();
        self.stack = snap.stack.iter().map(value).collect();
        self.globals = snap.globals.iter().map(value).collect();
        self.rstack = snap.rstack.clone();
        self.pc = snap.pc;
        self.cycles = snap.cycles;
        self.parked = snap.parked;
    }
}
