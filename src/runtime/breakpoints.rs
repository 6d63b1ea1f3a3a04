use crate::bytecode::Program;

use super::debug_error::DebugError;
use super::state::ProgramCounter;

/// Persistent breakpoints of one program.
///
/// Kept beside the instruction stream rather than patched into it, so
/// clearing a breakpoint can never corrupt the program. Every word has one
/// slot per instruction plus one for its implicit return.
#[derive(Debug, Clone, Default)]
pub struct Breakpoints {
    slots: Vec<Vec<bool>>,
    count: usize,
}

impl Breakpoints {
    pub fn for_program(program: &Program) -> Self {
        Self {
            slots: program
                .words
                .iter()
                .map(|w| vec![false; w.instrs.len() + 1])
                .collect(),
            count: 0,
        }
    }

    pub fn is_set(&self, pc: ProgramCounter) -> bool {
        self.count > 0
            && self
                .slots
                .get(pc.word)
                .and_then(|w| w.get(pc.op))
                .copied()
                .unwrap_or(false)
    }

    fn slot(&mut self, pc: ProgramCounter) -> Result<&mut bool, DebugError> {
        self.slots
            .get_mut(pc.word)
            .and_then(|w| w.get_mut(pc.op))
            .ok_or(DebugError::InvalidProgramCounter(pc))
    }

    pub fn set(&mut self, pc: ProgramCounter) -> Result<(), DebugError> {
        let slot = self.slot(pc)?;
        if *slot {
            return Err(DebugError::BreakpointAlreadySet(pc));
        }
        *slot = true;
        self.count += 1;
        Ok(())
    }

    pub fn remove(&mut self, pc: ProgramCounter) -> Result<(), DebugError> {
        let slot = self.slot(pc)?;
        if !*slot {
            return Err(DebugError::NoBreakpoint(pc));
        }
        *slot = false;
        self.count -= 1;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|w| w.fill(false));
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = ProgramCounter> + '_ {
        self.slots.iter().enumerate().flat_map(|(word, ops)| {
            ops.iter()
                .enumerate()
                .filter(|(_, set)| **set)
                .map(move |(op, _)| ProgramCounter::new(word, op))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BuildMode, compile_str};

    fn program() -> Program {
        compile_str("t.4st", ":main 1 2 ;", BuildMode::Debug)
            .unwrap()
            .trace(|p| p == "main")
            .unwrap()
    }

    #[test]
    fn test_set_and_remove() {
        let mut bps = Breakpoints::for_program(&program());
        let pc = ProgramCounter::new(0, 1);
        assert!(!bps.is_set(pc));
        bps.set(pc).unwrap();
        assert!(bps.is_set(pc));
        assert_eq!(bps.set(pc), Err(DebugError::BreakpointAlreadySet(pc)));
        assert_eq!(bps.iter().collect::<Vec<_>>(), vec![pc]);
        bps.remove(pc).unwrap();
        assert!(bps.is_empty());
        assert_eq!(bps.remove(pc), Err(DebugError::NoBreakpoint(pc)));
    }

    #[test]
    fn test_implicit_return_slot() {
        let mut bps = Breakpoints::for_program(&program());
        assert!(bps.set(ProgramCounter::new(0, 2)).is_ok());
        let past = ProgramCounter::new(0, 3);
        assert_eq!(bps.set(past), Err(DebugError::InvalidProgramCounter(past)));
        let nowhere = ProgramCounter::new(7, 0);
        assert_eq!(bps.set(nowhere), Err(DebugError::InvalidProgramCounter(nowhere)));
    }

    #[test]
    fn test_clear() {
        let mut bps = Breakpoints::for_program(&program());
        bps.set(ProgramCounter::new(0, 0)).unwrap();
        bps.set(ProgramCounter::new(0, 1)).unwrap();
        assert_eq!(bps.len(), 2);
        bps.clear();
        assert!(bps.is_empty());
        assert!(!bps.is_set(ProgramCounter::new(0, 0)));
    }
}
