use tracing::trace;

use crate::bytecode::isa::OP_RETURN;
use crate::bytecode::{Instr, Program};
use crate::lang::Position;

use super::breakpoints::Breakpoints;
use super::debug_error::DebugError;
use super::dispatch::{Cpu, DispatchTable, Flow};
use super::halt::{HaltingReason, VmException};
use super::state::{Limits, ProgramCounter, VmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Cycles granted to a freshly started state.
    pub cycle_budget: i64,
    pub max_stack_size: usize,
    pub max_return_depth: usize,
    pub max_globals: usize,
    pub max_arrays: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            cycle_budget: 100_000_000,
            max_stack_size: 1_048_576,
            max_return_depth: 65_536,
            max_globals: 65_536,
            max_arrays: 1_048_576,
        }
    }
}

impl VmConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            max_stack_size: self.max_stack_size,
            max_return_depth: self.max_return_depth,
            max_globals: self.max_globals,
            max_arrays: self.max_arrays,
        }
    }
}

const IMPLICIT_RETURN: Instr = Instr {
    opcode: OP_RETURN,
    operand: None,
};

/// A linked program together with its dispatch table and breakpoints.
///
/// The program itself is never mutated; any number of [`VmState`]s can run
/// against one machine.
pub struct Machine {
    program: Program,
    dispatch: DispatchTable,
    breakpoints: Breakpoints,
}

impl Machine {
    pub fn new(program: Program) -> Self {
        let dispatch = DispatchTable::build(&program.opcodes);
        let breakpoints = Breakpoints::for_program(&program);
        Self {
            program,
            dispatch,
            breakpoints,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn set_breakpoint(&mut self, pc: ProgramCounter) -> Result<(), DebugError> {
        self.breakpoints.set(pc)
    }

    pub fn remove_breakpoint(&mut self, pc: ProgramCounter) -> Result<(), DebugError> {
        self.breakpoints.remove(pc)
    }

    /// A state positioned at the first instruction of export `export`.
    pub fn start(&self, export: usize, config: &VmConfig) -> Result<VmState, DebugError> {
        let e = self
            .program
            .export(export)
            .ok_or(DebugError::NoSuchExport(export))?;
        let mut state = VmState::new(config.limits());
        state.pc = Some(ProgramCounter::new(e.index, 0));
        state.cycles = config.cycle_budget;
        Ok(state)
    }

    fn fetch(&self, pc: ProgramCounter) -> Instr {
        let Some(word) = self.program.words.get(pc.word) else {
            panic!("vm fault: word {} is outside the program", pc.word);
        };
        match word.instrs.get(pc.op) {
            Some(instr) => *instr,
            None if pc.op == word.instrs.len() => IMPLICIT_RETURN,
            None => panic!("vm fault: {} is past the end of '{}'", pc, word.path),
        }
    }

    /// Executes exactly one instruction. Does not touch the cycle counter
    /// or consult breakpoints.
    pub fn step(
        &self,
        state: &mut VmState,
        dump: &mut dyn FnMut(&VmState),
    ) -> Result<Flow, VmException> {
        let Some(pc) = state.pc else {
            return Ok(Flow::Halt(HaltingReason::End));
        };
        let instr = self.fetch(pc);
        let next = ProgramCounter::new(pc.word, pc.op + 1);
        state.pc = Some(next);

        let Some(handler) = self.dispatch.get(instr.opcode) else {
            panic!("vm fault: opcode {} has no handler", instr.opcode);
        };
        trace!(%pc, op = ?self.dispatch.name(instr.opcode), "step");
        let mut cpu = Cpu {
            state,
            words: &self.program.words,
            operand: instr.operand,
            pc: next,
            dump,
        };
        handler(&mut cpu)
    }

    pub fn run(&self, state: &mut VmState, target: Option<ProgramCounter>) -> HaltingReason {
        self.run_with(state, target, &mut |_: &VmState| {})
    }

    /// Runs until something halts execution.
    ///
    /// `target` is a temporary breakpoint. Neither it nor a persistent
    /// breakpoint fires again at the counter `state` last halted in front
    /// of, so calling `run` repeatedly always makes progress.
    pub fn run_with(
        &self,
        state: &mut VmState,
        target: Option<ProgramCounter>,
        dump: &mut dyn FnMut(&VmState),
    ) -> HaltingReason {
        let mut resume = state.parked.take();
        loop {
            let Some(pc) = state.pc else {
                return HaltingReason::End;
            };
            if state.cycles <= 0 {
                state.parked = resume.filter(|r| *r == pc);
                return HaltingReason::OutOfGas;
            }
            if resume.take() != Some(pc) {
                if target == Some(pc) {
                    state.parked = Some(pc);
                    return HaltingReason::UsrBrk;
                }
                if self.breakpoints.is_set(pc) {
                    state.parked = Some(pc);
                    return HaltingReason::Brk;
                }
            }

            state.cycles -= 1;
            match self.step(state, dump) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt(reason)) => return reason,
                Err(e) => return HaltingReason::Exception(e),
            }
        }
    }

    /// Position of the most recently executed instruction of the current
    /// word, if there is one.
    pub fn current_position(&self, state: &VmState) -> Option<&Position> {
        let pc = state.pc?;
        let op = pc.op.checked_sub(1)?;
        self.program.words.get(pc.word)?.positions.get(op)
    }

    pub fn position_human(&self, state: &VmState) -> String {
        match self.current_position(state) {
            Some(pos) => pos.to_string(),
            None => "???".to_string(),
        }
    }
}
