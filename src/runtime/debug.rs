//! Debug session controller.
//!
//! Stepping backwards relies on execution being a pure function of the
//! program and the initial state: the session keeps a snapshot taken at
//! [`DebugSession::start`] and replays forward from it to any earlier cycle
//! count. The dump callback is not invoked during replay.

use tracing::debug;

use crate::bytecode::{Operand, Program, SourceKind};
use crate::lang::{Position, Value};

use super::debug_error::DebugError;
use super::halt::HaltingReason;
use super::snapshot::Snapshot;
use super::state::{DebugValue, ProgramCounter, ReturnFrame, VmState};
use super::vm::{Machine, VmConfig};

/// Result of a bounded step.
#[derive(Debug, Clone, PartialEq)]
pub enum Stepped {
    /// The requested number of cycles ran.
    Completed,
    /// Execution stopped early.
    Halted(HaltingReason),
}

pub type DumpCallback = Box<dyn FnMut(&VmState)>;

/// Maps a source position to the instruction a breakpoint there stops in
/// front of.
///
/// Picks the innermost compiled word whose span contains the position, then
/// that word's first instruction positioned at or after it. With no such
/// instruction the breakpoint lands on the word's implicit return.
pub fn resolve_breakpoint(
    program: &Program,
    file: &str,
    line: u32,
    col: u32,
) -> Result<ProgramCounter, DebugError> {
    let innermost = program
        .words
        .iter()
        .enumerate()
        .filter_map(|(i, w)| w.span.as_ref().map(|s| (i, w, s)))
        .filter(|(_, _, s)| s.contains(file, line, col))
        .max_by(|(_, _, a), (_, _, b)| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    let Some((index, word, span)) = innermost else {
        return Err(DebugError::NoWordAt {
            file: file.to_string(),
            line,
            col,
        });
    };

    let op = word
        .positions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.start() >= (line, col) && span.contains(&p.file, p.line, p.col_start))
        .min_by_key(|(i, p)| (p.start(), *i))
        .map(|(i, _)| i)
        .unwrap_or(word.instrs.len());
    Ok(ProgramCounter::new(index, op))
}

/// One program, one VM state, and everything needed to move that state
/// back and forth.
pub struct DebugSession {
    machine: Machine,
    config: VmConfig,
    state: VmState,
    initial: Option<Snapshot>,
    /// Counter value at which zero cycles count as used.
    base: i64,
    dump: Option<DumpCallback>,
}

impl DebugSession {
    pub fn new(program: Program, config: VmConfig) -> Self {
        Self::with_machine(Machine::new(program), config)
    }

    pub fn with_machine(machine: Machine, config: VmConfig) -> Self {
        Self {
            machine,
            state: VmState::new(config.limits()),
            config,
            initial: None,
            base: 0,
            dump: None,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn program(&self) -> &Program {
        self.machine.program()
    }

    pub fn state(&self) -> &VmState {
        &self.state
    }

    /// Positions the state at export `export` with a full cycle budget and
    /// takes the snapshot backward steps replay from.
    pub fn start(&mut self, export: usize) -> Result<(), DebugError> {
        self.state = self.machine.start(export, &self.config)?;
        self.base = self.state.cycles;
        self.initial = Some(self.state.snapshot());
        debug!(export, budget = self.base, "debug session started");
        Ok(())
    }

    pub fn cycle_counter(&self) -> i64 {
        self.state.cycles
    }

    /// Replaces the remaining budget without changing `cycles_used`.
    pub fn set_cycle_counter(&mut self, cycles: i64) {
        self.base += cycles - self.state.cycles;
        self.state.cycles = cycles;
    }

    pub fn cycles_used(&self) -> i64 {
        self.base - self.state.cycles
    }

    pub fn set_dump_callback(&mut self, f: impl FnMut(&VmState) + 'static) {
        self.dump = Some(Box::new(f));
    }

    pub fn clear_dump_callback(&mut self) {
        self.dump = None;
    }

    pub fn set_breakpoint(&mut self, pc: ProgramCounter) -> Result<(), DebugError> {
        self.machine.set_breakpoint(pc)
    }

    pub fn remove_breakpoint(&mut self, pc: ProgramCounter) -> Result<(), DebugError> {
        self.machine.remove_breakpoint(pc)
    }

    pub fn resolve_breakpoint(
        &self,
        file: &str,
        line: u32,
        col: u32,
    ) -> Result<ProgramCounter, DebugError> {
        resolve_breakpoint(self.program(), file, line, col)
    }

    pub fn run(&mut self) -> HaltingReason {
        self.run_to(None)
    }

    /// Runs with `target` as a temporary breakpoint.
    pub fn run_to(&mut self, target: Option<ProgramCounter>) -> HaltingReason {
        let reason = match self.dump.as_mut() {
            Some(cb) => self.machine.run_with(&mut self.state, target, cb.as_mut()),
            None => self.machine.run(&mut self.state, target),
        };
        debug!(%reason, used = self.cycles_used(), "halted");
        reason
    }

    /// Runs at most `cap` cycles, then puts back whatever of the real budget
    /// was not consumed.
    fn run_capped(&mut self, cap: i64, replay: bool) -> HaltingReason {
        let saved = self.state.cycles;
        let cap = cap.min(saved);
        self.state.cycles = cap;
        let reason = if replay {
            self.machine.run(&mut self.state, None)
        } else {
            self.run_to(None)
        };
        let consumed = cap - self.state.cycles;
        self.state.cycles = saved - consumed;
        reason
    }

    /// Executes `n` more cycles. Breaks along the way are stepped through;
    /// during replay so are assertion failures and exceptions, since the
    /// history being replayed continued past them.
    fn advance(&mut self, n: i64, replay: bool) -> Stepped {
        let goal = self.cycles_used() + n;
        loop {
            let remaining = goal - self.cycles_used();
            if remaining <= 0 {
                return Stepped::Completed;
            }
            let reason = self.run_capped(remaining, replay);
            match reason {
                HaltingReason::End => return Stepped::Halted(reason),
                HaltingReason::Assert | HaltingReason::Exception(_) if !replay => {
                    return Stepped::Halted(reason);
                }
                HaltingReason::OutOfGas
                    if self.state.cycles <= 0 && self.cycles_used() < goal =>
                {
                    return Stepped::Halted(reason);
                }
                _ => {}
            }
        }
    }

    fn rewind(&mut self) -> Result<(), DebugError> {
        let initial = self.initial.as_ref().ok_or(DebugError::NotStarted)?;
        self.state.restore(initial);
        self.state.cycles = self.base;
        Ok(())
    }

    /// Moves `n` cycles forward, or `-n` cycles back by replaying from the
    /// start. Stepping back past the start stops at the start.
    pub fn single_step(&mut self, n: i64) -> Result<Stepped, DebugError> {
        if n >= 0 {
            return Ok(self.advance(n, false));
        }
        let goal = (self.cycles_used() + n).max(0);
        self.rewind()?;
        Ok(self.advance(goal, true))
    }

    /// `direction > 0` runs to the next halt. `direction < 0` replays to the
    /// latest break before the current cycle and returns `None`, leaving
    /// the state untouched, when there is none.
    pub fn goto_brk(&mut self, direction: i32) -> Result<Option<HaltingReason>, DebugError> {
        if direction >= 0 {
            return Ok(Some(self.run()));
        }

        let here = self.state.snapshot();
        let current = self.cycles_used();
        self.rewind()?;
        let mut last = None;
        loop {
            let remaining = current - self.cycles_used();
            if remaining <= 0 {
                break;
            }
            match self.run_capped(remaining, true) {
                HaltingReason::Brk if self.cycles_used() < current => {
                    last = Some(self.state.snapshot());
                }
                HaltingReason::End => break,
                HaltingReason::OutOfGas if self.state.cycles <= 0 => break,
                _ => {}
            }
        }

        match last {
            Some(snap) => {
                self.state.restore(&snap);
                Ok(Some(HaltingReason::Brk))
            }
            None => {
                self.state.restore(&here);
                Ok(None)
            }
        }
    }

    /// Steps over a call: runs until control is back just past the call
    /// instruction in the same or a shallower frame. Any other instruction
    /// is single-stepped.
    pub fn step_over(&mut self) -> Result<Stepped, DebugError> {
        let Some(pc) = self.state.pc else {
            return Ok(Stepped::Halted(HaltingReason::End));
        };
        let program = self.program();
        let is_call = program
            .words
            .get(pc.word)
            .and_then(|w| w.instrs.get(pc.op))
            .is_some_and(|instr| match program.opcodes.entry(instr.opcode) {
                Some(e) if e.source == SourceKind::Call => {
                    matches!(instr.operand, Some(Operand::Word(_)))
                }
                Some(e) => e.token == "call",
                None => false,
            });
        if !is_call {
            return self.single_step(1);
        }

        let after = ProgramCounter::new(pc.word, pc.op + 1);
        let depth = self.state.rstack.len();
        let added = self.machine.set_breakpoint(after).is_ok();
        let outcome = loop {
            match self.run() {
                HaltingReason::Brk
                    if self.state.pc == Some(after) && self.state.rstack.len() <= depth =>
                {
                    break Stepped::Completed;
                }
                HaltingReason::Brk => {}
                other => break Stepped::Halted(other),
            }
        };
        if added {
            self.machine.remove_breakpoint(after)?;
        }
        Ok(outcome)
    }

    pub fn save_snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    pub fn restore_snapshot(&mut self, snap: &Snapshot) {
        self.state.restore(snap);
    }

    pub fn current_position(&self) -> Option<&Position> {
        self.machine.current_position(&self.state)
    }

    pub fn position_human(&self) -> String {
        self.machine.position_human(&self.state)
    }

    pub fn stack(&self) -> &[Value] {
        &self.state.stack
    }

    pub fn rstack(&self) -> &[ReturnFrame] {
        &self.state.rstack
    }

    pub fn tagged_stack(&self) -> Vec<DebugValue> {
        self.state.tagged_stack()
    }

    pub fn did_exit(&self) -> bool {
        self.state.did_exit()
    }

    pub fn can_run(&self) -> bool {
        self.state.can_run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BuildMode, compile_str};
    use crate::runtime::markers::{MarkedSource, strip_breakpoint_markers};
    use crate::runtime::state::GRAPH_TAG;
    use std::cell::RefCell;
    use std::rc::Rc;

    const FILE: &str = "<test.4st>";

    struct Prepared {
        session: DebugSession,
        marked: MarkedSource,
    }

    impl Prepared {
        fn ubrk(&self, id: u32) -> ProgramCounter {
            let (line, col) = self.marked.marker(id).unwrap();
            self.session.resolve_breakpoint(FILE, line, col).unwrap()
        }

        fn run_until_ubrk(&mut self, id: u32) {
            let pc = self.ubrk(id);
            assert_eq!(self.session.run_to(Some(pc)), HaltingReason::UsrBrk);
        }

        fn run_until_brk(&mut self) {
            assert_eq!(self.session.run(), HaltingReason::Brk);
        }

        fn run_until_end(&mut self) {
            assert_eq!(self.session.run(), HaltingReason::End);
            assert!(!self.session.can_run());
        }

        fn step(&mut self, n: i64) {
            assert_eq!(self.session.single_step(n).unwrap(), Stepped::Completed);
        }

        fn stack(&self) -> Vec<f64> {
            self.session
                .stack()
                .iter()
                .map(|v| v.as_number().unwrap())
                .collect()
        }

        fn cycles(&self) -> i64 {
            self.session.cycles_used()
        }
    }

    fn prep(tagged: &str) -> Prepared {
        let marked = strip_breakpoint_markers(tagged).unwrap();
        let program = compile_str(FILE, &marked.source, BuildMode::Debug)
            .unwrap()
            .trace(|p| p == "main")
            .unwrap();
        let mut session = DebugSession::new(program, VmConfig::default());
        session.start(0).unwrap();
        session.set_cycle_counter(10_000);
        Prepared { session, marked }
    }

    #[test]
    fn test_cycle_accounting() {
        let cases: &[(i64, u32, &str, &[f64])] = &[
            (1, 0, "", &[]),
            (2, 0, "69", &[69.0]),
            (3, 0, "69 42", &[69.0, 42.0]),
            (4, 0, ":w0rd 790 ; w0rd", &[790.0]),
            (2, 1, "(UBRK0)69", &[69.0]),
            (3, 2, "(UBRK0)69 (UBRK1)42", &[69.0, 42.0]),
            (4, 1, ":w0rd (UBRK0)790 ; w0rd", &[790.0]),
            (4, 1, ":w0rd 790 ; (UBRK0)w0rd", &[790.0]),
            (4, 1, ":w0rd (UBRK0) 790 ; w0rd", &[790.0]),
            (4, 1, ":w0rd 790 ; (UBRK0) w0rd", &[790.0]),
        ];
        for &(cycles, breaks, body, stack) in cases {
            let mut t = prep(&format!(":main {} ;", body));
            for i in 0..breaks {
                t.run_until_ubrk(i);
            }
            t.run_until_end();
            assert_eq!(t.cycles(), cycles, "{}", body);
            assert_eq!(t.stack(), stack, "{}", body);
        }
    }

    #[test]
    fn test_cycles_counted_at_the_breakpoint() {
        let mut t = prep(":main 1 2 (UBRK0)3 4 5 ;");
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![1.0, 2.0]);
        assert_eq!(t.cycles(), 2);
        t.run_until_end();
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(t.cycles(), 6);
    }

    #[test]
    fn test_breakpoints_on_separate_lines() {
        let mut t = prep(
            "
            :main
               111 222
               (UBRK0)333
               444 555
               (UBRK1)666
               777 888
            ;
            ",
        );
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![111.0, 222.0]);
        t.run_until_ubrk(1);
        assert_eq!(t.stack(), vec![111.0, 222.0, 333.0, 444.0, 555.0]);
        t.run_until_end();
        assert_eq!(
            t.stack(),
            vec![111.0, 222.0, 333.0, 444.0, 555.0, 666.0, 777.0, 888.0]
        );
    }

    #[test]
    fn test_several_breakpoints_on_one_line() {
        let mut t = prep(
            "
            :main
            (UBRK0)0 (UBRK1)1 (UBRK2)2 (UBRK3)3
            69
            ;
            ",
        );
        let mut expected = Vec::new();
        for i in 0..4 {
            t.run_until_ubrk(i);
            assert_eq!(t.stack(), expected);
            expected.push(i as f64);
        }
        t.run_until_end();
        expected.push(69.0);
        assert_eq!(t.stack(), expected);
    }

    #[test]
    fn test_breakpoint_between_tokens() {
        let mut t = prep(
            "
            :main
               0 (UBRK0) 1 (UBRK1)2 3
               1 if 69 else 666 endif (UBRK2) 420
               0 if 69 else 666 endif (UBRK3) 420
            ;
            ",
        );
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![0.0]);
        t.run_until_ubrk(1);
        assert_eq!(t.stack(), vec![0.0, 1.0]);
        t.run_until_ubrk(2);
        assert_eq!(t.stack(), vec![0.0, 1.0, 2.0, 3.0, 69.0]);
        t.run_until_ubrk(3);
        assert_eq!(t.stack(), vec![0.0, 1.0, 2.0, 3.0, 69.0, 420.0, 666.0]);
        t.run_until_end();
        assert_eq!(
            t.stack(),
            vec![0.0, 1.0, 2.0, 3.0, 69.0, 420.0, 666.0, 420.0]
        );
    }

    #[test]
    fn test_breakpoint_at_start_of_word() {
        for src in [
            ":main\n   (UBRK0)1 2 3\n;",
            ":main\n   (UBRK0)\n   1 2 3\n;",
        ] {
            let mut t = prep(src);
            t.run_until_ubrk(0);
            assert!(t.stack().is_empty());
            t.run_until_end();
            assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
        }
    }

    #[test]
    fn test_breakpoint_at_end_of_word() {
        let mut t = prep(":main\n   1 2 (UBRK0)3\n;");
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![1.0, 2.0]);
        t.run_until_end();
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);

        let mut t = prep(":w0rd\n   3\n;\n:main\n   1 2 (UBRK0)w0rd\n;");
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![1.0, 2.0]);
        t.run_until_end();
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);

        // lands on the implicit return
        let mut t = prep(":main\n   1 2 3 (UBRK0)\n;");
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
        t.run_until_end();
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_breakpoints_in_nested_word() {
        let cases: &[(&str, &[f64], &[f64])] = &[
            (":w0rd (UBRK1)790 ; (UBRK0)w0rd", &[], &[790.0]),
            (":w0rd 790 (UBRK1) 69 ; (UBRK0)w0rd", &[790.0], &[790.0, 69.0]),
            (":w0rd 790 (UBRK1)69 ; (UBRK0)w0rd", &[790.0], &[790.0, 69.0]),
            (":w0rd 790 69 (UBRK1) ; (UBRK0)w0rd", &[790.0, 69.0], &[790.0, 69.0]),
            (":w0rd (UBRK1) 790 ; (UBRK0)w0rd", &[], &[790.0]),
            (":w0rd (UBRK1)790 ; (UBRK0) w0rd", &[], &[790.0]),
            (":w0rd (UBRK1) 790 ; (UBRK0) w0rd", &[], &[790.0]),
        ];
        for &(body, at_inner, at_end) in cases {
            let mut t = prep(&format!(":main\n   {}\n;", body));
            t.run_until_ubrk(0);
            assert!(t.stack().is_empty(), "{}", body);
            t.run_until_ubrk(1);
            assert_eq!(t.stack(), at_inner, "{}", body);
            t.run_until_end();
            assert_eq!(t.stack(), at_end, "{}", body);
        }
    }

    #[test]
    fn test_breakpoints_in_conditionals() {
        let cases: &[(&str, &[&[f64]])] = &[
            ("1 if 420 else 666 endif", &[&[420.0]]),
            ("1 if (UBRK0)420 else 666 endif", &[&[], &[420.0]]),
            ("1 if 420 (UBRK0) else 666 endif", &[&[420.0], &[420.0]]),
            ("1 if 420 (UBRK0)else 666 endif", &[&[420.0], &[420.0]]),
            ("1 if 420 (UBRK0)else 666 endif 790", &[&[420.0], &[420.0, 790.0]]),
            ("0 if 420 (UBRK0)else 666 endif", &[&[666.0]]),
            ("0 if 420 else (UBRK0)666 endif", &[&[], &[666.0]]),
            ("0 if 420 else 666 (UBRK0)endif", &[&[666.0], &[666.0]]),
            ("1 if 420 else 666 (UBRK0)endif", &[&[420.0]]),
            ("0 if 420 else 666 (UBRK0)endif 69", &[&[666.0], &[666.0, 69.0]]),
            ("1 if 420 else 666 (UBRK0)endif 69", &[&[420.0, 69.0]]),
            ("0 if 420 else 666 endif (UBRK0) 69", &[&[666.0], &[666.0, 69.0]]),
            ("1 if 420 else 666 endif (UBRK0) 69", &[&[420.0], &[420.0, 69.0]]),
            ("0 if 420 else 666 endif   (UBRK0)   69 790", &[&[666.0], &[666.0, 69.0, 790.0]]),
            ("1 if 420 else 666 endif (UBRK0)69", &[&[420.0], &[420.0, 69.0]]),
            ("(UBRK0)1 if 420 else 666 endif", &[&[], &[420.0]]),
            ("(UBRK0)0 if 420 else 666 endif", &[&[], &[666.0]]),
            ("69 (UBRK0)1 if 420 else 666 endif", &[&[69.0], &[69.0, 420.0]]),
            ("1 (UBRK0)if 420 else 666 endif", &[&[1.0], &[420.0]]),
            ("0 (UBRK0)if 420 else 666 endif", &[&[0.0], &[666.0]]),
            ("0 if 0 if 666 endif else 69 endif ", &[&[69.0]]),
            ("0 if 0 (UBRK0)if 666 endif else 69 endif ", &[&[69.0]]),
            ("0 if 0 if 666 (UBRK0)endif else 69 endif ", &[&[69.0]]),
            ("0 if 0 if 666 endif (UBRK0)else 69 endif ", &[&[69.0]]),
            ("0 if 0 if 666 endif else 69 (UBRK0)endif ", &[&[69.0], &[69.0]]),
        ];
        for &(body, stacks) in cases {
            let mut t = prep(&format!(":main {} ;", body));
            for (i, expected) in stacks.iter().enumerate() {
                if i + 1 < stacks.len() {
                    t.run_until_ubrk(0);
                } else {
                    t.run_until_end();
                }
                assert_eq!(t.stack(), *expected, "{}", body);
            }
            assert!(!t.session.can_run(), "{}", body);
        }
    }

    #[test]
    fn test_breakpoints_in_times_loop() {
        let mut t = prep(":main\n   5 (UBRK0)times\n      69\n   loop\n;");
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![5.0]);
        t.run_until_end();
        assert_eq!(t.stack(), vec![69.0; 5]);

        let mut t = prep(":main\n   5 times\n      (UBRK0) 69\n   loop\n;");
        let mut expected = Vec::new();
        for _ in 0..5 {
            t.run_until_ubrk(0);
            assert_eq!(t.stack(), expected);
            expected.push(69.0);
        }
        t.run_until_end();
        assert_eq!(t.stack(), expected);

        let mut t = prep(":main\n   5 times\n      69 (UBRK0)\n   loop\n;");
        let mut expected = Vec::new();
        for _ in 0..5 {
            t.run_until_ubrk(0);
            expected.push(69.0);
            assert_eq!(t.stack(), expected);
        }
        t.run_until_end();
        assert_eq!(t.stack(), expected);
    }

    #[test]
    fn test_breakpoints_in_do_while() {
        let mut t = prep(
            ":main\n   : dup 0 pick ;\n   1\n   (UBRK0)do\n   2 *\n   dup 5 lt while\n;",
        );
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![1.0]);
        t.run_until_end();
        assert_eq!(t.stack(), vec![8.0]);

        let mut t = prep(
            ":main\n   : dup 0 pick ;\n   1\n   do\n   2 *\n   dup 5 lt (UBRK0)while\n;",
        );
        for expected in [[2.0, 1.0], [4.0, 1.0], [8.0, 0.0]] {
            t.run_until_ubrk(0);
            assert_eq!(t.stack(), expected);
        }
        t.run_until_end();
        assert_eq!(t.stack(), vec![8.0]);
    }

    fn graph_tagged(t: &Prepared) -> bool {
        matches!(
            t.session.tagged_stack().as_slice(),
            [DebugValue::Tagged { tag: GRAPH_TAG, value }]
                if **value == DebugValue::Array(vec![DebugValue::Number(42.0)])
        )
    }

    const TAGGING: &str = ":main\n   arrnew 42 arrpush DTGRAPH (UBRK0)\n;";

    #[test]
    fn test_tags_follow_single_steps() {
        let mut t = prep(TAGGING);
        t.run_until_ubrk(0);
        assert!(graph_tagged(&t));
        assert_eq!(t.cycles(), 4);

        t.step(-1);
        assert_eq!(t.cycles(), 3);
        assert_eq!(
            t.session.tagged_stack(),
            vec![DebugValue::Array(vec![DebugValue::Number(42.0)])]
        );

        t.step(1);
        assert_eq!(t.cycles(), 4);
        assert!(graph_tagged(&t));
    }

    #[test]
    fn test_snapshot_keeps_tags() {
        let mut t = prep(TAGGING);
        t.run_until_ubrk(0);
        let snap = t.session.save_snapshot();
        t.session.restore_snapshot(&snap);
        assert!(graph_tagged(&t));

        let mut t = prep(TAGGING);
        t.run_until_ubrk(0);
        t.step(-1);
        let snap = t.session.save_snapshot();
        t.session.restore_snapshot(&snap);
        t.step(1);
        assert!(graph_tagged(&t));
    }

    #[test]
    fn test_single_step_both_ways() {
        let mut t = prep(
            "
            :main
            1 2 (UBRK0) 3 4 5

            ( trailing values catch overruns )
            420 666 69 790 42
            ;
            ",
        );
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![1.0, 2.0]);
        assert_eq!(t.cycles(), 2);

        for n in 3..=5 {
            t.step(1);
            assert_eq!(t.stack(), (1..=n).map(f64::from).collect::<Vec<_>>());
            assert_eq!(t.cycles(), n as i64);
        }
        for n in (0..=4).rev() {
            t.step(-1);
            assert_eq!(t.stack(), (1..=n).map(f64::from).collect::<Vec<_>>());
            assert_eq!(t.cycles(), n as i64);
        }

        t.step(3);
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
        assert_eq!(t.cycles(), 3);
        t.step(-2);
        assert_eq!(t.stack(), vec![1.0]);
        assert_eq!(t.cycles(), 1);

        t.run_until_end();
        assert_eq!(
            t.stack(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 420.0, 666.0, 69.0, 790.0, 42.0]
        );
    }

    #[test]
    fn test_step_back_past_start_clamps() {
        let mut t = prep(":main 1 2 ;");
        t.step(1);
        t.step(-5);
        assert_eq!(t.cycles(), 0);
        assert!(t.stack().is_empty());
    }

    #[test]
    fn test_step_reports_end() {
        let mut t = prep(":main 1 ;");
        assert_eq!(
            t.session.single_step(5).unwrap(),
            Stepped::Halted(HaltingReason::End)
        );
        assert_eq!(t.cycles(), 2);
    }

    #[test]
    fn test_goto_brk() {
        let mut t = prep(":main 1 brk 2 (UBRK0) 3 brk 4 ;");
        t.run_until_brk();
        t.run_until_ubrk(0);
        assert_eq!(t.stack(), vec![1.0, 2.0]);
        assert_eq!(t.cycles(), 3);

        assert_eq!(t.session.goto_brk(1).unwrap(), Some(HaltingReason::Brk));
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
        assert_eq!(t.cycles(), 5);

        assert_eq!(t.session.goto_brk(-1).unwrap(), Some(HaltingReason::Brk));
        assert_eq!(t.stack(), vec![1.0]);
        assert_eq!(t.cycles(), 2);

        assert_eq!(t.session.goto_brk(1).unwrap(), Some(HaltingReason::Brk));
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
        assert_eq!(t.cycles(), 5);
    }

    #[test]
    fn test_goto_brk_back_without_earlier_break() {
        let mut t = prep(":main 1 2 (UBRK0) 3 ;");
        t.run_until_ubrk(0);
        assert_eq!(t.session.goto_brk(-1).unwrap(), None);
        assert_eq!(t.stack(), vec![1.0, 2.0]);
        assert_eq!(t.cycles(), 2);
        t.run_until_end();
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_position_follows_steps() {
        let mut t = prep(":main 1 2  3   4    5 (UBRK0) ;");
        t.run_until_ubrk(0);
        t.step(-4);
        assert_eq!(t.cycles(), 1);
        assert_eq!(t.stack(), vec![1.0]);
        assert_eq!(t.session.position_human(), "<test.4st>:1:7");
        for expected in ["<test.4st>:1:9", "<test.4st>:1:12", "<test.4st>:1:16", "<test.4st>:1:21"] {
            t.step(1);
            assert_eq!(t.session.position_human(), expected);
        }
    }

    #[test]
    fn test_step_over_call() {
        let mut t = prep(":main\n   :w0rd 1 2 + ;\n   (UBRK0)w0rd 7\n;");
        t.run_until_ubrk(0);
        assert_eq!(t.session.step_over().unwrap(), Stepped::Completed);
        assert_eq!(t.stack(), vec![3.0]);
        assert_eq!(t.cycles(), 5);
        assert!(t.session.machine().breakpoints().is_empty());

        // not a call: plain single step
        assert_eq!(t.session.step_over().unwrap(), Stepped::Completed);
        assert_eq!(t.stack(), vec![3.0, 7.0]);
    }

    #[test]
    fn test_step_over_recursive_call() {
        let src = "
            :main
               3 (UBRK0)down
            ;
            :down
               1 - 0 pick if down endif
            ;
        ";
        let mut t = prep(src);
        t.run_until_ubrk(0);
        assert_eq!(t.session.step_over().unwrap(), Stepped::Completed);
        assert_eq!(t.stack(), vec![0.0]);
        assert!(t.session.rstack().is_empty());
    }

    #[test]
    fn test_persistent_breakpoint_from_source() {
        let mut t = prep(":main 1 (UBRK0)2 3 ;");
        let pc = t.ubrk(0);
        t.session.set_breakpoint(pc).unwrap();
        assert_eq!(t.session.run(), HaltingReason::Brk);
        assert_eq!(t.stack(), vec![1.0]);
        // stepping back and forth across it
        t.step(-1);
        assert!(t.stack().is_empty());
        assert_eq!(t.session.run(), HaltingReason::Brk);
        assert_eq!(t.cycles(), 1);
        t.session.remove_breakpoint(pc).unwrap();
        t.run_until_end();
        assert_eq!(t.stack(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dump_callback_is_not_replayed() {
        let mut t = prep(":main 1 dump 2 dump 3 ;");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        t.session
            .set_dump_callback(move |s: &VmState| sink.borrow_mut().push(s.stack.len()));
        t.step(4);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        t.step(-1);
        t.step(-2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_resolve_outside_any_word() {
        let t = prep(":main 1 ;\n\n");
        assert_eq!(
            t.session.resolve_breakpoint(FILE, 1, 0),
            Err(DebugError::NoWordAt {
                file: FILE.to_string(),
                line: 1,
                col: 0
            })
        );
    }

    #[test]
    fn test_backward_step_needs_start() {
        let program = compile_str(FILE, ":main ;", BuildMode::Debug)
            .unwrap()
            .trace(|p| p == "main")
            .unwrap();
        let mut session = DebugSession::new(program, VmConfig::default());
        assert_eq!(session.single_step(-1), Err(DebugError::NotStarted));
        assert_eq!(session.start(4), Err(DebugError::NoSuchExport(4)));
    }
}
