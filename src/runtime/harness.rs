//! Runs every root export of a program as a self-contained test.

use std::fmt;

use tracing::{info, warn};

use super::debug_error::DebugError;
use super::halt::{HaltingReason, VmException};
use super::state::VmState;
use super::vm::{Machine, VmConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Passed { cycles: i64 },
    AssertionFailed { at: String },
    /// Reached the end with values left behind.
    UncleanExit { stack: usize, return_depth: usize },
    OutOfGas { at: String },
    Faulted { error: VmException, at: String },
    /// The export could not be started at all.
    NotStarted { error: DebugError },
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed { .. })
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed { cycles } => write!(f, "OK ({}op)", cycles),
            TestOutcome::AssertionFailed { at } => write!(f, "ASSERTION FAILED at {}", at),
            TestOutcome::UncleanExit {
                stack,
                return_depth,
            } => write!(
                f,
                "unclean exit: {} value(s) on the stack, return depth {}",
                stack, return_depth
            ),
            TestOutcome::OutOfGas { at } => write!(f, "out of gas at {}", at),
            TestOutcome::Faulted { error, at } => write!(f, "{} at {}", error, at),
            TestOutcome::NotStarted { error } => write!(f, "not started: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub path: String,
    pub outcome: TestOutcome,
}

fn log_dump(state: &VmState) {
    info!(stack = ?state.tagged_stack(), rstack = ?state.rstack, "dump");
}

/// Runs one export to completion, resuming across `brk`.
pub fn run_export(
    machine: &Machine,
    export: usize,
    config: &VmConfig,
) -> Result<TestOutcome, DebugError> {
    let mut state = machine.start(export, config)?;
    let outcome = loop {
        let reason = machine.run_with(&mut state, None, &mut log_dump);
        let at = machine.position_human(&state);
        match reason {
            HaltingReason::End => break None,
            HaltingReason::Brk | HaltingReason::UsrBrk => continue,
            HaltingReason::Assert => break Some(TestOutcome::AssertionFailed { at }),
            HaltingReason::OutOfGas => break Some(TestOutcome::OutOfGas { at }),
            HaltingReason::Exception(error) => break Some(TestOutcome::Faulted { error, at }),
        }
    };
    Ok(outcome.unwrap_or_else(|| {
        if state.stack.is_empty() && state.rstack.is_empty() {
            TestOutcome::Passed {
                cycles: config.cycle_budget - state.cycles,
            }
        } else {
            TestOutcome::UncleanExit {
                stack: state.stack.len(),
                return_depth: state.rstack.len(),
            }
        }
    }))
}

/// Runs every root export in export order on a fresh state.
pub fn run_exports(machine: &Machine, config: &VmConfig) -> Vec<TestReport> {
    let mut reports = Vec::new();
    for (index, export) in machine.program().root_exports() {
        let outcome = run_export(machine, index, config)
            .unwrap_or_else(|error| TestOutcome::NotStarted { error });
        if outcome.passed() {
            info!(path = %export.path, %outcome, "test");
        } else {
            warn!(path = %export.path, %outcome, "test failed");
        }
        reports.push(TestReport {
            path: export.path.clone(),
            outcome,
        });
    }
    reports
}
