//! Bytecode VM and the debugging machinery built on it.

pub mod breakpoints;
pub mod debug;
pub mod debug_error;
pub mod dispatch;
pub mod halt;
pub mod harness;
pub mod markers;
pub mod snapshot;
pub mod state;
pub mod vm;

pub use breakpoints::Breakpoints;
pub use debug::{DebugSession, Stepped, resolve_breakpoint};
pub use debug_error::DebugError;
pub use dispatch::{DispatchTable, SECTION_ORDER, Section};
pub use halt::{HaltingReason, VmException};
pub use harness::{TestOutcome, TestReport, run_export, run_exports};
pub use markers::{MarkedSource, MarkerError, strip_breakpoint_markers};
pub use snapshot::{PersistError, Snapshot};
pub use state::{DebugValue, GRAPH_TAG, ProgramCounter, ReturnFrame, VmState};
pub use vm::{Machine, VmConfig};
