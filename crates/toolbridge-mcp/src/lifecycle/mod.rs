//! Process lifecycle: spawning server children, probing them, and running
//! one full spawn → handshake → call → teardown cycle per invocation.

pub mod probe;
pub mod process;

pub use probe::{
    call_once, call_over, discover_routes, list_once, list_over, probe, probe_all, ProbeReport,
};
pub use process::{start, stop, DiagnosticTail, ExitReport, ProcessHandle, ProcessState};
