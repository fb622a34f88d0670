pub mod builtins;
pub mod host;
pub mod runtime_error;
pub mod stdlib;
pub mod vm;

pub use host::{TickOutcome, TickReport, run_tick};
pub use runtime_error::RuntimeError;
pub use vm::{ExecStatus, Vm, VmConfig};
