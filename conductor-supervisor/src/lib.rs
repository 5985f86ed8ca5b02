//! Process supervision: managed workers, reconciliation, refresh triggers.

pub mod control;
mod error;
pub mod paths;
pub mod process;
pub mod protocol;
mod runtime;
pub mod spawn;
mod supervisor;
pub mod triggers;

pub use control::{ChannelControl, ControlClient, ResponseCallback};
pub use error::SupervisorError;
pub use process::{
    ManagedProcess, ProcessSettings, ProcessStatus, ReconfigureOutcome, ReconfigureRecord,
};
pub use protocol::send_command;
pub use runtime::{ensure_channel_dir, init_tracing, run, start_blocking};
pub use spawn::{ChildSignals, ExitEvent, LaunchSpec, OsProcessSpawner, ProcessHandle, ProcessSpawner};
pub use supervisor::{ArmedTriggers, ProcessRef, ReconcileAction, ReconcileReport, Supervisor};
pub use triggers::{ChangeDebouncer, Trigger};
