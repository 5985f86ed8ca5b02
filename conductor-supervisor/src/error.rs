use std::path::PathBuf;

use conductor_core::{InstanceId, SessionToken};
use thiserror::Error;

/// Error surface for supervisor setup, explicit process control and the runtime.
///
/// Fleet operations and reconciliation never return these; they log and
/// record a [`crate::ReconcileAction::Failed`] instead.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] conductor_core::ConfigError),

    #[error("failed to spawn instance {instance}: {source}")]
    Spawn {
        instance: InstanceId,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("process {0} has been closed")]
    ProcessClosed(SessionToken),

    #[error("no managed process matches {0}")]
    UnknownProcess(String),

    #[error("no worker is listening (socket missing: {socket})")]
    WorkerNotListening { socket: PathBuf },

    #[error("supervisor has been shut down")]
    ShutDown,

    #[error("supervisor runtime error: {0}")]
    Runtime(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SupervisorError {
    SupervisorError::Io {
        path: path.into(),
        source,
    }
}
