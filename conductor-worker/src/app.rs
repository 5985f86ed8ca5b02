use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conductor_core::{InstanceId, WorkerArgs};

use crate::error::WorkerError;

/// What a worker learns about itself at startup.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub args: WorkerArgs,
    pub rendezvous: String,
    pub channel_path: PathBuf,
}

impl WorkerContext {
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.args.instance_id
    }

    pub fn name(&self) -> Option<&str> {
        self.args.name.as_deref()
    }

    /// Arguments that belong to the worker's own business logic.
    pub fn app_args(&self) -> &[String] {
        &self.args.rest
    }

    pub fn log_config(&self) -> Option<&Path> {
        self.args.log_config.as_deref()
    }
}

/// The capability set a worker exposes to its host.
///
/// `start` runs the worker's main loop and is expected to return once `stop`
/// has been called. Both run concurrently on the same shared value, so
/// implementations keep their state behind interior mutability.
#[async_trait]
pub trait AppServer: Send + Sync + 'static {
    async fn initialize(&self, _context: &WorkerContext) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn start(&self);

    async fn stop(&self);

    async fn reconfigure(&self);
}
