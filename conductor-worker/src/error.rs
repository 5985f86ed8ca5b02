use conductor_channel::ChannelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no rendezvous name: pass --pipe-name, or both --name and --id")]
    MissingRendezvous,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("worker initialisation failed: {0}")]
    Initialize(String),

    #[error("worker task failed: {0}")]
    Runtime(String),
}
