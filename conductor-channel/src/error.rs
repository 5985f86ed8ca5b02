use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error surface for channel framing, binding and exchanges.
///
/// Client-side exchanges never return this to callers; it only travels as far
/// as the log line that records why an exchange produced no response.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid channel name '{0}'")]
    InvalidName(String),

    #[error("channel already in use: {path}")]
    AlreadyInUse { path: PathBuf },

    #[error("channel exchange timed out after {0:?}")]
    Timeout(Duration),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ChannelError {
    ChannelError::Io {
        path: path.into(),
        source,
    }
}
