use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::sleep;

use crate::address::channel_path;
use crate::error::{io_err, ChannelError};
use crate::frame::ChannelStream;

/// Delay between connection attempts while the server is not yet listening.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Requesting side of a control channel.
///
/// Every exchange opens a fresh connection, sends one frame and reads one
/// frame back. Failures of any kind collapse to `None`.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    path: PathBuf,
}

impl ClientChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Client for the channel named `name` inside `dir`.
    pub fn for_name(dir: &Path, name: &str) -> Result<Self, ChannelError> {
        Ok(Self::new(channel_path(dir, name)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send `message` and wait for the reply.
    ///
    /// `timeout` bounds the whole exchange, connection included; `None` waits
    /// for the server indefinitely.
    pub async fn send_receive(&self, message: &str, timeout: Option<Duration>) -> Option<String> {
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(message))
                .await
                .unwrap_or(Err(ChannelError::Timeout(limit))),
            None => self.exchange(message).await,
        };

        match outcome {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::debug!(
                    channel = %self.path.display(),
                    message,
                    error = %err,
                    "control channel exchange produced no response",
                );
                None
            }
        }
    }

    /// Fire-and-forget exchange on a background task.
    ///
    /// `on_response` runs with the reply (or `None`) once the exchange ends.
    /// Never blocks and never fails the caller.
    pub fn send_async_receive<F>(
        &self,
        message: impl Into<String>,
        timeout: Option<Duration>,
        on_response: Option<F>,
    ) where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let client = self.clone();
        let message = message.into();
        tokio::spawn(async move {
            let response = client.send_receive(&message, timeout).await;
            if let Some(callback) = on_response {
                callback(response);
            }
        });
    }

    async fn exchange(&self, message: &str) -> Result<String, ChannelError> {
        let stream = self.connect().await?;
        let mut channel = ChannelStream::new(stream);
        channel
            .send(message)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        channel.receive().await.map_err(|e| io_err(&self.path, e))
    }

    async fn connect(&self) -> Result<UnixStream, ChannelError> {
        loop {
            match UnixStream::connect(&self.path).await {
                Ok(stream) => return Ok(stream),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::NotFound | ErrorKind::ConnectionRefused
                    ) =>
                {
                    sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(err) => return Err(io_err(&self.path, err)),
            }
        }
    }
}
