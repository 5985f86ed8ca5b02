use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use conductor_channel::ClientChannel;
use conductor_core::SessionToken;

pub type ResponseCallback = Box<dyn FnOnce(Option<String>) + Send + 'static>;

/// Supervisor side of the control channel, addressed by session token.
///
/// Every transport failure surfaces as `None`.
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn send_receive(
        &self,
        session: &SessionToken,
        message: &str,
        timeout: Option<Duration>,
    ) -> Option<String>;

    /// Exchange on a background task; `on_response` receives the outcome.
    fn send_async_receive(
        &self,
        session: &SessionToken,
        message: &str,
        timeout: Option<Duration>,
        on_response: ResponseCallback,
    );
}

/// [`ControlClient`] over Unix sockets in one rendezvous directory.
#[derive(Debug, Clone)]
pub struct ChannelControl {
    channel_dir: PathBuf,
}

impl ChannelControl {
    pub fn new(channel_dir: impl Into<PathBuf>) -> Self {
        Self {
            channel_dir: channel_dir.into(),
        }
    }

    pub fn channel_dir(&self) -> &Path {
        &self.channel_dir
    }

    fn client(&self, session: &SessionToken) -> Option<ClientChannel> {
        match ClientChannel::for_name(&self.channel_dir, session.as_str()) {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(session = %session, error = %err, "cannot address control channel");
                None
            }
        }
    }
}

#[async_trait]
impl ControlClient for ChannelControl {
    async fn send_receive(
        &self,
        session: &SessionToken,
        message: &str,
        timeout: Option<Duration>,
    ) -> Option<String> {
        let client = self.client(session)?;
        client.send_receive(message, timeout).await
    }

    fn send_async_receive(
        &self,
        session: &SessionToken,
        message: &str,
        timeout: Option<Duration>,
        on_response: ResponseCallback,
    ) {
        match self.client(session) {
            Some(client) => client.send_async_receive(message, timeout, Some(on_response)),
            None => on_response(None),
        }
    }
}
