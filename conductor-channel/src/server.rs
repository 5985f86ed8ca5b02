use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::address::channel_path;
use crate::error::{io_err, ChannelError};
use crate::frame::ChannelStream;

/// How long a connected client may take to deliver its message.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait for the client to hang up after the reply.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);
const REBIND_DELAY: Duration = Duration::from_millis(200);

/// Produces the reply for one inbound message. An empty reply sends nothing.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: String) -> String;
}

/// Adapts a plain closure into a [`MessageHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(String) -> String + Send + Sync,
{
    async fn handle(&self, message: String) -> String {
        (self.0)(message)
    }
}

/// Listening side of a control channel.
///
/// Serves one connection at a time on a background task until closed. A
/// failed accept drops the listener and binds a fresh one at the same path.
pub struct ServerChannel {
    path: PathBuf,
    close_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ServerChannel {
    /// Bind `path` and start serving. Must be called inside a tokio runtime.
    ///
    /// A stale socket file left by a dead server is removed first; a live one
    /// yields [`ChannelError::AlreadyInUse`].
    pub fn listen(
        path: impl Into<PathBuf>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ChannelError> {
        let path = path.into();
        let listener = bind(&path)?;
        let (close_tx, close_rx) = watch::channel(false);

        let task = {
            let path = path.clone();
            tokio::spawn(accept_loop(path, Box::new(listener), handler, close_rx))
        };

        tracing::debug!(channel = %path.display(), "control channel listening");
        Ok(Self {
            path,
            close_tx,
            task: Some(task),
        })
    }

    /// Listen on `<dir>/<name>.sock`, creating `dir` if needed.
    pub fn for_name(
        dir: &Path,
        name: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ChannelError> {
        let path = channel_path(dir, name)?;
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        Self::listen(path, handler)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting, let an in-flight exchange finish, remove the socket.
    pub async fn close(mut self) {
        let _ = self.close_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(channel = %self.path.display(), error = %err, "control channel task failed");
            }
        }
        remove_socket(&self.path);
    }
}

impl Drop for ServerChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            remove_socket(&self.path);
        }
    }
}

/// Source of inbound connections for the accept loop.
#[async_trait]
trait Acceptor: Send {
    async fn accept_stream(&mut self) -> std::io::Result<UnixStream>;
}

#[async_trait]
impl Acceptor for UnixListener {
    async fn accept_stream(&mut self) -> std::io::Result<UnixStream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

async fn accept_loop(
    path: PathBuf,
    mut listener: Box<dyn Acceptor>,
    handler: Arc<dyn MessageHandler>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = close_rx.changed() => break,
            accepted = listener.accept_stream() => accepted,
        };

        match accepted {
            Ok(stream) => serve_connection(stream, handler.as_ref(), &path).await,
            Err(err) => {
                tracing::warn!(
                    channel = %path.display(),
                    error = %err,
                    "control channel accept failed, rebinding",
                );
                drop(listener);
                match rebind(&path, &mut close_rx).await {
                    Some(fresh) => listener = Box::new(fresh),
                    None => break,
                }
            }
        }
    }
    tracing::debug!(channel = %path.display(), "control channel closed");
}

async fn serve_connection(stream: UnixStream, handler: &dyn MessageHandler, path: &Path) {
    let mut channel = ChannelStream::new(stream);
    let message = match timeout(RECEIVE_TIMEOUT, channel.receive()).await {
        Ok(Ok(message)) => message,
        Ok(Err(err)) => {
            tracing::debug!(channel = %path.display(), error = %err, "client left before sending a full message");
            return;
        }
        Err(_) => {
            tracing::debug!(channel = %path.display(), "client sent nothing before the receive timeout");
            return;
        }
    };

    let response = handler.handle(message).await;
    if !response.is_empty() {
        if let Err(err) = channel.send(&response).await {
            tracing::debug!(channel = %path.display(), error = %err, "failed to deliver response");
            return;
        }
    }

    let mut stream = channel.into_inner();
    let _ = stream.shutdown().await;
    let mut scratch = [0u8; 64];
    let _ = timeout(DRAIN_TIMEOUT, async {
        while let Ok(read) = stream.read(&mut scratch).await {
            if read == 0 {
                break;
            }
        }
    })
    .await;
}

async fn rebind(path: &Path, close_rx: &mut watch::Receiver<bool>) -> Option<UnixListener> {
    loop {
        if *close_rx.borrow() {
            return None;
        }
        match bind(path) {
            Ok(listener) => return Some(listener),
            Err(err) => {
                tracing::warn!(channel = %path.display(), error = %err, "control channel rebind failed");
            }
        }
        tokio::select! {
            _ = close_rx.changed() => return None,
            _ = sleep(REBIND_DELAY) => {}
        }
    }
}

fn bind(path: &Path) -> Result<UnixListener, ChannelError> {
    prepare_socket_for_bind(path)?;
    let listener = UnixListener::bind(path).map_err(|e| io_err(path, e))?;
    set_socket_permissions(path)?;
    Ok(listener)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), ChannelError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(ChannelError::AlreadyInUse {
                path: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::debug!(
                channel = %socket.display(),
                error = %err,
                "removing stale control socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn remove_socket(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(channel = %path.display(), error = %err, "failed to remove control socket");
        }
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), ChannelError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
