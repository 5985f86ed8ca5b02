//! Runs an [`AppServer`] behind its control channel.
//!
//! ```text
//! supervisor ── STOP ────────► dispatcher ── app.stop() ──► reply EXIT, shut down
//!            ── RECONFIGURE ─►            ── app.reconfigure() ─► reply RECONFIGURE
//!            ── anything else ►           ── no reply
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conductor_channel::{channel_path, default_channel_dir, MessageHandler, ServerChannel};
use conductor_core::{Command, WorkerArgs, EXIT_ACK};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::app::{AppServer, WorkerContext};
use crate::error::WorkerError;

/// How long `start` may keep running after `stop` before it is abandoned.
const WORK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why [`WorkerHost::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A STOP arrived over the control channel.
    Stopped,
    /// `start` returned on its own.
    Finished,
    /// ctrl-c or SIGTERM.
    Interrupted,
}

pub struct WorkerHost {
    args: WorkerArgs,
    channel_dir: PathBuf,
}

impl WorkerHost {
    /// Host for the given launch arguments. Without `--channel-dir` the
    /// default rendezvous directory is used.
    pub fn new(args: WorkerArgs) -> Self {
        let channel_dir = args
            .channel_dir
            .clone()
            .unwrap_or_else(default_channel_dir);
        Self { args, channel_dir }
    }

    /// Host for this process's own command line.
    pub fn from_env() -> Self {
        Self::new(WorkerArgs::parse_from(std::env::args().skip(1)))
    }

    pub fn args(&self) -> &WorkerArgs {
        &self.args
    }

    pub fn channel_dir(&self) -> &Path {
        &self.channel_dir
    }

    /// Initialise `app`, listen for commands and run it until stopped.
    ///
    /// The channel socket is removed on every exit path.
    pub async fn run(self, app: Arc<dyn AppServer>) -> Result<ExitReason, WorkerError> {
        let rendezvous = self
            .args
            .rendezvous_name()
            .ok_or(WorkerError::MissingRendezvous)?;
        let context = WorkerContext {
            channel_path: channel_path(&self.channel_dir, &rendezvous)?,
            rendezvous: rendezvous.clone(),
            args: self.args,
        };
        app.initialize(&context).await?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(4);
        let dispatcher = Arc::new(CommandDispatcher {
            app: app.clone(),
            shutdown_tx,
            rendezvous: rendezvous.clone(),
        });
        let server = ServerChannel::for_name(&self.channel_dir, &rendezvous, dispatcher)?;
        tracing::info!(
            session = %rendezvous,
            instance = ?context.instance_id(),
            channel = %server.path().display(),
            "worker started",
        );

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                server.close().await;
                return Err(WorkerError::Runtime(format!("SIGTERM handler: {err}")));
            }
        };

        let mut work = {
            let app = app.clone();
            tokio::spawn(async move { app.start().await })
        };

        let reason = tokio::select! {
            _ = shutdown_rx.recv() => ExitReason::Stopped,
            joined = &mut work => {
                server.close().await;
                return match joined {
                    Ok(()) => {
                        tracing::info!(session = %rendezvous, "worker finished");
                        Ok(ExitReason::Finished)
                    }
                    Err(err) => Err(WorkerError::Runtime(err.to_string())),
                };
            }
            _ = tokio::signal::ctrl_c() => ExitReason::Interrupted,
            _ = terminate.recv() => ExitReason::Interrupted,
        };

        if reason == ExitReason::Interrupted {
            tracing::info!(session = %rendezvous, "interrupted, stopping worker");
            app.stop().await;
        }
        drain(work, &rendezvous).await;
        server.close().await;
        tracing::info!(session = %rendezvous, reason = ?reason, "worker exiting");
        Ok(reason)
    }
}

async fn drain(mut work: JoinHandle<()>, rendezvous: &str) {
    match tokio::time::timeout(WORK_DRAIN_TIMEOUT, &mut work).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(session = %rendezvous, error = %err, "worker task failed while stopping");
        }
        Err(_) => {
            tracing::warn!(
                session = %rendezvous,
                timeout = ?WORK_DRAIN_TIMEOUT,
                "worker did not return after stop, abandoning it",
            );
            work.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

struct CommandDispatcher {
    app: Arc<dyn AppServer>,
    shutdown_tx: broadcast::Sender<()>,
    rendezvous: String,
}

#[async_trait]
impl MessageHandler for CommandDispatcher {
    async fn handle(&self, message: String) -> String {
        match message.parse::<Command>() {
            Ok(Command::Stop) => {
                tracing::info!(session = %self.rendezvous, "stop requested");
                self.app.stop().await;
                let _ = self.shutdown_tx.send(());
                EXIT_ACK.to_string()
            }
            Ok(Command::Reconfigure) => {
                tracing::info!(session = %self.rendezvous, "reconfigure requested");
                self.app.reconfigure().await;
                Command::Reconfigure.as_str().to_string()
            }
            Ok(Command::Start) | Err(_) => {
                tracing::debug!(session = %self.rendezvous, message = %message, "ignoring command");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        stops: AtomicUsize,
        reconfigures: AtomicUsize,
    }

    #[async_trait]
    impl AppServer for Counting {
        async fn start(&self) {}

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn reconfigure(&self) {
            self.reconfigures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dispatcher(app: Arc<Counting>) -> (CommandDispatcher, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        (
            CommandDispatcher {
                app,
                shutdown_tx,
                rendezvous: "t".to_string(),
            },
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn stop_acknowledges_and_signals_shutdown() {
        let app = Arc::new(Counting::default());
        let (dispatcher, mut shutdown_rx) = dispatcher(app.clone());

        assert_eq!(dispatcher.handle("STOP".to_string()).await, "EXIT");
        assert_eq!(app.stops.load(Ordering::SeqCst), 1);
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn reconfigure_is_echoed() {
        let app = Arc::new(Counting::default());
        let (dispatcher, mut shutdown_rx) = dispatcher(app.clone());

        assert_eq!(
            dispatcher.handle("reconfigure".to_string()).await,
            "RECONFIGURE"
        );
        assert_eq!(app.reconfigures.load(Ordering::SeqCst), 1);
        assert!(shutdown_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_and_start_get_no_reply() {
        let app = Arc::new(Counting::default());
        let (dispatcher, _shutdown_rx) = dispatcher(app.clone());

        assert_eq!(dispatcher.handle("PING".to_string()).await, "");
        assert_eq!(dispatcher.handle("START".to_string()).await, "");
        assert_eq!(app.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_rendezvous_is_rejected_before_binding() {
        let host = WorkerHost::new(WorkerArgs::parse_from(["--name", "api"]));
        let err = host.run(Arc::new(Counting::default())).await.unwrap_err();
        assert!(matches!(err, WorkerError::MissingRendezvous));
    }
}
