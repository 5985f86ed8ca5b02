//! OS process collaborator.
//!
//! [`ProcessSpawner`] is the seam between the supervisor and real processes.
//! A spawned child is represented by a [`ProcessHandle`]: its pid, a watch
//! that flips to `Some(ExitEvent)` once the child has been reaped, and a kill
//! request line. Whoever owns the child side ([`ChildSignals`]) publishes the
//! exit and honours kill requests.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use conductor_core::{ProcessInstanceSpec, SessionToken, WorkerArgs};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};

/// Everything needed to launch one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    /// Rendezvous name, used to tag forwarded output.
    pub session: SessionToken,
}

impl LaunchSpec {
    /// Launch configuration for `spec` under `session`, with the worker
    /// contract flags ahead of the configured arguments.
    pub fn for_instance(
        spec: &ProcessInstanceSpec,
        session: &SessionToken,
        channel_dir: &Path,
    ) -> Self {
        Self {
            executable: spec.executable_path(),
            args: WorkerArgs::for_instance(spec, session, Some(channel_dir.to_path_buf()))
                .to_args(),
            working_directory: spec.effective_working_directory(),
            session: session.clone(),
        }
    }
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub pid: u32,
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
}

/// Supervisor-side view of a spawned child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    exit_rx: watch::Receiver<Option<ExitEvent>>,
    kill_tx: mpsc::UnboundedSender<()>,
}

/// Child-side counterpart of a [`ProcessHandle`].
#[derive(Debug)]
pub struct ChildSignals {
    pub exit: watch::Sender<Option<ExitEvent>>,
    pub kill: mpsc::UnboundedReceiver<()>,
}

impl ChildSignals {
    /// Publish the exit. Safe to call when no handle is listening.
    pub fn exited(&self, pid: u32, code: Option<i32>) {
        self.exit.send_replace(Some(ExitEvent { pid, code }));
    }
}

impl ProcessHandle {
    pub fn new(pid: u32) -> (Self, ChildSignals) {
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        (
            Self {
                pid,
                exit_rx,
                kill_tx,
            },
            ChildSignals {
                exit: exit_tx,
                kill: kill_rx,
            },
        )
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Ask the child side to force-terminate. No-op once the child is gone.
    pub fn kill(&self) {
        if !self.has_exited() {
            let _ = self.kill_tx.send(());
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit_event(&self) -> Option<ExitEvent> {
        *self.exit_rx.borrow()
    }

    /// A fresh subscription to the exit notification.
    pub fn subscribe_exit(&self) -> watch::Receiver<Option<ExitEvent>> {
        self.exit_rx.clone()
    }

    /// Wait up to `limit` for the child to be reaped.
    pub async fn wait_exit(&self, limit: Duration) -> Option<ExitEvent> {
        let mut exit_rx = self.exit_rx.clone();
        let waited = tokio::time::timeout(limit, exit_rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(event)) => *event,
            _ => self.exit_event(),
        }
    }
}

/// Launches children and probes liveness by pid.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, launch: &LaunchSpec) -> io::Result<ProcessHandle>;

    /// Whether the OS still knows a process with this pid.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Spawns real children through `tokio::process`.
///
/// stdout and stderr are forwarded line by line to `tracing` at debug level.
/// Must be used from inside a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct OsProcessSpawner;

impl ProcessSpawner for OsProcessSpawner {
    fn spawn(&self, launch: &LaunchSpec) -> io::Result<ProcessHandle> {
        let mut child = tokio::process::Command::new(&launch.executable)
            .args(&launch.args)
            .current_dir(&launch.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "child exited before reporting a pid")
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, launch.session.clone(), pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, launch.session.clone(), pid, "stderr"));
        }

        let (handle, mut signals) = ProcessHandle::new(pid);
        let session = launch.session.clone();
        tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                Some(()) = signals.kill.recv() => None,
            };
            let status = match finished {
                Some(status) => status,
                None => {
                    tracing::debug!(session = %session, pid, "force-killing worker");
                    if let Err(err) = child.start_kill() {
                        tracing::warn!(session = %session, pid, error = %err, "kill failed");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(session = %session, pid, error = %err, "failed to reap worker");
                    None
                }
            };
            tracing::debug!(session = %session, pid, code = ?code, "worker reaped");
            signals.exited(pid, code);
        });

        Ok(handle)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

async fn forward_output<R>(reader: R, session: SessionToken, pid: u32, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(session = %session, pid, stream, "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(session = %session, pid, stream, error = %err, "output stream closed");
                break;
            }
        }
    }
}
