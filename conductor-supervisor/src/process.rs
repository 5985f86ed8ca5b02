//! One supervised worker and its lifecycle.
//!
//! # State machine
//!
//! ```text
//!            start()                 exit, last != STOP, auto_restart
//!   idle ───────────► running ◄──────────────────────────────┐
//!                      │   │                                  │
//!              stop()  │   └──── exit ──► exited ─────────────┘
//!                      ▼                    │
//!                   stopped ◄───────────────┘ last == STOP or !auto_restart
//! ```
//!
//! All transitions happen under the per-process `state` lock. The exit
//! watcher is a task subscribed to the child's exit notification; `stop`
//! aborts it before talking to the worker so an explicit stop never races a
//! crash-driven restart.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_core::{Command, InstanceId, ProcessInstanceSpec, SessionToken};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use crate::control::ControlClient;
use crate::error::SupervisorError;
use crate::paths::KILL_REAP_TIMEOUT;
use crate::spawn::{ExitEvent, LaunchSpec, ProcessHandle, ProcessSpawner};

/// Per-process settings taken from the controller section at creation time.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub stop_timeout: Duration,
    pub channel_dir: PathBuf,
}

/// What the worker said to the most recent RECONFIGURE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconfigureOutcome {
    Acknowledged(String),
    NoResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconfigureRecord {
    pub at: DateTime<Utc>,
    pub outcome: ReconfigureOutcome,
}

/// Point-in-time view of a managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub instance_id: InstanceId,
    pub name: String,
    pub session: SessionToken,
    pub pid: Option<u32>,
    pub running: bool,
    pub last_command: Option<Command>,
    pub working_directory: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
    pub restarts: u32,
    pub last_reconfigure: Option<ReconfigureRecord>,
}

struct ProcessState {
    last_command: Option<Command>,
    handle: Option<ProcessHandle>,
    exit_watch: Option<AbortHandle>,
    started_at: Option<DateTime<Utc>>,
    /// Spec most recently seen for this instance by reconciliation.
    observed: ProcessInstanceSpec,
    closed: bool,
}

pub struct ManagedProcess {
    session: SessionToken,
    instance_id: InstanceId,
    name: String,
    auto_restart: bool,
    launch: LaunchSpec,
    stop_timeout: Duration,
    spawner: Arc<dyn ProcessSpawner>,
    control: Arc<dyn ControlClient>,
    state: Mutex<ProcessState>,
    restarts: AtomicU32,
    last_reconfigure: std::sync::Mutex<Option<ReconfigureRecord>>,
    this: Weak<ManagedProcess>,
}

impl ManagedProcess {
    /// Create an idle process for `spec` with a fresh session token.
    pub fn new(
        spec: &ProcessInstanceSpec,
        settings: &ProcessSettings,
        spawner: Arc<dyn ProcessSpawner>,
        control: Arc<dyn ControlClient>,
    ) -> Arc<Self> {
        let session = SessionToken::generate();
        let launch = LaunchSpec::for_instance(spec, &session, &settings.channel_dir);
        Arc::new_cyclic(|this| Self {
            session,
            instance_id: spec.instance_id,
            name: spec.name.clone(),
            auto_restart: spec.auto_restart,
            launch,
            stop_timeout: settings.stop_timeout,
            spawner,
            control,
            state: Mutex::new(ProcessState {
                last_command: None,
                handle: None,
                exit_watch: None,
                started_at: None,
                observed: spec.clone(),
                closed: false,
            }),
            restarts: AtomicU32::new(0),
            last_reconfigure: std::sync::Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn working_directory(&self) -> &Path {
        &self.launch.working_directory
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn last_reconfigure(&self) -> Option<ReconfigureRecord> {
        self.last_reconfigure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn last_command(&self) -> Option<Command> {
        self.state.lock().await.last_command
    }

    /// Pid of the current (or most recent) child.
    pub async fn pid(&self) -> Option<u32> {
        self.state.lock().await.handle.as_ref().map(ProcessHandle::pid)
    }

    /// Spawn the worker and return its pid.
    ///
    /// Already running: returns the live pid without spawning.
    pub async fn start(&self) -> Result<u32, SupervisorError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SupervisorError::ProcessClosed(self.session.clone()));
        }
        state.last_command = Some(Command::Start);

        if let Some(handle) = state.handle.as_ref().filter(|h| self.handle_alive(h)) {
            return Ok(handle.pid());
        }

        self.unsubscribe(&mut state);
        let handle = self
            .spawner
            .spawn(&self.launch)
            .map_err(|source| SupervisorError::Spawn {
                instance: self.instance_id,
                source,
            })?;
        let pid = handle.pid();
        state.exit_watch = Some(self.watch_exit(&handle));
        state.handle = Some(handle);
        state.started_at = Some(Utc::now());

        tracing::info!(
            instance = %self.instance_id,
            session = %self.session,
            pid,
            "worker started",
        );
        Ok(pid)
    }

    /// Graceful stop: STOP over the control channel, force-kill when the
    /// worker does not answer within the stop timeout.
    ///
    /// Disables crash-driven restarts from here on.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.handle.is_none() {
            return;
        }
        state.last_command = Some(Command::Stop);

        let Some(handle) = state.handle.as_ref().filter(|h| self.handle_alive(h)) else {
            return;
        };
        let pid = handle.pid();
        if let Some(watch) = state.exit_watch.take() {
            watch.abort();
        }

        let response = self
            .control
            .send_receive(&self.session, Command::Stop.as_str(), Some(self.stop_timeout))
            .await
            .filter(|r| !r.trim().is_empty());

        let Some(handle) = state.handle.as_ref() else {
            return;
        };
        match response {
            Some(ack) => {
                tracing::info!(
                    instance = %self.instance_id,
                    session = %self.session,
                    pid,
                    ack = %ack,
                    "worker acknowledged stop",
                );
                if handle.wait_exit(KILL_REAP_TIMEOUT).await.is_none() {
                    tracing::warn!(
                        instance = %self.instance_id,
                        session = %self.session,
                        pid,
                        "worker acknowledged stop but kept running; killing",
                    );
                    handle.kill();
                    handle.wait_exit(KILL_REAP_TIMEOUT).await;
                }
            }
            None => {
                tracing::warn!(
                    instance = %self.instance_id,
                    session = %self.session,
                    pid,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "no response to stop; killing worker",
                );
                handle.kill();
                handle.wait_exit(KILL_REAP_TIMEOUT).await;
            }
        }
    }

    /// Fire-and-forget RECONFIGURE. The reply is recorded, never acted on.
    pub async fn reconfigure(&self) {
        let mut state = self.state.lock().await;
        if !state.handle.as_ref().is_some_and(|h| self.handle_alive(h)) {
            return;
        }
        if state.last_command != Some(Command::Stop) {
            state.last_command = Some(Command::Reconfigure);
        }

        let this = self.this.clone();
        self.control.send_async_receive(
            &self.session,
            Command::Reconfigure.as_str(),
            Some(self.stop_timeout),
            Box::new(move |response| {
                if let Some(process) = this.upgrade() {
                    process.record_reconfigure(response);
                }
            }),
        );
        tracing::debug!(instance = %self.instance_id, session = %self.session, "reconfigure sent");
    }

    /// Probe the OS. Re-arms the exit watcher if it went missing.
    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(handle) = state.handle.as_ref() else {
            return false;
        };
        if !self.handle_alive(handle) {
            return false;
        }
        if state.exit_watch.is_none() && state.last_command != Some(Command::Stop) && !state.closed
        {
            let watch = self.watch_exit(handle);
            state.exit_watch = Some(watch);
            tracing::debug!(instance = %self.instance_id, session = %self.session, "exit watcher re-armed");
        }
        true
    }

    /// Kill the child if still alive and stop watching it. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        self.unsubscribe(&mut state);
        if let Some(handle) = state.handle.as_ref().filter(|h| !h.has_exited()) {
            handle.kill();
            handle.wait_exit(KILL_REAP_TIMEOUT).await;
        }
        tracing::debug!(instance = %self.instance_id, session = %self.session, "process closed");
    }

    pub async fn status(&self) -> ProcessStatus {
        let running = self.is_running().await;
        let state = self.state.lock().await;
        ProcessStatus {
            instance_id: self.instance_id,
            name: self.name.clone(),
            session: self.session.clone(),
            pid: state.handle.as_ref().map(ProcessHandle::pid),
            running,
            last_command: state.last_command,
            working_directory: self.launch.working_directory.clone(),
            started_at: state.started_at,
            restarts: self.restarts(),
            last_reconfigure: self.last_reconfigure(),
        }
    }

    /// Command of the most recently observed spec.
    pub async fn desired_command(&self) -> Command {
        self.state.lock().await.observed.command
    }

    /// Record `spec` as the latest desired state; `true` when it differs from
    /// the previous one.
    pub(crate) async fn observe(&self, spec: &ProcessInstanceSpec) -> bool {
        let mut state = self.state.lock().await;
        if state.observed == *spec {
            return false;
        }
        state.observed = spec.clone();
        true
    }

    fn handle_alive(&self, handle: &ProcessHandle) -> bool {
        !handle.has_exited() && self.spawner.is_alive(handle.pid())
    }

    fn unsubscribe(&self, state: &mut ProcessState) {
        if let Some(watch) = state.exit_watch.take() {
            watch.abort();
        }
    }

    fn watch_exit(&self, handle: &ProcessHandle) -> AbortHandle {
        let mut exit_rx = handle.subscribe_exit();
        let pid = handle.pid();
        let this = self.this.clone();
        let task = tokio::spawn(async move {
            let event = loop {
                let current = *exit_rx.borrow_and_update();
                if let Some(event) = current {
                    break event;
                }
                if exit_rx.changed().await.is_err() {
                    let last = *exit_rx.borrow();
                    match last {
                        Some(event) => break event,
                        None => return,
                    }
                }
            };
            if let Some(process) = this.upgrade() {
                process.on_exit(pid, event).await;
            }
        });
        task.abort_handle()
    }

    async fn on_exit(&self, pid: u32, event: ExitEvent) {
        let mut state = self.state.lock().await;
        if state.handle.as_ref().map(ProcessHandle::pid) != Some(pid) {
            tracing::debug!(session = %self.session, pid, "ignoring exit of a replaced child");
            return;
        }
        // Runs on the watcher task itself: drop the handle without aborting.
        state.exit_watch = None;
        if state.closed {
            return;
        }

        if state.last_command == Some(Command::Stop) {
            tracing::info!(
                instance = %self.instance_id,
                session = %self.session,
                pid,
                code = ?event.code,
                "worker exited after stop",
            );
            return;
        }
        if !self.auto_restart {
            tracing::warn!(
                instance = %self.instance_id,
                session = %self.session,
                pid,
                code = ?event.code,
                "worker exited; auto-restart disabled",
            );
            return;
        }

        match self.spawner.spawn(&self.launch) {
            Ok(handle) => {
                let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    instance = %self.instance_id,
                    session = %self.session,
                    old_pid = pid,
                    pid = handle.pid(),
                    code = ?event.code,
                    restarts,
                    "worker exited unexpectedly; restarted",
                );
                state.exit_watch = Some(self.watch_exit(&handle));
                state.handle = Some(handle);
                state.started_at = Some(Utc::now());
            }
            Err(err) => {
                tracing::error!(
                    instance = %self.instance_id,
                    session = %self.session,
                    error = %err,
                    "auto-restart failed",
                );
            }
        }
    }

    fn record_reconfigure(&self, response: Option<String>) {
        let outcome = match response.filter(|r| !r.trim().is_empty()) {
            Some(text) => {
                tracing::info!(instance = %self.instance_id, session = %self.session, response = %text, "reconfigure acknowledged");
                ReconfigureOutcome::Acknowledged(text)
            }
            None => {
                tracing::warn!(instance = %self.instance_id, session = %self.session, "no response to reconfigure");
                ReconfigureOutcome::NoResponse
            }
        };
        *self
            .last_reconfigure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ReconfigureRecord {
            at: Utc::now(),
            outcome,
        });
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(watch) = state.exit_watch.take() {
            watch.abort();
        }
        if state.closed {
            return;
        }
        if let Some(handle) = state.handle.as_ref() {
            handle.kill();
        }
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("session", &self.session)
            .field("instance_id", &self.instance_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
