//! The reconciliation engine.
//!
//! # Ownership
//!
//! [`Supervisor`] is a cheap handle over a shared `Inner`. The process table
//! maps session token to [`ManagedProcess`]; lookups by instance id or pid
//! scan it. Table mutation happens only under the `ops` lock, which also
//! serializes reconciliation against fleet operations.
//!
//! # Refresh flow
//!
//! ```text
//! monitor tick ─┐
//! file change ──┼─► refresh queue ─► processor task ─► refresh()
//! request ──────┘                                      ├─ load snapshot
//!                                                       ├─ reconcile()
//!                                                       └─ re-arm triggers
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use conductor_core::{
    Command, ConfigSource, ConfigurationSnapshot, ControllerSettings, FileConfigSource, InstanceId,
    ProcessInstanceSpec, SessionToken,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::control::{ChannelControl, ControlClient};
use crate::error::SupervisorError;
use crate::paths::REFRESH_QUEUE_DEPTH;
use crate::process::{ManagedProcess, ProcessSettings, ProcessStatus};
use crate::spawn::{OsProcessSpawner, ProcessSpawner};
use crate::triggers::{RefreshRequest, Trigger, TriggerSet};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One transition performed by reconciliation or a fleet operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    Started {
        instance: InstanceId,
        session: SessionToken,
        pid: u32,
    },
    Stopped {
        instance: InstanceId,
        session: SessionToken,
    },
    Reconfigured {
        instance: InstanceId,
        session: SessionToken,
    },
    Retired {
        instance: InstanceId,
        session: SessionToken,
    },
    Failed {
        instance: InstanceId,
        reason: String,
    },
}

impl ReconcileAction {
    pub fn instance(&self) -> InstanceId {
        match self {
            ReconcileAction::Started { instance, .. }
            | ReconcileAction::Stopped { instance, .. }
            | ReconcileAction::Reconfigured { instance, .. }
            | ReconcileAction::Retired { instance, .. }
            | ReconcileAction::Failed { instance, .. } => *instance,
        }
    }
}

/// Everything a pass changed. Empty means the table already matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub actions: Vec<ReconcileAction>,
}

impl ReconcileReport {
    pub fn is_converged(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn started(&self) -> usize {
        self.count(|a| matches!(a, ReconcileAction::Started { .. }))
    }

    pub fn stopped(&self) -> usize {
        self.count(|a| matches!(a, ReconcileAction::Stopped { .. }))
    }

    pub fn reconfigured(&self) -> usize {
        self.count(|a| matches!(a, ReconcileAction::Reconfigured { .. }))
    }

    pub fn retired(&self) -> usize {
        self.count(|a| matches!(a, ReconcileAction::Retired { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|a| matches!(a, ReconcileAction::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ReconcileAction) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(a)).count()
    }

    fn push(&mut self, action: ReconcileAction) {
        self.actions.push(action);
    }
}

/// Addresses one managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessRef {
    Session(SessionToken),
    Pid(u32),
}

impl fmt::Display for ProcessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRef::Session(session) => write!(f, "session {session}"),
            ProcessRef::Pid(pid) => write!(f, "pid {pid}"),
        }
    }
}

/// Which refresh triggers are currently armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmedTriggers {
    pub monitor_interval: Option<std::time::Duration>,
    pub watching: bool,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Wiring {
    refresh_tx: mpsc::Sender<RefreshRequest>,
    triggers: TriggerSet,
    processor: JoinHandle<()>,
    halted: bool,
}

struct Inner {
    source: Arc<dyn ConfigSource>,
    spawner: Arc<dyn ProcessSpawner>,
    control: Arc<dyn ControlClient>,
    channel_dir: PathBuf,
    table: RwLock<HashMap<SessionToken, Arc<ManagedProcess>>>,
    ops: Mutex<()>,
    settings: RwLock<ControllerSettings>,
    wiring: Mutex<Option<Wiring>>,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        spawner: Arc<dyn ProcessSpawner>,
        control: Arc<dyn ControlClient>,
        channel_dir: impl Into<PathBuf>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(Inner {
                source,
                spawner,
                control,
                channel_dir: channel_dir.into(),
                table: RwLock::new(HashMap::new()),
                ops: Mutex::new(()),
                settings: RwLock::new(ControllerSettings::default()),
                wiring: Mutex::new(None),
                shutdown_tx,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Supervisor over a YAML file, real processes and Unix-socket channels.
    pub fn for_config_file(config: impl Into<PathBuf>, channel_dir: impl Into<PathBuf>) -> Self {
        let channel_dir = channel_dir.into();
        Self::new(
            Arc::new(FileConfigSource::new(config)),
            Arc::new(OsProcessSpawner),
            Arc::new(ChannelControl::new(channel_dir.clone())),
            channel_dir,
        )
    }

    /// Load the first snapshot, build the table (nothing started yet) and arm
    /// the refresh triggers. Load failures propagate.
    pub async fn init(&self) -> Result<(), SupervisorError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShutDown);
        }
        let _ops = self.inner.ops.lock().await;
        let mut wiring = self.inner.wiring.lock().await;
        if wiring.is_some() {
            return Err(SupervisorError::Runtime(
                "supervisor already initialised".to_string(),
            ));
        }

        let snapshot = self.load_snapshot().await?;
        *self.inner.settings.write().await = snapshot.controller.clone();

        {
            let settings = self.process_settings(&snapshot.controller);
            let mut table = self.inner.table.write().await;
            for spec in snapshot
                .instances
                .iter()
                .filter(|spec| spec.command != Command::Stop)
            {
                let process = self.create_process(spec, &settings);
                table.insert(process.session().clone(), process);
            }
        }

        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE_DEPTH);
        let processor = tokio::spawn(refresh_processor(
            Arc::downgrade(&self.inner),
            refresh_rx,
            self.inner.shutdown_tx.subscribe(),
        ));
        let mut triggers = TriggerSet::new(refresh_tx.clone(), self.inner.source.clone());
        if let Err(err) = triggers.apply(&snapshot.controller) {
            tracing::warn!(error = %err, "failed to arm refresh triggers");
        }
        *wiring = Some(Wiring {
            refresh_tx,
            triggers,
            processor,
            halted: false,
        });

        tracing::info!(
            source = %self.inner.source.describe(),
            instances = snapshot.instances.len(),
            "supervisor initialised",
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Converge the table to `snapshot`.
    ///
    /// Unseen instances are created and started unless their command is
    /// STOP. Running STOP instances are stopped, running RECONFIGURE
    /// instances are reconfigured when their spec changed, and idle START
    /// instances are started. Processes whose instance id is absent are then
    /// stopped, closed and removed.
    pub async fn reconcile(&self, snapshot: &ConfigurationSnapshot) -> ReconcileReport {
        let _ops = self.inner.ops.lock().await;
        self.reconcile_locked(snapshot).await
    }

    /// Body of [`Supervisor::reconcile`]; the caller holds `ops`.
    async fn reconcile_locked(&self, snapshot: &ConfigurationSnapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return report;
        }
        let settings = self.process_settings(&snapshot.controller);

        for spec in &snapshot.instances {
            let Some(process) = self.find_instance(spec.instance_id).await else {
                if spec.command == Command::Stop {
                    continue;
                }
                let process = self.create_process(spec, &settings);
                self.inner
                    .table
                    .write()
                    .await
                    .insert(process.session().clone(), process.clone());
                tracing::info!(
                    instance = %spec.instance_id,
                    session = %process.session(),
                    "new instance materialised",
                );
                report.push(start_action(&process).await);
                continue;
            };

            let running = process.is_running().await;
            let changed = process.observe(spec).await;
            match (running, spec.command) {
                (true, Command::Stop) => {
                    process.stop().await;
                    report.push(ReconcileAction::Stopped {
                        instance: spec.instance_id,
                        session: process.session().clone(),
                    });
                }
                (true, Command::Reconfigure) if changed => {
                    process.reconfigure().await;
                    report.push(ReconcileAction::Reconfigured {
                        instance: spec.instance_id,
                        session: process.session().clone(),
                    });
                }
                (false, Command::Start) => report.push(start_action(&process).await),
                _ => {}
            }
        }

        let retired: Vec<Arc<ManagedProcess>> = self
            .processes()
            .await
            .into_iter()
            .filter(|process| !snapshot.contains(process.instance_id()))
            .collect();
        for process in retired {
            process.stop().await;
            self.inner.table.write().await.remove(process.session());
            process.close().await;
            tracing::info!(
                instance = %process.instance_id(),
                session = %process.session(),
                "instance retired",
            );
            report.push(ReconcileAction::Retired {
                instance: process.instance_id(),
                session: process.session().clone(),
            });
        }

        if report.is_converged() {
            tracing::debug!("reconciliation found nothing to do");
        } else {
            tracing::info!(
                started = report.started(),
                stopped = report.stopped(),
                reconfigured = report.reconfigured(),
                retired = report.retired(),
                failed = report.failed(),
                "reconciliation finished",
            );
        }
        report
    }

    /// Reload from the source and reconcile. A failed load keeps the current
    /// table and returns `None`.
    ///
    /// Monitor and file-change refreshes are dropped (`None`) while the fleet
    /// is halted by [`Supervisor::stop_all`], including one that was already
    /// loading when the halt happened.
    pub async fn refresh(&self, trigger: Trigger) -> Option<ReconcileReport> {
        if self.inner.shut_down.load(Ordering::SeqCst) || self.suspended(trigger).await {
            return None;
        }
        let snapshot = match self.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(
                    trigger = %trigger,
                    error = %err,
                    "configuration reload failed; keeping current table",
                );
                return None;
            }
        };

        let report = {
            let _ops = self.inner.ops.lock().await;
            if self.suspended(trigger).await {
                tracing::debug!(trigger = %trigger, "fleet halted; refresh dropped");
                return None;
            }
            *self.inner.settings.write().await = snapshot.controller.clone();
            self.reconcile_locked(&snapshot).await
        };
        self.rearm_triggers(&snapshot.controller).await;
        if trigger == Trigger::Monitor {
            self.log_status().await;
        }
        Some(report)
    }

    /// Queue a refresh on the processor task and wait for its report.
    pub async fn request_refresh(
        &self,
        trigger: Trigger,
    ) -> Result<Option<ReconcileReport>, SupervisorError> {
        let refresh_tx = {
            let wiring = self.inner.wiring.lock().await;
            match wiring.as_ref() {
                Some(wiring) => wiring.refresh_tx.clone(),
                None => return Err(SupervisorError::ChannelClosed("refresh queue")),
            }
        };

        let (tx, rx) = oneshot::channel();
        refresh_tx
            .send(RefreshRequest {
                trigger,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| SupervisorError::ChannelClosed("refresh queue"))?;
        rx.await
            .map_err(|_| SupervisorError::ChannelClosed("refresh response"))
    }

    // -----------------------------------------------------------------------
    // Fleet operations
    // -----------------------------------------------------------------------

    /// Start every non-running process whose desired command is not STOP,
    /// then resume the refresh triggers.
    pub async fn start_all(&self) -> ReconcileReport {
        let _ops = self.inner.ops.lock().await;
        let mut report = ReconcileReport::default();
        for process in self.processes().await {
            if process.desired_command().await == Command::Stop || process.is_running().await {
                continue;
            }
            report.push(start_action(&process).await);
        }
        tracing::info!(
            started = report.started(),
            failed = report.failed(),
            "fleet start finished",
        );

        let settings = self.inner.settings.read().await.clone();
        let mut wiring = self.inner.wiring.lock().await;
        if let Some(wiring) = wiring.as_mut() {
            wiring.halted = false;
            if let Err(err) = wiring.triggers.apply(&settings) {
                tracing::warn!(error = %err, "failed to re-arm refresh triggers");
            }
        }
        report
    }

    /// Halt the triggers, stop every process, optionally close each one and
    /// clear the table.
    pub async fn stop_all(&self, dispose: bool, clean: bool) {
        let _ops = self.inner.ops.lock().await;
        {
            let mut wiring = self.inner.wiring.lock().await;
            if let Some(wiring) = wiring.as_mut() {
                wiring.halted = true;
                wiring.triggers.halt();
            }
        }

        let processes = self.processes().await;
        for process in &processes {
            process.stop().await;
            if dispose {
                process.close().await;
            }
        }
        if clean {
            self.inner.table.write().await.clear();
        }
        tracing::info!(count = processes.len(), dispose, clean, "fleet stopped");
    }

    pub async fn reconfigure_all(&self) {
        let _ops = self.inner.ops.lock().await;
        let processes = self.processes().await;
        for process in &processes {
            process.reconfigure().await;
        }
        tracing::info!(count = processes.len(), "fleet reconfigure sent");
    }

    // -----------------------------------------------------------------------
    // Single-process operations
    // -----------------------------------------------------------------------

    pub async fn start_process(&self, target: &ProcessRef) -> Result<u32, SupervisorError> {
        let _ops = self.inner.ops.lock().await;
        let process = self
            .find(target)
            .await
            .ok_or_else(|| SupervisorError::UnknownProcess(target.to_string()))?;
        process.start().await
    }

    /// Stop one process; `dispose` also closes it and drops it from the table.
    /// Returns `false` when nothing matched.
    pub async fn stop_process(&self, target: &ProcessRef, dispose: bool) -> bool {
        let _ops = self.inner.ops.lock().await;
        let Some(process) = self.find(target).await else {
            tracing::debug!(target = %target, "no process to stop");
            return false;
        };
        process.stop().await;
        if dispose {
            self.inner.table.write().await.remove(process.session());
            process.close().await;
        }
        true
    }

    pub async fn reconfigure_process(&self, target: &ProcessRef) -> bool {
        let Some(process) = self.find(target).await else {
            tracing::debug!(target = %target, "no process to reconfigure");
            return false;
        };
        process.reconfigure().await;
        true
    }

    /// Reconfigure every process whose name matches exactly.
    pub async fn reconfigure_by_name(&self, name: &str) -> usize {
        let matching: Vec<_> = self
            .processes()
            .await
            .into_iter()
            .filter(|process| process.name() == name)
            .collect();
        for process in &matching {
            process.reconfigure().await;
        }
        matching.len()
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Table entries ordered by instance id.
    pub async fn processes(&self) -> Vec<Arc<ManagedProcess>> {
        let mut processes: Vec<_> = self.inner.table.read().await.values().cloned().collect();
        processes.sort_by_key(|process| process.instance_id());
        processes
    }

    pub async fn find(&self, target: &ProcessRef) -> Option<Arc<ManagedProcess>> {
        match target {
            ProcessRef::Session(session) => self.inner.table.read().await.get(session).cloned(),
            ProcessRef::Pid(pid) => {
                for process in self.processes().await {
                    if process.pid().await == Some(*pid) {
                        return Some(process);
                    }
                }
                None
            }
        }
    }

    pub async fn find_instance(&self, instance_id: InstanceId) -> Option<Arc<ManagedProcess>> {
        self.inner
            .table
            .read()
            .await
            .values()
            .find(|process| process.instance_id() == instance_id)
            .cloned()
    }

    pub async fn status(&self) -> Vec<ProcessStatus> {
        let mut statuses = Vec::new();
        for process in self.processes().await {
            statuses.push(process.status().await);
        }
        statuses
    }

    /// One info line per managed process.
    pub async fn log_status(&self) {
        let statuses = self.status().await;
        if statuses.is_empty() {
            tracing::info!("no managed processes");
        }
        for status in statuses {
            tracing::info!(
                instance = %status.instance_id,
                name = %status.name,
                session = %status.session,
                pid = ?status.pid,
                running = status.running,
                last_command = ?status.last_command,
                restarts = status.restarts,
                "process status",
            );
        }
    }

    pub async fn settings(&self) -> ControllerSettings {
        self.inner.settings.read().await.clone()
    }

    pub async fn armed_triggers(&self) -> ArmedTriggers {
        let wiring = self.inner.wiring.lock().await;
        match wiring.as_ref() {
            Some(wiring) => ArmedTriggers {
                monitor_interval: wiring.triggers.monitor_interval(),
                watching: wiring.triggers.watching(),
            },
            None => ArmedTriggers::default(),
        }
    }

    /// Stop and close everything, then stop the refresh processor.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_all(true, true).await;

        let wiring = self.inner.wiring.lock().await.take();
        let _ = self.inner.shutdown_tx.send(());
        if let Some(wiring) = wiring {
            drop(wiring.triggers);
            if let Err(err) = wiring.processor.await {
                tracing::warn!(error = %err, "refresh processor join failure");
            }
        }
        tracing::info!("supervisor shut down");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn create_process(
        &self,
        spec: &ProcessInstanceSpec,
        settings: &ProcessSettings,
    ) -> Arc<ManagedProcess> {
        ManagedProcess::new(
            spec,
            settings,
            self.inner.spawner.clone(),
            self.inner.control.clone(),
        )
    }

    fn process_settings(&self, controller: &ControllerSettings) -> ProcessSettings {
        ProcessSettings {
            stop_timeout: controller.stop_timeout(),
            channel_dir: self.inner.channel_dir.clone(),
        }
    }

    async fn load_snapshot(&self) -> Result<ConfigurationSnapshot, SupervisorError> {
        let source = self.inner.source.clone();
        let loaded = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|err| SupervisorError::Runtime(format!("configuration load task failed: {err}")))?;
        Ok(loaded?)
    }

    /// Whether `trigger` is an automatic one and the triggers are halted.
    async fn suspended(&self, trigger: Trigger) -> bool {
        if trigger == Trigger::Manual {
            return false;
        }
        self.inner
            .wiring
            .lock()
            .await
            .as_ref()
            .is_some_and(|wiring| wiring.halted)
    }

    async fn rearm_triggers(&self, settings: &ControllerSettings) {
        let mut wiring = self.inner.wiring.lock().await;
        let Some(wiring) = wiring.as_mut().filter(|wiring| !wiring.halted) else {
            return;
        };
        if let Err(err) = wiring.triggers.apply(settings) {
            tracing::warn!(error = %err, "failed to re-arm refresh triggers");
        }
    }
}

async fn start_action(process: &ManagedProcess) -> ReconcileAction {
    match process.start().await {
        Ok(pid) => ReconcileAction::Started {
            instance: process.instance_id(),
            session: process.session().clone(),
            pid,
        },
        Err(err) => {
            tracing::error!(
                instance = %process.instance_id(),
                session = %process.session(),
                error = %err,
                "failed to start instance",
            );
            ReconcileAction::Failed {
                instance: process.instance_id(),
                reason: err.to_string(),
            }
        }
    }
}

async fn refresh_processor(
    inner: Weak<Inner>,
    mut refresh_rx: mpsc::Receiver<RefreshRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            request = refresh_rx.recv() => {
                let Some(request) = request else { break };
                let Some(inner) = inner.upgrade() else { break };
                let supervisor = Supervisor { inner };
                tracing::debug!(trigger = %request.trigger, "refresh requested");
                let report = supervisor.refresh(request.trigger).await;
                if let Some(respond_to) = request.respond_to {
                    let _ = respond_to.send(report);
                }
            }
        }
    }
}
