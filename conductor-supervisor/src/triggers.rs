//! Refresh triggers: the periodic monitor and the configuration file watch.
//!
//! Both feed [`RefreshRequest`]s into the supervisor's bounded refresh queue;
//! a single processor task drains it, so reconciliations never overlap.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use conductor_core::{ConfigSource, ControllerSettings};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::SupervisorError;
use crate::supervisor::ReconcileReport;

/// What asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Monitor,
    FileChange,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Monitor => "monitor",
            Trigger::FileChange => "file-change",
            Trigger::Manual => "manual",
        })
    }
}

pub struct RefreshRequest {
    pub trigger: Trigger,
    /// Receives the report, or `None` when the reload failed.
    pub respond_to: Option<oneshot::Sender<Option<ReconcileReport>>>,
}

impl RefreshRequest {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            respond_to: None,
        }
    }
}

/// Accepts a change only when the source's modification time has moved past
/// the last accepted one by more than `threshold`.
#[derive(Debug, Clone)]
pub struct ChangeDebouncer {
    threshold: Duration,
    last_accepted: Option<SystemTime>,
}

impl ChangeDebouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_accepted: None,
        }
    }

    pub fn accept(&mut self, modified: SystemTime) -> bool {
        if let Some(last) = self.last_accepted {
            let advanced = modified
                .duration_since(last)
                .map(|elapsed| elapsed > self.threshold)
                .unwrap_or(false);
            if !advanced {
                return false;
            }
        }
        self.last_accepted = Some(modified);
        true
    }
}

struct FileWatch {
    debounce: Duration,
    _watcher: RecommendedWatcher,
    bridge: JoinHandle<()>,
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

/// Armed monitor/watch tasks, re-armed whenever controller settings change.
pub(crate) struct TriggerSet {
    refresh_tx: mpsc::Sender<RefreshRequest>,
    source: Arc<dyn ConfigSource>,
    monitor: Option<(Duration, JoinHandle<()>)>,
    watch: Option<FileWatch>,
}

impl TriggerSet {
    pub(crate) fn new(refresh_tx: mpsc::Sender<RefreshRequest>, source: Arc<dyn ConfigSource>) -> Self {
        Self {
            refresh_tx,
            source,
            monitor: None,
            watch: None,
        }
    }

    /// Make the armed triggers match `settings`; unchanged triggers keep running.
    pub(crate) fn apply(&mut self, settings: &ControllerSettings) -> Result<(), SupervisorError> {
        let wanted_monitor = settings
            .monitor_process
            .then(|| settings.monitor_interval())
            .filter(|period| !period.is_zero());
        if self.monitor.as_ref().map(|(period, _)| *period) != wanted_monitor {
            self.stop_monitor();
            if let Some(period) = wanted_monitor {
                let task = tokio::spawn(monitor_task(period, self.refresh_tx.clone()));
                self.monitor = Some((period, task));
                tracing::info!(interval_secs = period.as_secs(), "process monitor armed");
            }
        }

        let wanted_watch = settings.watch_file.then(|| settings.debounce());
        if self.watch.as_ref().map(|w| w.debounce) != wanted_watch {
            self.watch = None;
            if let Some(debounce) = wanted_watch {
                match self.source.watch_path() {
                    Some(path) => {
                        let path = path.to_path_buf();
                        self.watch = Some(self.start_watch(&path, debounce)?);
                        tracing::info!(path = %path.display(), "configuration watch armed");
                    }
                    None => tracing::warn!(
                        source = %self.source.describe(),
                        "configuration source cannot be watched",
                    ),
                }
            }
        }
        Ok(())
    }

    /// Stop the monitor and release the watch.
    pub(crate) fn halt(&mut self) {
        self.stop_monitor();
        if self.watch.take().is_some() {
            tracing::debug!("configuration watch released");
        }
    }

    pub(crate) fn monitor_interval(&self) -> Option<Duration> {
        self.monitor.as_ref().map(|(period, _)| *period)
    }

    pub(crate) fn watching(&self) -> bool {
        self.watch.is_some()
    }

    fn stop_monitor(&mut self) {
        if let Some((_, task)) = self.monitor.take() {
            task.abort();
            tracing::debug!("process monitor stopped");
        }
    }

    fn start_watch(&self, path: &Path, debounce: Duration) -> Result<FileWatch, SupervisorError> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| SupervisorError::Runtime(format!("cannot watch {}", path.display())))?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());

        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let bridge = tokio::spawn(watch_bridge(
            event_rx,
            file_name,
            self.source.clone(),
            ChangeDebouncer::new(debounce),
            self.refresh_tx.clone(),
        ));
        Ok(FileWatch {
            debounce,
            _watcher: watcher,
            bridge,
        })
    }
}

impl Drop for TriggerSet {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

async fn monitor_task(period: Duration, refresh_tx: mpsc::Sender<RefreshRequest>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        interval.tick().await;
        if refresh_tx
            .send(RefreshRequest::new(Trigger::Monitor))
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn watch_bridge(
    mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    file_name: OsString,
    source: Arc<dyn ConfigSource>,
    mut debouncer: ChangeDebouncer,
    refresh_tx: mpsc::Sender<RefreshRequest>,
) {
    while let Some(event) = event_rx.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "configuration watch error");
                continue;
            }
        };
        if !is_relevant_event_kind(&event.kind) {
            continue;
        }
        if !event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
        {
            continue;
        }

        let modified = match source.last_modified() {
            Ok(modified) => modified,
            Err(err) => {
                tracing::debug!(error = %err, "cannot stat configuration after change event");
                continue;
            }
        };
        if !debouncer.accept(modified) {
            continue;
        }

        tracing::info!(source = %source.describe(), "configuration change detected");
        if refresh_tx
            .send(RefreshRequest::new(Trigger::FileChange))
            .await
            .is_err()
        {
            break;
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}
