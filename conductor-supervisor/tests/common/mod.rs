//! In-memory collaborators for driving the supervisor without OS processes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use conductor_core::{
    Command, ConfigError, ConfigSource, ConfigurationSnapshot, InstanceId, ProcessInstanceSpec,
    SessionToken,
};
use conductor_supervisor::{
    ChildSignals, ControlClient, ExitEvent, LaunchSpec, ProcessHandle, ProcessSpawner,
    ResponseCallback, Supervisor,
};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Spawner
// ---------------------------------------------------------------------------

struct FakeChild {
    session: SessionToken,
    exit: Arc<watch::Sender<Option<ExitEvent>>>,
    alive: Arc<AtomicBool>,
}

impl FakeChild {
    fn finish(&self, pid: u32, code: Option<i32>) {
        self.alive.store(false, Ordering::SeqCst);
        self.exit.send_replace(Some(ExitEvent { pid, code }));
    }
}

#[derive(Default)]
pub struct FakeSpawner {
    next_pid: AtomicU32,
    children: Mutex<HashMap<u32, FakeChild>>,
    launches: Mutex<Vec<LaunchSpec>>,
    failing: Mutex<HashSet<PathBuf>>,
    kills: Arc<AtomicUsize>,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawning this executable fails with `NotFound`.
    pub fn fail_executable(&self, executable: impl Into<PathBuf>) {
        self.failing.lock().unwrap().insert(executable.into());
    }

    pub fn spawn_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn alive(&self, pid: u32) -> bool {
        self.is_alive(pid)
    }

    /// Unsolicited exit of `pid`.
    pub fn crash(&self, pid: u32) {
        if let Some(child) = self.children.lock().unwrap().get(&pid) {
            child.finish(pid, Some(1));
        }
    }

    /// The OS forgets `pid` without an exit notification.
    pub fn vanish(&self, pid: u32) {
        if let Some(child) = self.children.lock().unwrap().get(&pid) {
            child.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Clean exit of every live child of `session`.
    pub fn finish_session(&self, session: &SessionToken) {
        for (pid, child) in self.children.lock().unwrap().iter() {
            if &child.session == session && child.alive.load(Ordering::SeqCst) {
                child.finish(*pid, Some(0));
            }
        }
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, launch: &LaunchSpec) -> io::Result<ProcessHandle> {
        if self.failing.lock().unwrap().contains(&launch.executable) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such executable"));
        }
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (handle, signals) = ProcessHandle::new(pid);
        let ChildSignals { exit, mut kill } = signals;
        let exit = Arc::new(exit);
        let alive = Arc::new(AtomicBool::new(true));

        {
            let exit = exit.clone();
            let alive = alive.clone();
            let kills = self.kills.clone();
            tokio::spawn(async move {
                if kill.recv().await.is_some() {
                    kills.fetch_add(1, Ordering::SeqCst);
                    alive.store(false, Ordering::SeqCst);
                    exit.send_replace(Some(ExitEvent { pid, code: None }));
                }
            });
        }

        self.children.lock().unwrap().insert(
            pid,
            FakeChild {
                session: launch.session.clone(),
                exit,
                alive,
            },
        );
        self.launches.lock().unwrap().push(launch.clone());
        Ok(handle)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.children
            .lock()
            .unwrap()
            .get(&pid)
            .map(|child| child.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Control channel
// ---------------------------------------------------------------------------

/// How the fake worker answers.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer immediately; an acknowledged STOP also ends the worker.
    Text(String),
    /// Never answer: waits out the caller's timeout, then `None`.
    Hang,
    /// Fail immediately.
    Refused,
}

pub struct FakeControl {
    spawner: Arc<FakeSpawner>,
    stop_reply: Mutex<Reply>,
    reconfigure_reply: Mutex<Reply>,
    sent: Mutex<Vec<(SessionToken, String)>>,
}

impl FakeControl {
    pub fn new(spawner: Arc<FakeSpawner>) -> Arc<Self> {
        Arc::new(Self {
            spawner,
            stop_reply: Mutex::new(Reply::Text("EXIT".to_string())),
            reconfigure_reply: Mutex::new(Reply::Text("RECONFIGURE".to_string())),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_stop_reply(&self, reply: Reply) {
        *self.stop_reply.lock().unwrap() = reply;
    }

    pub fn set_reconfigure_reply(&self, reply: Reply) {
        *self.reconfigure_reply.lock().unwrap() = reply;
    }

    pub fn sent(&self) -> Vec<(SessionToken, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self, message: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, sent)| sent == message)
            .count()
    }

    fn record(&self, session: &SessionToken, message: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((session.clone(), message.to_string()));
    }

    fn reply_for(&self, message: &str) -> Reply {
        if message == Command::Stop.as_str() {
            self.stop_reply.lock().unwrap().clone()
        } else {
            self.reconfigure_reply.lock().unwrap().clone()
        }
    }
}

#[async_trait]
impl ControlClient for FakeControl {
    async fn send_receive(
        &self,
        session: &SessionToken,
        message: &str,
        timeout: Option<Duration>,
    ) -> Option<String> {
        self.record(session, message);
        match self.reply_for(message) {
            Reply::Text(text) => {
                if message == Command::Stop.as_str() {
                    self.spawner.finish_session(session);
                }
                Some(text)
            }
            Reply::Hang => {
                tokio::time::sleep(timeout.unwrap_or(Duration::from_secs(3600))).await;
                None
            }
            Reply::Refused => None,
        }
    }

    fn send_async_receive(
        &self,
        session: &SessionToken,
        message: &str,
        _timeout: Option<Duration>,
        on_response: ResponseCallback,
    ) {
        self.record(session, message);
        let response = match self.reply_for(message) {
            Reply::Text(text) => Some(text),
            Reply::Hang | Reply::Refused => None,
        };
        on_response(response);
    }
}

// ---------------------------------------------------------------------------
// Configuration source
// ---------------------------------------------------------------------------

pub struct MemorySource {
    snapshot: Mutex<Result<ConfigurationSnapshot, String>>,
    load_delay: Mutex<Duration>,
}

impl MemorySource {
    pub fn new(snapshot: ConfigurationSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Ok(snapshot)),
            load_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Make every load block its thread for `delay`.
    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock().unwrap() = delay;
    }

    pub fn set(&self, snapshot: ConfigurationSnapshot) {
        *self.snapshot.lock().unwrap() = Ok(snapshot);
    }

    pub fn fail(&self, reason: &str) {
        *self.snapshot.lock().unwrap() = Err(reason.to_string());
    }
}

impl ConfigSource for MemorySource {
    fn load(&self) -> Result<ConfigurationSnapshot, ConfigError> {
        let delay = *self.load_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .map_err(ConfigError::Invalid)
    }

    fn last_modified(&self) -> Result<SystemTime, ConfigError> {
        Ok(SystemTime::now())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn spec(id: u32, command: Command) -> ProcessInstanceSpec {
    ProcessInstanceSpec {
        instance_id: InstanceId(id),
        name: format!("worker-{id}"),
        command,
        executable: PathBuf::from(format!("/opt/workers/worker-{id}")),
        args: vec![],
        working_directory: None,
        auto_restart: false,
        log_config: None,
    }
}

pub fn snapshot(instances: Vec<ProcessInstanceSpec>) -> ConfigurationSnapshot {
    ConfigurationSnapshot {
        instances,
        ..ConfigurationSnapshot::default()
    }
}

pub struct Harness {
    pub spawner: Arc<FakeSpawner>,
    pub control: Arc<FakeControl>,
    pub source: Arc<MemorySource>,
    pub supervisor: Supervisor,
}

pub fn harness(initial: ConfigurationSnapshot) -> Harness {
    let spawner = FakeSpawner::new();
    let control = FakeControl::new(spawner.clone());
    let source = MemorySource::new(initial);
    let supervisor = Supervisor::new(
        source.clone(),
        spawner.clone(),
        control.clone(),
        "/tmp/conductor-test-channels",
    );
    Harness {
        spawner,
        control,
        source,
        supervisor,
    }
}

/// Poll `check` until it holds, failing after a bounded number of attempts.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
