//! Domain types for the supervisor's desired state.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Acknowledgement a worker sends back for `STOP`.
pub const EXIT_ACK: &str = "EXIT";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable integer identifying one logical worker slot across snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for InstanceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Opaque per-process identifier, doubling as the control channel's
/// rendezvous name. Generated once and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Desired command for a process instance; also the control-channel wire word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Command {
    Start,
    Stop,
    Reconfigure,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Reconfigure => "RECONFIGURE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "START" => Ok(Command::Start),
            "STOP" => Ok(Command::Stop),
            "RECONFIGURE" => Ok(Command::Reconfigure),
            other => Err(format!(
                "unknown command '{other}'; expected: START, STOP, RECONFIGURE"
            )),
        }
    }
}

impl TryFrom<String> for Command {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Desired state for one worker slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstanceSpec {
    pub instance_id: InstanceId,
    #[serde(default)]
    pub name: String,
    pub command: Command,
    /// Resolved against `working_directory` when relative.
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_config: Option<PathBuf>,
}

impl ProcessInstanceSpec {
    /// Full path of the executable to spawn.
    pub fn executable_path(&self) -> PathBuf {
        match &self.working_directory {
            Some(dir) if self.executable.is_relative() => dir.join(&self.executable),
            _ => self.executable.clone(),
        }
    }

    /// Directory the worker runs in: the configured one, else the executable's.
    pub fn effective_working_directory(&self) -> PathBuf {
        if let Some(dir) = &self.working_directory {
            return dir.clone();
        }
        self.executable_path()
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn default_monitor_interval_seconds() -> u64 {
    60
}

fn default_stop_timeout_ms() -> u64 {
    3000
}

fn default_debounce_ms() -> u64 {
    500
}

/// How the supervisor watches for configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default)]
    pub watch_file: bool,
    #[serde(default)]
    pub monitor_process: bool,
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            watch_file: false,
            monitor_process: false,
            monitor_interval_seconds: default_monitor_interval_seconds(),
            stop_timeout_ms: default_stop_timeout_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl ControllerSettings {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// A complete desired-state replacement; never a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfigurationSnapshot {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub instances: Vec<ProcessInstanceSpec>,
}

impl ConfigurationSnapshot {
    pub fn get(&self, instance_id: InstanceId) -> Option<&ProcessInstanceSpec> {
        self.instances.iter().find(|spec| spec.instance_id == instance_id)
    }

    pub fn contains(&self, instance_id: InstanceId) -> bool {
        self.get(instance_id).is_some()
    }

    /// Case-insensitive lookup by instance name.
    pub fn by_name(&self, name: &str) -> Option<&ProcessInstanceSpec> {
        self.instances
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
    }

    /// Check the invariants a loaded snapshot must hold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for spec in &self.instances {
            if !seen.insert(spec.instance_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate instance_id {}",
                    spec.instance_id
                )));
            }
            if spec.executable.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "instance {} has an empty executable",
                    spec.instance_id
                )));
            }
        }
        if self.controller.monitor_process && self.controller.monitor_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "monitor_interval_seconds must be positive when monitor_process is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
