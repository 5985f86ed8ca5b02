//! Launch-argument contract between the supervisor and its workers.
//!
//! The supervisor prepends keyed flags to each worker's configured arguments;
//! the worker recovers them with [`WorkerArgs::parse_from`], leaving anything
//! it does not recognise for its own business logic.

use std::path::PathBuf;

use crate::types::{InstanceId, ProcessInstanceSpec, SessionToken};

pub const PIPE_NAME: &str = "--pipe-name";
pub const CHANNEL_DIR: &str = "--channel-dir";
pub const INSTANCE_ID: &str = "--id";
pub const NAME: &str = "--name";
pub const LOG_CONFIG: &str = "--log-config";
pub const AUTO_RESTART: &str = "--auto-restart";

const KNOWN_FLAGS: [&str; 6] = [PIPE_NAME, CHANNEL_DIR, INSTANCE_ID, NAME, LOG_CONFIG, AUTO_RESTART];

/// Arguments a worker receives from the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkerArgs {
    pub pipe_name: Option<String>,
    pub channel_dir: Option<PathBuf>,
    pub instance_id: Option<InstanceId>,
    pub name: Option<String>,
    pub log_config: Option<PathBuf>,
    pub auto_restart: Option<bool>,
    /// Arguments that are not part of the launch contract.
    pub rest: Vec<String>,
}

impl WorkerArgs {
    /// Arguments for launching `spec` under `session`.
    pub fn for_instance(
        spec: &ProcessInstanceSpec,
        session: &SessionToken,
        channel_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            pipe_name: Some(session.to_string()),
            channel_dir,
            instance_id: Some(spec.instance_id),
            name: Some(spec.name.clone()).filter(|name| !name.trim().is_empty()),
            log_config: spec.log_config.clone(),
            auto_restart: Some(spec.auto_restart),
            rest: spec.args.clone(),
        }
    }

    /// Render as a flat argument list: contract flags first, then `rest`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value);
            }
        };
        push(PIPE_NAME, self.pipe_name.clone());
        push(
            CHANNEL_DIR,
            self.channel_dir.as_ref().map(|d| d.display().to_string()),
        );
        push(INSTANCE_ID, self.instance_id.map(|id| id.to_string()));
        push(NAME, self.name.clone());
        push(
            LOG_CONFIG,
            self.log_config.as_ref().map(|p| p.display().to_string()),
        );
        push(AUTO_RESTART, self.auto_restart.map(|b| b.to_string()));
        args.extend(self.rest.iter().cloned());
        args
    }

    /// Recover contract flags from an argument list (program name excluded).
    ///
    /// Accepts both `--flag value` and `--flag=value`. Values that fail to
    /// parse are dropped rather than rejected.
    pub fn parse_from<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = WorkerArgs::default();
        let mut iter = args.into_iter().map(Into::into).peekable();

        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if KNOWN_FLAGS.contains(&flag) => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };
            if !KNOWN_FLAGS.contains(&flag.as_str()) {
                parsed.rest.push(arg);
                continue;
            }
            let value = match inline {
                Some(value) => Some(value),
                None => match iter.peek() {
                    Some(next) if !KNOWN_FLAGS.contains(&next.as_str()) => iter.next(),
                    _ => None,
                },
            };
            let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            match flag.as_str() {
                PIPE_NAME => parsed.pipe_name = Some(value),
                CHANNEL_DIR => parsed.channel_dir = Some(PathBuf::from(value)),
                INSTANCE_ID => parsed.instance_id = value.trim().parse().ok().map(InstanceId),
                NAME => parsed.name = Some(value),
                LOG_CONFIG => parsed.log_config = Some(PathBuf::from(value)),
                AUTO_RESTART => {
                    parsed.auto_restart = value.trim().to_ascii_lowercase().parse().ok()
                }
                _ => {}
            }
        }
        parsed
    }

    /// Channel name to bind: the pipe name, else `<name><id>` when both are known.
    pub fn rendezvous_name(&self) -> Option<String> {
        if let Some(pipe) = &self.pipe_name {
            return Some(pipe.clone());
        }
        match (&self.name, self.instance_id) {
            (Some(name), Some(id)) => Some(format!("{name}{id}")),
            _ => None,
        }
    }
}
