//! Configuration snapshot persistence.
//!
//! # Storage layout
//!
//! One YAML document per supervisor:
//!
//! ```text
//! controller:
//!   watch_file: true
//!   monitor_process: true
//!   monitor_interval_seconds: 60
//! instances:
//!   - instance_id: 1
//!     name: billing
//!     command: START
//!     executable: /srv/billing/worker
//! ```
//!
//! # API pattern
//!
//! Free functions take an explicit path (`load_snapshot_at`, `save_snapshot_at`);
//! [`FileConfigSource`] wraps a path behind the [`ConfigSource`] trait so the
//! supervisor can be driven by an in-memory source in tests.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, SystemTime};

use crate::error::{io_err, ConfigError};
use crate::types::ConfigurationSnapshot;

/// Attempts made to read a file another process may still hold open.
const READ_ATTEMPTS: usize = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// 1. Source abstraction
// ---------------------------------------------------------------------------

/// Where snapshots come from.
pub trait ConfigSource: Send + Sync {
    /// Load a complete snapshot from the source of truth.
    fn load(&self) -> Result<ConfigurationSnapshot, ConfigError>;

    /// Last-modified timestamp, used to debounce change notifications.
    fn last_modified(&self) -> Result<SystemTime, ConfigError>;

    /// Path to watch for change notifications, if the source is file-backed.
    fn watch_path(&self) -> Option<&Path> {
        None
    }

    /// Human-readable identifier for log lines.
    fn describe(&self) -> String;
}

/// A snapshot stored as a YAML file.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<ConfigurationSnapshot, ConfigError> {
        load_snapshot_at(&self.path)
    }

    fn last_modified(&self) -> Result<SystemTime, ConfigError> {
        last_modified_at(&self.path)
    }

    fn watch_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate a snapshot from `path`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML,
/// `ConfigError::Invalid` if the document breaks a snapshot invariant.
pub fn load_snapshot_at(path: &Path) -> Result<ConfigurationSnapshot, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = read_with_retry(path)?;
    let snapshot: ConfigurationSnapshot =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
    snapshot.validate()?;
    Ok(snapshot)
}

/// Modification time of the file at `path`.
pub fn last_modified_at(path: &Path) -> Result<SystemTime, ConfigError> {
    match std::fs::metadata(path) {
        Ok(meta) => meta.modified().map_err(|e| io_err(path, e)),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(io_err(path, err)),
    }
}

fn read_with_retry(path: &Path) -> Result<String, ConfigError> {
    let mut attempt = 1;
    loop {
        match std::fs::read_to_string(path) {
            Ok(contents) => return Ok(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(err) if attempt >= READ_ATTEMPTS => return Err(io_err(path, err)),
            Err(_) => {
                attempt += 1;
                sleep(READ_RETRY_DELAY);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `snapshot` to `path`.
///
/// Write flow: serialize → `.tmp` sibling → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem).
pub fn save_snapshot_at(path: &Path, snapshot: &ConfigurationSnapshot) -> Result<(), ConfigError> {
    snapshot.validate()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "conductor.yaml".to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let yaml = serde_yaml::to_string(snapshot)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_source_reports_watch_path() {
        let source = FileConfigSource::new("/etc/conductor.yaml");
        assert_eq!(source.watch_path(), Some(Path::new("/etc/conductor.yaml")));
        assert_eq!(source.describe(), "/etc/conductor.yaml");
    }

    #[test]
    fn last_modified_of_missing_file_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let err = last_modified_at(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    }

    #[test]
    fn empty_document_is_default_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("conductor.yaml");
        std::fs::write(&path, "{}\n").expect("write");

        let snapshot = load_snapshot_at(&path).expect("load");
        assert!(snapshot.instances.is_empty());
        assert!(!snapshot.controller.watch_file);
        assert_eq!(snapshot.controller.monitor_interval_seconds, 60);
        assert_eq!(snapshot.controller.stop_timeout_ms, 3000);
        assert_eq!(snapshot.controller.debounce_ms, 500);
    }
}
