//! Snapshot load error-message, atomic-write-safety, and document-shape tests.

use assert_fs::prelude::*;
use conductor_core::{
    load_snapshot_at, save_snapshot_at, snapshot::last_modified_at, Command, ConfigError,
    ConfigSource, ConfigurationSnapshot, ControllerSettings, FileConfigSource, InstanceId,
    ProcessInstanceSpec,
};
use predicates::prelude::predicate;
use std::fs;
use std::path::PathBuf;

const FULL_DOCUMENT: &str = r#"
controller:
  watch_file: true
  monitor_process: true
  monitor_interval_seconds: 15
  stop_timeout_ms: 1500
instances:
  - instance_id: 1
    name: billing
    command: start
    executable: bin/worker
    args: ["--port", "9000"]
    working_directory: /srv/billing
    auto_restart: true
    log_config: worker.filter
  - instance_id: 2
    name: reports
    command: Reconfigure
    executable: /opt/reports/worker
"#;

fn spec(id: u32, command: Command) -> ProcessInstanceSpec {
    ProcessInstanceSpec {
        instance_id: InstanceId(id),
        name: format!("worker-{id}"),
        command,
        executable: PathBuf::from("/opt/worker"),
        args: vec![],
        working_directory: None,
        auto_restart: false,
        log_config: None,
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_file_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = load_snapshot_at(&dir.path().join("conductor.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("configuration not found"));
    assert!(err.to_string().contains("conductor.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("conductor.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = load_snapshot_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("conductor.yaml"));
}

#[test]
fn load_unknown_command_returns_parse_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("conductor.yaml");
    file.write_str("instances:\n  - instance_id: 1\n    command: RESTART\n    executable: /bin/true\n")
        .expect("write");

    let err = load_snapshot_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("unknown command"), "got: {err}");
}

#[test]
fn load_duplicate_instance_ids_is_invalid() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("conductor.yaml");
    file.write_str(
        "instances:\n  - {instance_id: 4, command: START, executable: /bin/a}\n  - {instance_id: 4, command: STOP, executable: /bin/b}\n",
    )
    .expect("write");

    let err = load_snapshot_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Document shape
// ---------------------------------------------------------------------------

#[test]
fn full_document_loads_every_field() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("conductor.yaml");
    file.write_str(FULL_DOCUMENT).expect("write");

    let snapshot = load_snapshot_at(file.path()).expect("load");
    assert!(snapshot.controller.watch_file);
    assert!(snapshot.controller.monitor_process);
    assert_eq!(snapshot.controller.monitor_interval_seconds, 15);
    assert_eq!(snapshot.controller.stop_timeout_ms, 1500);
    assert_eq!(snapshot.controller.debounce_ms, 500, "debounce keeps its default");

    let billing = snapshot.get(InstanceId(1)).expect("instance 1");
    assert_eq!(billing.command, Command::Start);
    assert_eq!(billing.executable_path(), PathBuf::from("/srv/billing/bin/worker"));
    assert_eq!(billing.args, vec!["--port".to_string(), "9000".to_string()]);
    assert!(billing.auto_restart);

    let reports = snapshot.by_name("reports").expect("instance 2");
    assert_eq!(reports.command, Command::Reconfigure);
    assert!(!reports.auto_restart, "auto_restart defaults to false");
    assert_eq!(reports.effective_working_directory(), PathBuf::from("/opt/reports"));
}

#[test]
fn file_source_loads_and_reports_mtime() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("conductor.yaml");
    file.write_str(FULL_DOCUMENT).expect("write");

    let source = FileConfigSource::new(file.path());
    let snapshot = source.load().expect("load through source");
    assert_eq!(snapshot.instances.len(), 2);
    let modified = source.last_modified().expect("mtime");
    assert_eq!(modified, last_modified_at(file.path()).expect("mtime direct"));
}

// ---------------------------------------------------------------------------
// 3. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_returns_same_snapshot() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("nested").join("conductor.yaml");
    let snapshot = ConfigurationSnapshot {
        controller: ControllerSettings {
            watch_file: true,
            ..ControllerSettings::default()
        },
        instances: vec![spec(1, Command::Start), spec(2, Command::Stop)],
    };

    save_snapshot_at(&path, &snapshot).expect("save");
    dir.child("nested/conductor.yaml").assert(predicate::path::exists());
    dir.child("nested/conductor.yaml.tmp")
        .assert(predicate::path::missing());

    let loaded = load_snapshot_at(&path).expect("load");
    assert_eq!(loaded, snapshot);
}

#[test]
fn save_refuses_invalid_snapshot_and_leaves_original() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("conductor.yaml");
    let good = ConfigurationSnapshot {
        controller: ControllerSettings::default(),
        instances: vec![spec(1, Command::Start)],
    };
    save_snapshot_at(&path, &good).expect("save");
    let original = fs::read(&path).expect("read original");

    let bad = ConfigurationSnapshot {
        controller: ControllerSettings::default(),
        instances: vec![spec(1, Command::Start), spec(1, Command::Stop)],
    };
    let err = save_snapshot_at(&path, &bad).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert_eq!(fs::read(&path).expect("read after"), original);
}
