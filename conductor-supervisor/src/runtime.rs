//! Console host: init, start the fleet, wait for a termination signal, stop.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::signal::unix::{signal, SignalKind};

use crate::error::{io_err, SupervisorError};
use crate::supervisor::Supervisor;

/// Build a multi-threaded runtime and run the supervisor to completion.
pub fn start_blocking(config: &Path, channel_dir: &Path) -> Result<(), SupervisorError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config.to_path_buf(), channel_dir.to_path_buf()))
}

/// Run a supervisor over `config` until ctrl-c or SIGTERM.
pub async fn run(config: PathBuf, channel_dir: PathBuf) -> Result<(), SupervisorError> {
    ensure_channel_dir(&channel_dir)?;

    let supervisor = Supervisor::for_config_file(&config, &channel_dir);
    supervisor.init().await?;
    let report = supervisor.start_all().await;
    tracing::info!(
        config = %config.display(),
        channel_dir = %channel_dir.display(),
        started = report.started(),
        failed = report.failed(),
        "supervisor running",
    );
    supervisor.log_status().await;

    let signalled = wait_for_shutdown_signal().await;
    supervisor.shutdown().await;
    signalled
}

async fn wait_for_shutdown_signal() -> Result<(), SupervisorError> {
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|err| SupervisorError::Runtime(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c, shutting down supervisor");
        }
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down supervisor");
        }
    }
    Ok(())
}

/// Create the rendezvous directory, owner-only.
pub fn ensure_channel_dir(dir: &Path) -> Result<(), SupervisorError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

/// `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn set_dir_permissions(path: &Path) -> Result<(), SupervisorError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| io_err(path, e))
}
