//! Blocking one-shot control exchanges for tooling outside a runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use conductor_channel::ClientChannel;
use conductor_core::SessionToken;

use crate::error::{io_err, SupervisorError};

/// Send `message` to the worker listening as `session` and wait for its reply.
///
/// Fails fast when no socket exists for the session; otherwise any transport
/// failure is `Ok(None)`.
pub fn send_command(
    channel_dir: &Path,
    session: &SessionToken,
    message: &str,
    timeout: Duration,
) -> Result<Option<String>, SupervisorError> {
    let socket = session_socket(channel_dir, session)?;
    if !socket.exists() {
        return Err(SupervisorError::WorkerNotListening { socket });
    }
    let client = ClientChannel::new(socket);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    Ok(runtime.block_on(client.send_receive(message, Some(timeout))))
}

/// Socket a worker with this session listens on.
pub fn session_socket(
    channel_dir: &Path,
    session: &SessionToken,
) -> Result<PathBuf, SupervisorError> {
    conductor_channel::channel_path(channel_dir, session.as_str())
        .map_err(|err| SupervisorError::Runtime(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_socket_is_reported_before_connecting() {
        let dir = TempDir::new().expect("tempdir");
        let err = send_command(
            dir.path(),
            &SessionToken::from("absent"),
            "STOP",
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(
            matches!(err, SupervisorError::WorkerNotListening { .. }),
            "got: {err}"
        );
    }

    #[test]
    fn session_socket_uses_sock_suffix() {
        let path = session_socket(Path::new("/run/c"), &SessionToken::from("abc")).expect("valid");
        assert_eq!(path, PathBuf::from("/run/c/abc.sock"));
    }

    #[test]
    fn nested_session_name_is_rejected_before_any_io() {
        let dir = TempDir::new().expect("tempdir");
        let err = send_command(
            dir.path(),
            &SessionToken::from("../escape"),
            "STOP",
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(err, SupervisorError::Runtime(_)), "got: {err}");
    }
}
