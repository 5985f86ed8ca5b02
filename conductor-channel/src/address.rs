use std::path::{Path, PathBuf};

use crate::error::ChannelError;

/// Overrides the rendezvous directory for both supervisor and workers.
pub const CHANNEL_DIR_ENV: &str = "CONDUCTOR_CHANNEL_DIR";

const CHANNEL_DIR_NAME: &str = "conductor";

/// Directory holding rendezvous sockets when none is given explicitly.
pub fn default_channel_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CHANNEL_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CHANNEL_DIR_NAME)
}

/// `<dir>/<name>.sock`. Pure, no I/O.
pub fn channel_path(dir: &Path, name: &str) -> Result<PathBuf, ChannelError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed != name {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    Ok(dir.join(format!("{name}.sock")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_path_appends_socket_suffix() {
        let path = channel_path(Path::new("/run/conductor"), "4f1c").expect("valid");
        assert_eq!(path, PathBuf::from("/run/conductor/4f1c.sock"));
    }

    #[test]
    fn channel_path_rejects_blank_and_nested_names() {
        for bad in ["", "  ", "a/b", " padded"] {
            assert!(
                matches!(
                    channel_path(Path::new("/run"), bad),
                    Err(ChannelError::InvalidName(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }
}
