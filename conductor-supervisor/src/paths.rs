use std::path::PathBuf;
use std::time::Duration;

use conductor_channel::default_channel_dir;

/// Depth of the trigger→processor refresh queue.
pub const REFRESH_QUEUE_DEPTH: usize = 64;

/// Grace period for a killed child to be reaped before `close` gives up waiting.
pub const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Rendezvous directory handed to workers through `--channel-dir`.
pub fn resolve_channel_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(default_channel_dir)
}
