//! `conductor send <session> <message>`: one synchronous control exchange.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use conductor_core::SessionToken;
use conductor_supervisor::{paths::resolve_channel_dir, send_command, SupervisorError};

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Session token the worker was launched with (`--pipe-name`).
    pub session: String,

    /// Message to send, e.g. STOP or RECONFIGURE.
    pub message: String,

    /// Directory holding worker control sockets.
    #[arg(long)]
    pub channel_dir: Option<PathBuf>,

    /// Give up after this many milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub timeout_ms: u64,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let channel_dir = resolve_channel_dir(self.channel_dir);
        let session = SessionToken::from(self.session);
        match send_command(
            &channel_dir,
            &session,
            &self.message,
            Duration::from_millis(self.timeout_ms),
        ) {
            Ok(Some(response)) => println!("{response}"),
            Ok(None) => println!("no response"),
            Err(SupervisorError::WorkerNotListening { socket }) => {
                println!("no worker listening at {}", socket.display());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to reach session {session}"))
            }
        }
        Ok(())
    }
}
