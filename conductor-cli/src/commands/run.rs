//! `conductor run`: console host for the supervisor.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use conductor_supervisor::{paths::resolve_channel_dir, start_blocking};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML configuration file.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Directory for worker control sockets. Defaults to
    /// $CONDUCTOR_CHANNEL_DIR, then $XDG_RUNTIME_DIR/conductor.
    #[arg(long)]
    pub channel_dir: Option<PathBuf>,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let channel_dir = resolve_channel_dir(self.channel_dir);
        start_blocking(&self.config, &channel_dir).with_context(|| {
            format!(
                "supervisor exited with error (config: {})",
                self.config.display()
            )
        })
    }
}
