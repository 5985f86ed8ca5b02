//! `conductor init <file>`: scaffold a configuration.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use conductor_core::{
    save_snapshot_at, Command, ConfigurationSnapshot, ControllerSettings, InstanceId,
    ProcessInstanceSpec,
};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Where to write the configuration. Existing files are left alone.
    pub path: PathBuf,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        if self.path.exists() {
            bail!(
                "refusing to overwrite existing file '{}'",
                self.path.display()
            );
        }

        save_snapshot_at(&self.path, &sample_snapshot())
            .with_context(|| format!("failed to write '{}'", self.path.display()))?;

        println!("✓ Wrote sample configuration to {}", self.path.display());
        println!(
            "  Check it with: conductor validate --config {}",
            self.path.display()
        );
        Ok(())
    }
}

fn sample_snapshot() -> ConfigurationSnapshot {
    ConfigurationSnapshot {
        controller: ControllerSettings {
            watch_file: true,
            monitor_process: true,
            ..ControllerSettings::default()
        },
        instances: vec![ProcessInstanceSpec {
            instance_id: InstanceId(1),
            name: "echo".to_string(),
            command: Command::Start,
            executable: PathBuf::from("conductor-echo-worker"),
            args: vec!["--interval-ms".to_string(), "5000".to_string()],
            working_directory: None,
            auto_restart: true,
            log_config: None,
        }],
    }
}
