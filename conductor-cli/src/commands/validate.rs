//! `conductor validate`: load a configuration and show what it declares.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use conductor_core::{load_snapshot_at, Command, ConfigurationSnapshot};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// YAML configuration file.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Emit the parsed snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let snapshot = load_snapshot_at(&self.config)
            .with_context(|| format!("invalid configuration '{}'", self.config.display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to serialize snapshot JSON")?
            );
            return Ok(());
        }

        print_table(&self.config, &snapshot);
        Ok(())
    }
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "id")]
    id: u32,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "command")]
    command: String,
    #[tabled(rename = "executable")]
    executable: String,
    #[tabled(rename = "working dir")]
    working_directory: String,
    #[tabled(rename = "auto restart")]
    auto_restart: bool,
}

fn print_table(config: &std::path::Path, snapshot: &ConfigurationSnapshot) {
    let controller = &snapshot.controller;
    println!(
        "{} {} | {} instances",
        "✓".green().bold(),
        config.display(),
        snapshot.instances.len(),
    );
    println!(
        "  watch file: {} | monitor: {} | stop timeout: {} ms | debounce: {} ms",
        on_off(controller.watch_file),
        if controller.monitor_process {
            format!("every {}s", controller.monitor_interval_seconds)
        } else {
            "off".to_string()
        },
        controller.stop_timeout_ms,
        controller.debounce_ms,
    );

    if snapshot.instances.is_empty() {
        println!("No instances declared.");
        return;
    }

    let rows: Vec<InstanceRow> = snapshot
        .instances
        .iter()
        .map(|spec| InstanceRow {
            id: spec.instance_id.0,
            name: spec.name.clone(),
            command: command_label(spec.command),
            executable: spec.executable_path().display().to_string(),
            working_directory: spec.effective_working_directory().display().to_string(),
            auto_restart: spec.auto_restart,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn command_label(command: Command) -> String {
    match command {
        Command::Start => command.as_str().green().to_string(),
        Command::Stop => command.as_str().red().to_string(),
        Command::Reconfigure => command.as_str().yellow().to_string(),
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
