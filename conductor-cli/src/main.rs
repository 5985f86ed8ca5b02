//! Conductor: single-host worker supervisor.
//!
//! # Usage
//!
//! ```text
//! conductor run --config <file> [--channel-dir <dir>]
//! conductor validate --config <file> [--json]
//! conductor send <session> <message> [--channel-dir <dir>] [--timeout-ms <ms>]
//! conductor init <file>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{init::InitArgs, run::RunArgs, send::SendArgs, validate::ValidateArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "conductor",
    version,
    about = "Keep a declared fleet of worker processes running",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Supervise the configured workers in the foreground until ctrl-c / SIGTERM.
    Run(RunArgs),

    /// Load a configuration file and print the snapshot it describes.
    Validate(ValidateArgs),

    /// Send one control message to a worker and print its reply.
    Send(SendArgs),

    /// Write a sample configuration file.
    Init(InitArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Validate(args) => args.run(),
        Commands::Send(args) => args.run(),
        Commands::Init(args) => args.run(),
    }
}
