//! CLI module for WebTop
//!
//! Provides commands:
//! - `serve`: Start the gateway (default)
//! - `check`: Validate configuration and probe the SSH host once

use clap::{Parser, Subcommand};

pub mod check;

/// WebTop SSH web gateway CLI
#[derive(Parser, Debug)]
#[command(name = "webtop")]
#[command(about = "Browser gateway to a single SSH host")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the server (default)
    Serve,
    /// Validate configuration and test the SSH connection
    Check,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Check) => check::run().await,
        Some(Commands::Serve) | None => crate::server::run().await,
    }
}
