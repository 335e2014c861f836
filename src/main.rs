//! WebTop - browser gateway to a single SSH host
//!
//! CLI entry point for the WebTop server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod middleware;
mod server;
mod websocket;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "webtop=info,webtop_core=info,webtop_ssh=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = cli::Cli::parse();
    info!("Starting WebTop v{}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
