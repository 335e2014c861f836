//! `webtop check`: configuration and connectivity probe

use anyhow::{Context, Result};
use webtop_core::session::RemoteSession;
use webtop_ssh::SshConnector;

use crate::server::{load_config, validate_config};

pub async fn run() -> Result<()> {
    println!("WebTop check\n");

    print!("Loading configuration... ");
    let config = load_config()?;
    validate_config(&config)?;
    println!("ok");

    let target = config.ssh.target();
    print!("Connecting to {}... ", target);
    let connector = SshConnector::new(config.ssh.clone());
    let session = tokio::time::timeout(config.ssh.connect_timeout(), connector.open())
        .await
        .with_context(|| format!("Timed out connecting to {}", target))?
        .with_context(|| format!("Failed to connect to {}", target))?;
    println!("ok");

    print!("Running `uname -a`... ");
    let result = webtop_core::execute(&session, "uname -a").await;
    session.disconnect().await;
    let uname = result.context("Remote command failed")?;
    println!("ok\n  {}", uname);

    println!("\nAll checks passed.");
    Ok(())
}
