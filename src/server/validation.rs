//! Configuration validation
//!
//! Hard errors for settings the gateway cannot run with, plus security
//! warnings for production deployments.

use super::config::AppConfig;
use anyhow::{bail, Result};
use secrecy::ExposeSecret;
use tracing::warn;

/// Reject configurations the gateway cannot start with
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.ssh.host.trim().is_empty() {
        bail!("ssh.host must not be empty");
    }
    if config.ssh.username.trim().is_empty() {
        bail!("ssh.username must not be empty");
    }
    if !config.ssh.has_credentials() {
        bail!("ssh.password or ssh.private_key_path must be set");
    }

    let auth = &config.server.auth;
    let has_auth_password = auth
        .password
        .as_ref()
        .is_some_and(|p| !p.expose_secret().is_empty());
    if auth.enabled && (auth.username.is_empty() || !has_auth_password) {
        bail!("server.auth is enabled but username or password is empty");
    }

    if config.telemetry.interval_secs == 0 {
        bail!("telemetry.interval_secs must be greater than zero");
    }

    Ok(())
}

/// Validate configuration for production security
pub fn validate_production_config(config: &AppConfig) -> Result<()> {
    let is_production = std::env::var("WEBTOP_ENV")
        .map(|v| v.to_lowercase() == "production")
        .unwrap_or(false);

    if !is_production {
        return Ok(());
    }

    if config.server.host == "0.0.0.0" {
        warn!(
            "SECURITY WARNING: Server is binding to all interfaces (0.0.0.0) in production. \
             Consider binding to 127.0.0.1 and using a reverse proxy."
        );
    }

    if !config.server.auth.enabled && config.server.host != "127.0.0.1" {
        warn!(
            "SECURITY WARNING: Authentication is DISABLED while server is exposed externally. \
             Enable [server.auth] enabled = true in production!"
        );
    }

    if config.ssh.host_key_fingerprint.is_none() {
        warn!(
            "SECURITY WARNING: No ssh.host_key_fingerprint pinned. \
             Any host key presented by {} will be accepted.",
            config.ssh.host
        );
    }

    Ok(())
}
