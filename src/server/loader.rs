//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    build_config(Environment::with_prefix("WEBTOP"))
}

fn build_config(environment: Environment) -> Result<AppConfig> {
    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("WEBTOP_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority)
        // prefix_separator("_") keeps WEBTOP_SSH__HOST working; config-rs 0.14
        // otherwise reuses "__" after the prefix.
        .add_source(
            environment
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("WEBTOP").source(Some(source))
    }

    #[test]
    fn test_embedded_defaults() {
        let config = build_config(env(&[])).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.telemetry.interval_secs, 2);
        assert_eq!(config.archive.command, "zip -r -q");
        assert_eq!(config.archive.temp_dir, "/tmp");
    }

    #[test]
    fn test_environment_overrides() {
        let config = build_config(env(&[
            ("WEBTOP_SSH__HOST", "10.1.2.3"),
            ("WEBTOP_SSH__PORT", "2222"),
            ("WEBTOP_SSH__PASSWORD", "hunter2"),
            ("WEBTOP_TELEMETRY__INTERVAL_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.ssh.host, "10.1.2.3");
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(
            config.ssh.password.as_ref().map(|p| p.expose_secret().to_string()),
            Some("hunter2".to_string())
        );
        assert_eq!(config.telemetry.interval_secs, 5);
    }
}
