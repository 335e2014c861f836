//! Server configuration types

use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use webtop_core::archive::{ArchiveConfig, DEFAULT_ARCHIVE_COMMAND, DEFAULT_TEMP_DIR};
use webtop_ssh::SshConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ssh: SshConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub archive: ArchiveSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Front-end assets, served when the directory exists
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Local staging directory for multipart uploads
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join("webtop-uploads")
}

/// HTTP Basic authentication
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            username: String::new(),
            password: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Telemetry push settings
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    2
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Remote archive settings
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveSettings {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    #[serde(default = "default_archive_command")]
    pub command: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            command: default_archive_command(),
        }
    }
}

fn default_temp_dir() -> String {
    DEFAULT_TEMP_DIR.to_string()
}

fn default_archive_command() -> String {
    DEFAULT_ARCHIVE_COMMAND.to_string()
}

impl From<&ArchiveSettings> for ArchiveConfig {
    fn from(settings: &ArchiveSettings) -> Self {
        ArchiveConfig {
            temp_dir: settings.temp_dir.clone(),
            command: settings.command.clone(),
        }
    }
}
