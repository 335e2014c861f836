//! SSH connection settings

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Target host and credentials
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// OpenSSH private key; a leading `~` is expanded
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub passphrase: Option<SecretString>,
    /// Pinned SHA-256 host key fingerprint; any key is accepted when unset
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// TERM for interactive shells
    #[serde(default = "default_term")]
    pub term: String,
}

fn default_port() -> u16 {
    22
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_keepalive() -> u64 {
    30
}
fn default_term() -> String {
    "xterm-256color".to_string()
}

impl SshConfig {
    /// Minimal config for `user@host:22`
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password: None,
            private_key_path: None,
            passphrase: None,
            host_key_fingerprint: None,
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            keepalive_secs: default_keepalive(),
            term: default_term(),
        }
    }

    /// `user@host:port`, for logs
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// Connection attempt timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Delay between reconnect attempts
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Whether a non-empty password is set
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password
            .as_ref()
            .is_some_and(|p| !p.expose_secret().is_empty())
    }

    /// Private key path with `~` expanded
    #[must_use]
    pub fn key_path(&self) -> Option<PathBuf> {
        self.private_key_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_tilde)
    }

    /// Whether any credential is configured
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.has_password() || self.key_path().is_some()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_document() {
        let config: SshConfig =
            serde_json::from_str(r#"{"host":"10.0.0.2","username":"admin","password":"pw"}"#)
                .unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.term, "xterm-256color");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.target(), "admin@10.0.0.2:22");
        assert!(config.has_credentials());
    }

    #[test]
    fn test_credentials() {
        let mut config = SshConfig::new("h", "u");
        assert!(!config.has_credentials());

        config.password = Some(SecretString::from(String::new()));
        assert!(!config.has_credentials());

        config.private_key_path = Some("/keys/id_ed25519".to_string());
        assert!(config.has_credentials());
        assert_eq!(config.key_path(), Some(PathBuf::from("/keys/id_ed25519")));
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/.ssh/id_rsa"), home.join(".ssh/id_rsa"));
        }
        assert_eq!(expand_tilde("/etc/key"), PathBuf::from("/etc/key"));
    }
}
