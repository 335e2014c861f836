//! Error types for webtop-ssh

use thiserror::Error;

/// SSH transport error
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol or network failure
    #[error("ssh: {0}")]
    Transport(#[from] russh::Error),

    /// The server rejected every configured credential
    #[error("authentication rejected for user {0}")]
    AuthRejected(String),

    /// Private key could not be loaded
    #[error("cannot load private key {path}: {reason}")]
    Key {
        /// Key file
        path: String,
        /// Loader message
        reason: String,
    },

    /// No credential configured
    #[error("no password or private key configured")]
    NoCredentials,

    /// Host key did not match the pinned fingerprint
    #[error("host key fingerprint mismatch")]
    HostKeyMismatch,

    /// SFTP subsystem failure
    #[error("sftp: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for webtop_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Sftp(e) => webtop_core::Error::Channel(e.to_string()),
            other => webtop_core::Error::Connection(other.to_string()),
        }
    }
}
