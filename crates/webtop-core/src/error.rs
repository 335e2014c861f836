//! Error types for webtop-core
//!
//! One taxonomy shared by every component. The HTTP layer maps each variant
//! to a status class, the terminal bridge renders it as an inline notice.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The shared remote session is not ready (connecting or disconnected)
    #[error("remote session unavailable")]
    SessionUnavailable,

    /// Connection attempt to the remote host failed
    #[error("connection error: {0}")]
    Connection(String),

    /// A channel could not be opened or driven on the session
    #[error("channel error: {0}")]
    Channel(String),

    /// Remote command exited with a non-zero status
    #[error("command failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        /// Remote exit code (-1 when the server reported none)
        exit_code: i64,
        /// Captured stderr, or "no output"
        stderr: String,
    },

    /// Remote path does not exist (or is not the expected kind)
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid for the target (e.g. downloading a directory)
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Malformed or missing caller input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Directory removal refused because the directory has entries
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Archive request resolved to no usable paths
    #[error("no valid paths to archive")]
    NoValidPaths,

    /// I/O failure in the middle of a transfer
    #[error("stream failure: {0}")]
    StreamFailure(String),

    /// Any other remote filesystem failure
    #[error("remote error: {0}")]
    Remote(String),

    /// Local I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code for API payloads
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::SessionUnavailable => "SESSION_UNAVAILABLE",
            Error::Connection(_) => "CONNECTION_FAILED",
            Error::Channel(_) => "CHANNEL_FAILED",
            Error::CommandFailed { .. } => "COMMAND_FAILED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidOperation(_) => "INVALID_OPERATION",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::DirectoryNotEmpty(_) => "DIRECTORY_NOT_EMPTY",
            Error::NoValidPaths => "NO_VALID_PATHS",
            Error::StreamFailure(_) => "STREAM_FAILURE",
            Error::Remote(_) => "REMOTE_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the caller can fix the request and retry
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidOperation(_)
                | Error::InvalidInput(_)
                | Error::DirectoryNotEmpty(_)
                | Error::NoValidPaths
        )
    }

    /// Whether the failure comes from the upstream session being unusable
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::SessionUnavailable | Error::Connection(_) | Error::Channel(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
