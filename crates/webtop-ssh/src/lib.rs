//! WebTop SSH - russh transport
//!
//! Implements the `webtop-core` session traits over SSH:
//! - Client: connector, authentication and the shared session handle
//! - Shell: PTY channel actor
//! - Sftp: filesystem sub-channel

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod sftp;
pub mod shell;

pub use client::{SshConnector, SshSession};
pub use config::SshConfig;
pub use error::{Error, Result};
pub use sftp::SftpFs;
