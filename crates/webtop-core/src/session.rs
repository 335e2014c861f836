//! Remote session seam
//!
//! The traits in this module are everything the gateway needs from an
//! authenticated remote connection. `webtop-ssh` implements them on top of
//! SSH; tests implement them with in-memory fakes.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::Result;

/// Boxed remote file reader
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed remote file writer
pub type RemoteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Terminal geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Columns
    pub cols: u32,
    /// Rows
    pub rows: u32,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Collected output of a one-shot remote command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Bytes written to stdout
    pub stdout: Vec<u8>,
    /// Bytes written to stderr
    pub stderr: Vec<u8>,
    /// Exit status, if the server reported one
    pub exit_status: Option<u32>,
}

/// Input sent towards an interactive shell channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    /// Raw keyboard bytes
    Data(Bytes),
    /// Terminal geometry change
    Resize(PtySize),
}

/// Handle on one interactive PTY channel.
///
/// Dropping `input` terminates the remote channel. `output` yields the
/// remote byte chunks in emission order and ends when the channel closes.
#[derive(Debug)]
pub struct ShellHandle {
    /// Towards the remote shell
    pub input: mpsc::Sender<ShellInput>,
    /// From the remote shell
    pub output: mpsc::Receiver<Bytes>,
}

/// One authenticated connection to the administered host.
///
/// Every method opens an independent logical channel, so concurrent calls
/// do not interfere with each other.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command on a fresh channel and wait for it to exit
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Open an interactive pseudo-terminal running the login shell
    async fn open_shell(&self, size: PtySize) -> Result<ShellHandle>;

    /// Open the long-lived filesystem sub-channel
    async fn open_filesystem(&self) -> Result<Arc<dyn RemoteFs>>;

    /// Whether the transport has ended
    fn is_closed(&self) -> bool;

    /// Resolve once the transport has ended
    async fn closed(&self);

    /// Close the transport
    async fn disconnect(&self);
}

/// Establishes [`RemoteSession`]s
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Human-readable target, used in logs
    fn target(&self) -> String;

    /// Perform one connection + authentication attempt
    async fn connect(&self) -> Result<Arc<dyn RemoteSession>>;
}

/// Attributes reported by the remote filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: u64,
    /// Kind of the inode itself
    pub kind: AttrKind,
}

/// Inode kind as seen by `lstat`/`stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttrKind {
    /// Regular file (or anything that is not a dir or link)
    #[default]
    File,
    /// Directory
    Directory,
    /// Symbolic link (only from `lstat`)
    Symlink,
}

/// One raw directory entry (attributes from `lstat`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirEntry {
    /// File name without directory
    pub name: String,
    /// Link-level attributes
    pub attrs: FileAttrs,
}

/// Remote filesystem failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    /// No such file
    #[error("no such file: {0}")]
    NotFound(String),
    /// Permission denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Generic server-side failure status
    #[error("operation failed: {0}")]
    Failure(String),
    /// Transport or protocol error
    #[error("{0}")]
    Other(String),
}

/// Result type for [`RemoteFs`]
pub type FsResult<T> = std::result::Result<T, FsError>;

/// The filesystem sub-channel of a session
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// List a directory, without `.` and `..`
    async fn read_dir(&self, path: &str) -> FsResult<Vec<RawDirEntry>>;

    /// Attributes, following symlinks
    async fn stat(&self, path: &str) -> FsResult<FileAttrs>;

    /// Attributes of the link itself
    async fn lstat(&self, path: &str) -> FsResult<FileAttrs>;

    /// Target of a symlink
    async fn read_link(&self, path: &str) -> FsResult<String>;

    /// Open a file for reading
    async fn open_read(&self, path: &str) -> FsResult<RemoteReader>;

    /// Create or truncate a file for writing
    async fn create(&self, path: &str) -> FsResult<RemoteWriter>;

    /// Rename or move
    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    /// Remove a file
    async fn remove_file(&self, path: &str) -> FsResult<()>;

    /// Remove an empty directory
    async fn remove_dir(&self, path: &str) -> FsResult<()>;

    /// Create a directory
    async fn mkdir(&self, path: &str) -> FsResult<()>;
}
