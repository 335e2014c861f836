//! WebTop Core - Gateway Engine
//!
//! This crate holds everything the gateway does with the remote host,
//! independent of the SSH wire and of HTTP:
//! - Session: traits describing one authenticated remote connection
//! - Supervisor: the single shared, reconnecting session
//! - Executor: one-shot remote commands
//! - Shell: per-client PTY bridge state
//! - Telemetry: periodic host sampling
//! - Files: remote file management
//! - Archive: remote zip jobs with guaranteed cleanup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod error;
pub mod executor;
pub mod files;
pub mod format;
pub mod path;
pub mod session;
pub mod shell;
pub mod supervisor;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use archive::{Archive, ArchiveBuilder, ArchiveConfig, ArchivePlan, ArchiveStream};
pub use error::{Error, Result};
pub use executor::{execute, execute_batch};
pub use files::{DeleteKind, DirectoryListing, Download, EntryKind, FileEntry, FileGateway};
pub use session::{
    ExecOutput, FsError, PtySize, RemoteFs, RemoteSession, SessionConnector, ShellHandle,
    ShellInput,
};
pub use shell::{BridgeState, ClientFrame, ClientSession, ControlMessage};
pub use supervisor::{ConnectionState, ConnectionSupervisor, SupervisorConfig};
pub use telemetry::{StatsPayload, TelemetrySample, TelemetrySampler};
