//! SFTP filesystem sub-channel

use async_trait::async_trait;
use russh::client::Msg;
use russh::Channel;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use tracing::debug;

use webtop_core::session::{
    AttrKind, FileAttrs, FsError, FsResult, RawDirEntry, RemoteFs, RemoteReader, RemoteWriter,
};

use crate::error::Result;

/// [`RemoteFs`] over one long-lived SFTP session
pub struct SftpFs {
    sftp: SftpSession,
}

impl SftpFs {
    /// Start the SFTP protocol on a channel with the subsystem requested
    pub async fn connect(channel: Channel<Msg>) -> Result<Self> {
        let sftp = SftpSession::new(channel.into_stream()).await?;
        debug!("SFTP session negotiated");
        Ok(Self { sftp })
    }
}

fn attrs(meta: &FileAttributes) -> FileAttrs {
    let kind = if meta.is_symlink() {
        AttrKind::Symlink
    } else if meta.is_dir() {
        AttrKind::Directory
    } else {
        AttrKind::File
    };
    FileAttrs {
        size: meta.size.unwrap_or(0),
        mtime: meta.mtime.map_or(0, u64::from),
        kind,
    }
}

fn status_error(code: StatusCode, message: String, path: &str) -> FsError {
    match code {
        StatusCode::NoSuchFile => FsError::NotFound(path.to_string()),
        StatusCode::PermissionDenied => FsError::PermissionDenied(path.to_string()),
        StatusCode::Failure => FsError::Failure(if message.is_empty() {
            format!("failure on {}", path)
        } else {
            message
        }),
        other => FsError::Other(format!("{:?} on {}: {}", other, path, message)),
    }
}

fn fs_error(err: SftpError, path: &str) -> FsError {
    match err {
        SftpError::Status(status) => status_error(status.status_code, status.error_message, path),
        other => FsError::Other(other.to_string()),
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn read_dir(&self, path: &str) -> FsResult<Vec<RawDirEntry>> {
        let entries = self.sftp.read_dir(path).await.map_err(|e| fs_error(e, path))?;
        Ok(entries
            .map(|entry| RawDirEntry {
                attrs: attrs(&entry.metadata()),
                name: entry.file_name(),
            })
            .filter(|entry| entry.name != "." && entry.name != "..")
            .collect())
    }

    async fn stat(&self, path: &str) -> FsResult<FileAttrs> {
        self.sftp
            .metadata(path)
            .await
            .map(|meta| attrs(&meta))
            .map_err(|e| fs_error(e, path))
    }

    async fn lstat(&self, path: &str) -> FsResult<FileAttrs> {
        self.sftp
            .symlink_metadata(path)
            .await
            .map(|meta| attrs(&meta))
            .map_err(|e| fs_error(e, path))
    }

    async fn read_link(&self, path: &str) -> FsResult<String> {
        self.sftp.read_link(path).await.map_err(|e| fs_error(e, path))
    }

    async fn open_read(&self, path: &str) -> FsResult<RemoteReader> {
        let file = self.sftp.open(path).await.map_err(|e| fs_error(e, path))?;
        Ok(Box::pin(file))
    }

    async fn create(&self, path: &str) -> FsResult<RemoteWriter> {
        let file = self.sftp.create(path).await.map_err(|e| fs_error(e, path))?;
        Ok(Box::pin(file))
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.sftp.rename(from, to).await.map_err(|e| fs_error(e, from))
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        self.sftp.remove_file(path).await.map_err(|e| fs_error(e, path))
    }

    async fn remove_dir(&self, path: &str) -> FsResult<()> {
        self.sftp.remove_dir(path).await.map_err(|e| fs_error(e, path))
    }

    async fn mkdir(&self, path: &str) -> FsResult<()> {
        self.sftp.create_dir(path).await.map_err(|e| fs_error(e, path))
    }
}
