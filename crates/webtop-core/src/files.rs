//! File Gateway
//!
//! Remote file management over the filesystem sub-channel of the shared
//! session. Every entry point normalizes its paths first and returns the
//! normalized path to the caller.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::path;
use crate::session::{AttrKind, FileAttrs, FsError, RemoteFs, RemoteReader};
use crate::supervisor::ConnectionSupervisor;

/// Classification of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symlink resolving to a file
    SymlinkFile,
    /// Symlink resolving to a directory
    SymlinkDirectory,
    /// Symlink whose target cannot be resolved
    BrokenSymlink,
}

impl EntryKind {
    /// Listing group: directories first, then files, then broken links
    fn rank(self) -> u8 {
        match self {
            Self::Directory | Self::SymlinkDirectory => 0,
            Self::File | Self::SymlinkFile => 1,
            Self::BrokenSymlink => 2,
        }
    }

    /// Whether the entry can be entered like a directory
    #[must_use]
    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory | Self::SymlinkDirectory)
    }
}

/// One listed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Entry name
    pub name: String,
    /// Classification
    pub kind: EntryKind,
    /// Size in bytes
    pub size: u64,
    /// Modification time, milliseconds since the epoch
    pub modified: u64,
    /// Symlink target, when the entry is a link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// A listed directory
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    /// Normalized directory path
    pub path: String,
    /// Sorted entries
    pub files: Vec<FileEntry>,
}

/// Declared kind of a path to delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteKind {
    /// Remove with the file primitive
    File,
    /// Remove with the directory primitive
    Directory,
}

impl std::str::FromStr for DeleteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "dir" | "directory" => Ok(Self::Directory),
            other => Err(Error::InvalidInput(format!("unknown kind: {}", other))),
        }
    }
}

/// An open single-file download
pub struct Download {
    /// Normalized remote path
    pub path: String,
    /// Attachment file name
    pub filename: String,
    /// Declared length
    pub size: u64,
    /// File bytes
    pub reader: RemoteReader,
}

/// File operations on the shared session
#[derive(Clone)]
pub struct FileGateway {
    supervisor: Arc<ConnectionSupervisor>,
}

impl FileGateway {
    /// Gateway resolving the filesystem through `supervisor` on every call
    #[must_use]
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self { supervisor }
    }

    fn fs(&self) -> Result<Arc<dyn RemoteFs>> {
        self.supervisor.require_filesystem()
    }

    /// List a directory (`/` when no path is given)
    pub async fn list(&self, dir: Option<&str>) -> Result<DirectoryListing> {
        let fs = self.fs()?;
        let dir = path::normalize(dir.unwrap_or("/"));
        let raw = fs
            .read_dir(&dir)
            .await
            .map_err(|e| fs_error(e, &dir))?;

        let mut files = Vec::with_capacity(raw.len());
        for entry in raw {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let full = path::join(&dir, &entry.name);
            files.push(classify(fs.as_ref(), &full, entry.name, entry.attrs).await);
        }
        files.sort_by(|a, b| {
            a.kind
                .rank()
                .cmp(&b.kind.rank())
                .then_with(|| a.name.cmp(&b.name))
        });

        debug!(path = %dir, entries = files.len(), "Listed directory");
        Ok(DirectoryListing { path: dir, files })
    }

    /// Read a whole file as text (invalid UTF-8 is replaced)
    pub async fn read_content(&self, file: &str) -> Result<(String, String)> {
        let fs = self.fs()?;
        let file = path::normalize(file);
        let attrs = fs.stat(&file).await.map_err(|e| fs_error(e, &file))?;
        if attrs.kind == AttrKind::Directory {
            return Err(Error::NotFound(file));
        }

        let mut reader = fs.open_read(&file).await.map_err(|e| fs_error(e, &file))?;
        let mut buf = Vec::with_capacity(attrs.size.min(1 << 20) as usize);
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::StreamFailure(e.to_string()))?;
        Ok((file, String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Create or truncate a file with `content`
    pub async fn write(&self, file: &str, content: &[u8]) -> Result<String> {
        let fs = self.fs()?;
        let file = path::normalize(file);
        let mut writer = fs.create(&file).await.map_err(|e| fs_error(e, &file))?;
        writer
            .write_all(content)
            .await
            .map_err(|e| Error::StreamFailure(e.to_string()))?;
        writer
            .shutdown()
            .await
            .map_err(|e| Error::StreamFailure(e.to_string()))?;
        info!(path = %file, bytes = content.len(), "File written");
        Ok(file)
    }

    /// Rename or move; returns the normalized new path
    pub async fn rename(&self, from: &str, to: &str) -> Result<String> {
        let fs = self.fs()?;
        let from = path::normalize(from);
        let to = path::normalize(to);
        if from == "/" || to == "/" {
            return Err(Error::InvalidOperation("cannot rename the root directory".to_string()));
        }
        fs.rename(&from, &to).await.map_err(|e| fs_error(e, &from))?;
        info!(from = %from, to = %to, "Renamed");
        Ok(to)
    }

    /// Remove a file or an empty directory
    pub async fn delete(&self, target: &str, kind: DeleteKind) -> Result<String> {
        let fs = self.fs()?;
        let target = path::normalize(target);
        if target == "/" {
            return Err(Error::InvalidOperation("cannot delete the root directory".to_string()));
        }
        match kind {
            DeleteKind::Directory => fs.remove_dir(&target).await.map_err(|e| match e {
                // Servers answer a non-empty rmdir with the generic failure status
                FsError::Failure(_) => Error::DirectoryNotEmpty(target.clone()),
                other => fs_error(other, &target),
            })?,
            DeleteKind::File => fs
                .remove_file(&target)
                .await
                .map_err(|e| fs_error(e, &target))?,
        }
        info!(path = %target, ?kind, "Deleted");
        Ok(target)
    }

    /// Create a directory
    pub async fn mkdir(&self, dir: &str) -> Result<String> {
        let fs = self.fs()?;
        let dir = path::normalize(dir);
        fs.mkdir(&dir).await.map_err(|e| fs_error(e, &dir))?;
        info!(path = %dir, "Directory created");
        Ok(dir)
    }

    /// Create a file with optional initial content
    pub async fn touch(&self, file: &str, content: Option<&str>) -> Result<String> {
        self.write(file, content.unwrap_or_default().as_bytes()).await
    }

    /// Open a single file for download; directories are rejected
    pub async fn download(&self, file: &str) -> Result<Download> {
        let fs = self.fs()?;
        let file = path::normalize(file);
        let attrs = fs
            .stat(&file)
            .await
            .map_err(|_| Error::NotFound(file.clone()))?;
        if attrs.kind == AttrKind::Directory {
            return Err(Error::InvalidOperation(format!(
                "cannot download a directory: {}",
                file
            )));
        }
        let reader = fs.open_read(&file).await.map_err(|e| fs_error(e, &file))?;
        Ok(Download {
            filename: path::basename(&file),
            path: file,
            size: attrs.size,
            reader,
        })
    }

    /// Store a local temporary file under `dest_dir`.
    ///
    /// Any directory prefix in `filename` is dropped. The local file is
    /// removed afterwards whatever the outcome.
    pub async fn upload(&self, dest_dir: &str, filename: &str, local: &Path) -> Result<String> {
        let result = self.upload_inner(dest_dir, filename, local).await;
        if let Err(e) = tokio::fs::remove_file(local).await {
            warn!(local = %local.display(), error = %e, "Failed to remove upload temp file");
        }
        result
    }

    async fn upload_inner(&self, dest_dir: &str, filename: &str, local: &Path) -> Result<String> {
        let name = path::sanitize_filename(filename)
            .ok_or_else(|| Error::InvalidInput(format!("invalid file name: {:?}", filename)))?;
        let fs = self.fs()?;
        let remote = path::join(&path::normalize(dest_dir), &name);

        let mut source = tokio::fs::File::open(local).await?;
        let mut writer = fs.create(&remote).await.map_err(|e| fs_error(e, &remote))?;
        let copied = tokio::io::copy(&mut source, &mut writer)
            .await
            .map_err(|e| Error::StreamFailure(e.to_string()))?;
        writer
            .shutdown()
            .await
            .map_err(|e| Error::StreamFailure(e.to_string()))?;

        info!(path = %remote, bytes = copied, "File uploaded");
        Ok(remote)
    }
}

async fn classify(
    fs: &dyn RemoteFs,
    full: &str,
    name: String,
    attrs: FileAttrs,
) -> FileEntry {
    let entry = |kind, size, mtime: u64, target| FileEntry {
        name: name.clone(),
        kind,
        size,
        modified: mtime.saturating_mul(1000),
        target,
    };

    match attrs.kind {
        AttrKind::Directory => entry(EntryKind::Directory, attrs.size, attrs.mtime, None),
        AttrKind::File => entry(EntryKind::File, attrs.size, attrs.mtime, None),
        AttrKind::Symlink => {
            let target = fs.read_link(full).await.ok();
            match fs.stat(full).await {
                Ok(resolved) if resolved.kind == AttrKind::Directory => entry(
                    EntryKind::SymlinkDirectory,
                    resolved.size,
                    resolved.mtime,
                    target,
                ),
                Ok(resolved) => entry(
                    EntryKind::SymlinkFile,
                    resolved.size,
                    resolved.mtime,
                    target,
                ),
                Err(e) => {
                    debug!(path = %full, error = %e, "Broken symlink");
                    entry(EntryKind::BrokenSymlink, attrs.size, attrs.mtime, target)
                }
            }
        }
    }
}

/// Map a filesystem failure on `path` into the gateway taxonomy
pub(crate) fn fs_error(err: FsError, path: &str) -> Error {
    match err {
        FsError::NotFound(_) => Error::NotFound(path.to_string()),
        FsError::PermissionDenied(_) => Error::Remote(format!("permission denied: {}", path)),
        FsError::Failure(msg) => Error::Remote(msg),
        FsError::Other(msg) => Error::Channel(msg),
    }
}
