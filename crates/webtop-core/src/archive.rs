//! Archive Builder
//!
//! Packs one or more remote paths into a zip archive on the remote host
//! and streams that single file back. The files themselves never cross
//! the gateway.
//!
//! The temporary archive is removed exactly once per job, whichever way
//! the job ends: end of stream, stream error, the consumer dropping the
//! stream early, or any failure while building. A caller that goes away
//! while the remote tool is still running does not remove the file until
//! the tool has exited.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::executor::execute;
use crate::path::{self, shell_quote};
use crate::session::{AttrKind, RemoteFs, RemoteReader, RemoteSession};
use crate::supervisor::ConnectionSupervisor;

/// Default remote archiving command, followed by target then sources
pub const DEFAULT_ARCHIVE_COMMAND: &str = "zip -r -q";

/// Default remote directory for temporary archives
pub const DEFAULT_TEMP_DIR: &str = "/tmp";

/// Archive job settings
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Remote temp directory
    pub temp_dir: String,
    /// Archive tool invocation
    pub command: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            temp_dir: DEFAULT_TEMP_DIR.to_string(),
            command: DEFAULT_ARCHIVE_COMMAND.to_string(),
        }
    }
}

/// What to archive and how to name it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    /// Deepest directory containing every input
    pub ancestor: String,
    /// Inputs relative to the ancestor (`.` for the ancestor itself)
    pub relative: Vec<String>,
    /// Attachment file name
    pub filename: String,
}

/// Walk `seed` upward until it is an ancestor of every path
#[must_use]
pub fn narrow_ancestor(seed: &str, paths: &[String]) -> String {
    let mut ancestor = path::normalize(seed);
    for p in paths {
        while ancestor != "/" && !path::is_ancestor(&ancestor, p) {
            ancestor = path::parent(&ancestor);
        }
    }
    ancestor
}

/// Download name: `<basename>.zip` for one input, timestamped otherwise
#[must_use]
pub fn archive_filename(paths: &[String], now: DateTime<Utc>) -> String {
    match paths {
        [single] => {
            let base = path::basename(single);
            if base.is_empty() {
                "root.zip".to_string()
            } else {
                format!("{}.zip", base)
            }
        }
        _ => format!("webtop_archive_{}.zip", now.format("%Y%m%d_%H%M%S")),
    }
}

/// Resolve the ancestor and relative paths for a set of inputs.
///
/// The seed is the first path itself when it is a directory, otherwise
/// its parent (also on stat failure).
pub async fn plan_archive(
    fs: &dyn RemoteFs,
    inputs: &[String],
    now: DateTime<Utc>,
) -> Result<ArchivePlan> {
    let paths: Vec<String> = inputs
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(path::normalize)
        .collect();
    let first = paths.first().ok_or(Error::NoValidPaths)?;

    let seed = match fs.stat(first).await {
        Ok(attrs) if attrs.kind == AttrKind::Directory => first.clone(),
        Ok(_) => path::parent(first),
        Err(e) => {
            debug!(path = %first, error = %e, "Stat failed, seeding ancestor with parent");
            path::parent(first)
        }
    };
    let ancestor = narrow_ancestor(&seed, &paths);

    let relative: Vec<String> = paths
        .iter()
        .filter_map(|p| path::relative_to(&ancestor, p))
        .collect();
    if relative.is_empty() {
        return Err(Error::NoValidPaths);
    }

    Ok(ArchivePlan {
        filename: archive_filename(&paths, now),
        ancestor,
        relative,
    })
}

/// Removes the temporary archive once
struct CleanupGuard {
    session: Arc<dyn RemoteSession>,
    temp_path: String,
    fired: AtomicBool,
}

impl CleanupGuard {
    fn new(session: Arc<dyn RemoteSession>, temp_path: String) -> Self {
        Self {
            session,
            temp_path,
            fired: AtomicBool::new(false),
        }
    }

    fn fire(&self, reason: &'static str) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = self.session.clone();
        let temp_path = self.temp_path.clone();
        let command = format!("rm -f {}", shell_quote(&temp_path));
        debug!(path = %temp_path, reason, "Removing temporary archive");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = execute(session.as_ref(), &command).await {
                        warn!(path = %temp_path, error = %e, "Failed to remove temporary archive");
                    }
                });
            }
            Err(_) => warn!(path = %temp_path, "No runtime to remove temporary archive"),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.fire("dropped");
    }
}

/// Archive bytes; removes the remote temp file when finished or dropped
pub struct ArchiveStream {
    inner: ReaderStream<RemoteReader>,
    guard: CleanupGuard,
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(None) => self.guard.fire("completed"),
            Poll::Ready(Some(Err(e))) => {
                warn!(path = %self.guard.temp_path, error = %e, "Archive stream failed");
                self.guard.fire("stream error");
            }
            _ => {}
        }
        polled
    }
}

/// A built archive ready to stream
pub struct Archive {
    /// Attachment file name
    pub filename: String,
    /// Archive size in bytes
    pub size: u64,
    /// Archive bytes
    pub stream: ArchiveStream,
}

/// Builds archives through the shared session
#[derive(Clone)]
pub struct ArchiveBuilder {
    supervisor: Arc<ConnectionSupervisor>,
    config: ArchiveConfig,
}

impl ArchiveBuilder {
    /// Builder using `config` for the remote tool and temp location
    #[must_use]
    pub fn new(supervisor: Arc<ConnectionSupervisor>, config: ArchiveConfig) -> Self {
        Self { supervisor, config }
    }

    fn temp_path(&self) -> String {
        let dir = path::normalize(&self.config.temp_dir);
        path::join(
            &dir,
            &format!(
                "webtop-download-{}-{}.zip",
                Utc::now().timestamp_millis(),
                Uuid::new_v4().simple()
            ),
        )
    }

    /// Archive `paths` remotely and open the result for streaming
    pub async fn build(&self, paths: &[String]) -> Result<Archive> {
        let session = self.supervisor.require_session()?;
        let fs = self.supervisor.require_filesystem()?;
        let plan = plan_archive(fs.as_ref(), paths, Utc::now()).await?;

        let temp_path = self.temp_path();
        let guard = CleanupGuard::new(session.clone(), temp_path.clone());

        let sources: Vec<String> = plan.relative.iter().map(|p| shell_quote(p)).collect();
        let command = format!(
            "cd {} && {} {} {}",
            shell_quote(&plan.ancestor),
            self.config.command,
            shell_quote(&temp_path),
            sources.join(" ")
        );
        info!(
            ancestor = %plan.ancestor,
            entries = plan.relative.len(),
            temp = %temp_path,
            "Building archive"
        );
        // The remote tool keeps running if this future is dropped, so the
        // guard rides along with the exec and fires only once it returns
        let (done_tx, done_rx) = oneshot::channel();
        let exec_session = session.clone();
        tokio::spawn(async move {
            let result = execute(exec_session.as_ref(), &command).await;
            if let Err((_, guard)) = done_tx.send((result, guard)) {
                guard.fire("abandoned");
            }
        });
        let (result, guard) = done_rx
            .await
            .map_err(|_| Error::Remote("archive task ended unexpectedly".to_string()))?;
        // Any early return from here drops the guard, which removes the temp file
        result?;

        let attrs = fs
            .stat(&temp_path)
            .await
            .map_err(|e| Error::Remote(format!("cannot stat archive: {}", e)))?;
        let reader = fs
            .open_read(&temp_path)
            .await
            .map_err(|e| Error::Remote(format!("cannot open archive: {}", e)))?;

        Ok(Archive {
            filename: plan.filename,
            size: attrs.size,
            stream: ArchiveStream {
                inner: ReaderStream::new(reader),
                guard,
            },
        })
    }
}
