//! In-memory fakes of the session traits
//!
//! Available to this crate's unit tests and, through the `testing`
//! feature, to integration tests of dependent crates.

use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, Notify};

use crate::error::{Error, Result};
use crate::path;
use crate::session::{
    AttrKind, ExecOutput, FileAttrs, FsError, FsResult, PtySize, RawDirEntry, RemoteFs,
    RemoteReader, RemoteSession, RemoteWriter, SessionConnector, ShellHandle, ShellInput,
};
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};

type ExecHook = Box<dyn Fn(&str) -> Option<ExecOutput> + Send + Sync>;

/// Remote end of a fake shell channel, driven by the test
pub struct FakeShellEnd {
    /// What the client sent towards the shell
    pub input: mpsc::Receiver<ShellInput>,
    /// Push bytes as if the remote shell printed them
    pub output: mpsc::Sender<Bytes>,
}

/// Scriptable in-memory [`RemoteSession`]
pub struct FakeSession {
    responses: Mutex<BTreeMap<String, ExecOutput>>,
    hooks: Mutex<Vec<ExecHook>>,
    exec_log: Mutex<Vec<String>>,
    shells: Mutex<Vec<FakeShellEnd>>,
    shell_failure: AtomicBool,
    exec_delay: Mutex<Option<(String, Duration)>>,
    fs: Option<Arc<FakeFs>>,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl FakeSession {
    /// Session without a filesystem sub-channel
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(BTreeMap::new()),
            hooks: Mutex::new(Vec::new()),
            exec_log: Mutex::new(Vec::new()),
            shells: Mutex::new(Vec::new()),
            shell_failure: AtomicBool::new(false),
            exec_delay: Mutex::new(None),
            fs: None,
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        }
    }

    /// Session whose filesystem sub-channel is `fs`
    pub fn with_fs(fs: Arc<FakeFs>) -> Self {
        Self {
            fs: Some(fs),
            ..Self::new()
        }
    }

    /// Script the result of an exact command
    pub fn respond(&self, command: &str, stdout: &str, stderr: &str, exit_status: Option<u32>) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            ExecOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
                exit_status,
            },
        );
    }

    /// Script results computed from the command text
    pub fn on_exec<F>(&self, hook: F)
    where
        F: Fn(&str) -> Option<ExecOutput> + Send + Sync + 'static,
    {
        self.hooks.lock().unwrap().push(Box::new(hook));
    }

    /// Hold commands starting with `prefix` for `delay` before they complete
    pub fn delay_exec(&self, prefix: &str, delay: Duration) {
        *self.exec_delay.lock().unwrap() = Some((prefix.to_string(), delay));
    }

    /// Commands executed so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.exec_log.lock().unwrap().clone()
    }

    /// Number of executed commands starting with `prefix`
    pub fn executed_matching(&self, prefix: &str) -> usize {
        self.exec_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Make the next `open_shell` calls fail
    pub fn fail_shells(&self) {
        self.shell_failure.store(true, Ordering::SeqCst);
    }

    /// Take the remote ends of the shells opened so far
    pub fn take_shells(&self) -> Vec<FakeShellEnd> {
        std::mem::take(&mut *self.shells.lock().unwrap())
    }

    /// Simulate the transport dropping
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
    }
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        if self.is_closed() {
            return Err(Error::Channel("session closed".to_string()));
        }
        self.exec_log.lock().unwrap().push(command.to_string());

        let delay = self
            .exec_delay
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        for hook in self.hooks.lock().unwrap().iter() {
            if let Some(out) = hook(command) {
                return Ok(out);
            }
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or(ExecOutput {
                stdout: Vec::new(),
                stderr: b"command not found".to_vec(),
                exit_status: Some(127),
            }))
    }

    async fn open_shell(&self, _size: PtySize) -> Result<ShellHandle> {
        if self.shell_failure.load(Ordering::SeqCst) || self.is_closed() {
            return Err(Error::Channel("shell request refused".to_string()));
        }
        let (input_tx, input_rx) = mpsc::channel(64);
        let (output_tx, output_rx) = mpsc::channel(64);
        self.shells.lock().unwrap().push(FakeShellEnd {
            input: input_rx,
            output: output_tx,
        });
        Ok(ShellHandle {
            input: input_tx,
            output: output_rx,
        })
    }

    async fn open_filesystem(&self) -> Result<Arc<dyn RemoteFs>> {
        match &self.fs {
            Some(fs) => Ok(fs.clone()),
            None => Err(Error::Channel("sftp subsystem unavailable".to_string())),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn closed(&self) {
        loop {
            let notified = self.closed_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    async fn disconnect(&self) {
        self.close();
    }
}

/// Supervisor that is already `Ready` on `session`
pub async fn ready_supervisor(session: Arc<FakeSession>) -> Arc<ConnectionSupervisor> {
    let connector = Arc::new(FakeConnector::new(vec![session]));
    let supervisor = ConnectionSupervisor::new(connector, SupervisorConfig::default());
    supervisor.ensure_connected();
    assert!(
        supervisor.wait_ready(Duration::from_secs(5)).await,
        "fake supervisor did not become ready"
    );
    supervisor
}

/// Connector that hands out pre-built sessions, then fails
pub struct FakeConnector {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeConnector {
    /// Connector that yields `sessions` in order
    pub fn new(sessions: Vec<Arc<FakeSession>>) -> Self {
        let mut sessions = sessions;
        sessions.reverse();
        Self {
            sessions: Mutex::new(sessions),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Connection attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping attempts observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    fn target(&self) -> String {
        "fake@localhost:22".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn RemoteSession>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let next = self.sessions.lock().unwrap().pop();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match next {
            Some(session) => Ok(session),
            None => Err(Error::Connection("connection refused".to_string())),
        }
    }
}

#[derive(Clone)]
enum FakeNode {
    Dir { mtime: u64 },
    File { data: Arc<Mutex<Vec<u8>>>, mtime: u64 },
    Symlink { target: String },
}

/// In-memory [`RemoteFs`]
pub struct FakeFs {
    nodes: Mutex<BTreeMap<String, FakeNode>>,
    read_failure: AtomicBool,
}

impl FakeFs {
    /// Filesystem containing only `/`
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), FakeNode::Dir { mtime: 0 });
        Self {
            nodes: Mutex::new(nodes),
            read_failure: AtomicBool::new(false),
        }
    }

    /// Add a directory (parents are created as needed)
    pub fn add_dir(&self, path: &str) -> &Self {
        let path = path::normalize(path);
        self.ensure_parents(&path);
        self.nodes
            .lock()
            .unwrap()
            .insert(path, FakeNode::Dir { mtime: 1_700_000_000 });
        self
    }

    /// Add a file with contents
    pub fn add_file(&self, path: &str, contents: &[u8]) -> &Self {
        let path = path::normalize(path);
        self.ensure_parents(&path);
        self.nodes.lock().unwrap().insert(
            path,
            FakeNode::File {
                data: Arc::new(Mutex::new(contents.to_vec())),
                mtime: 1_700_000_000,
            },
        );
        self
    }

    /// Add a symlink pointing at `target`
    pub fn add_symlink(&self, path: &str, target: &str) -> &Self {
        let path = path::normalize(path);
        self.ensure_parents(&path);
        self.nodes.lock().unwrap().insert(
            path,
            FakeNode::Symlink {
                target: target.to_string(),
            },
        );
        self
    }

    /// Make every subsequent read fail mid-stream
    pub fn fail_reads(&self) {
        self.read_failure.store(true, Ordering::SeqCst);
    }

    /// Remove the node at `path`, reporting whether it existed
    pub fn remove(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().remove(&path::normalize(path)).is_some()
    }

    /// Whether a node exists at `path`
    pub fn exists(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(&path::normalize(path))
    }

    /// File contents at `path`
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(&path::normalize(path)) {
            Some(FakeNode::File { data, .. }) => Some(data.lock().unwrap().clone()),
            _ => None,
        }
    }

    fn ensure_parents(&self, path: &str) {
        let mut nodes = self.nodes.lock().unwrap();
        let mut current = path::parent(path);
        while current != "/" {
            nodes
                .entry(current.clone())
                .or_insert(FakeNode::Dir { mtime: 1_700_000_000 });
            current = path::parent(&current);
        }
    }

    fn attrs(node: &FakeNode) -> FileAttrs {
        match node {
            FakeNode::Dir { mtime } => FileAttrs {
                size: 4096,
                mtime: *mtime,
                kind: AttrKind::Directory,
            },
            FakeNode::File { data, mtime } => FileAttrs {
                size: data.lock().unwrap().len() as u64,
                mtime: *mtime,
                kind: AttrKind::File,
            },
            FakeNode::Symlink { target } => FileAttrs {
                size: target.len() as u64,
                mtime: 1_700_000_000,
                kind: AttrKind::Symlink,
            },
        }
    }

    fn resolve(&self, path: &str) -> FsResult<FakeNode> {
        let nodes = self.nodes.lock().unwrap();
        let mut current = path::normalize(path);
        for _ in 0..16 {
            match nodes.get(&current) {
                Some(FakeNode::Symlink { target }) => {
                    current = if target.starts_with('/') {
                        path::normalize(target)
                    } else {
                        path::join(&path::parent(&current), target)
                    };
                }
                Some(node) => return Ok(node.clone()),
                None => return Err(FsError::NotFound(path.to_string())),
            }
        }
        Err(FsError::Failure(format!("too many links: {}", path)))
    }
}

impl Default for FakeFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Yields one chunk, then a connection reset
struct FailingReader {
    served: bool,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.served {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "channel reset",
            )));
        }
        self.served = true;
        buf.put_slice(b"partial");
        Poll::Ready(Ok(()))
    }
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for SharedWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl RemoteFs for FakeFs {
    async fn read_dir(&self, dir: &str) -> FsResult<Vec<RawDirEntry>> {
        let dir = path::normalize(dir);
        let nodes = self.nodes.lock().unwrap();
        match nodes.get(&dir) {
            Some(FakeNode::Dir { .. }) => {}
            Some(_) => return Err(FsError::Failure(format!("not a directory: {}", dir))),
            None => return Err(FsError::NotFound(dir)),
        }
        Ok(nodes
            .iter()
            .filter(|(p, _)| p.as_str() != "/" && path::parent(p) == dir)
            .map(|(p, node)| RawDirEntry {
                name: path::basename(p),
                attrs: Self::attrs(node),
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> FsResult<FileAttrs> {
        self.resolve(path).map(|node| Self::attrs(&node))
    }

    async fn lstat(&self, path: &str) -> FsResult<FileAttrs> {
        self.nodes
            .lock()
            .unwrap()
            .get(&path::normalize(path))
            .map(Self::attrs)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    async fn read_link(&self, path: &str) -> FsResult<String> {
        match self.nodes.lock().unwrap().get(&path::normalize(path)) {
            Some(FakeNode::Symlink { target }) => Ok(target.clone()),
            Some(_) => Err(FsError::Failure(format!("not a link: {}", path))),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    async fn open_read(&self, path: &str) -> FsResult<RemoteReader> {
        match self.resolve(path)? {
            FakeNode::File { data, .. } => {
                if self.read_failure.load(Ordering::SeqCst) {
                    return Ok(Box::pin(FailingReader { served: false }));
                }
                let bytes = data.lock().unwrap().clone();
                Ok(Box::pin(io::Cursor::new(bytes)))
            }
            _ => Err(FsError::Failure(format!("not a file: {}", path))),
        }
    }

    async fn create(&self, path: &str) -> FsResult<RemoteWriter> {
        let path = path::normalize(path);
        let parent = path::parent(&path);
        let mut nodes = self.nodes.lock().unwrap();
        if !matches!(nodes.get(&parent), Some(FakeNode::Dir { .. })) {
            return Err(FsError::NotFound(parent));
        }
        if matches!(nodes.get(&path), Some(FakeNode::Dir { .. })) {
            return Err(FsError::Failure(format!("is a directory: {}", path)));
        }
        let data = Arc::new(Mutex::new(Vec::new()));
        nodes.insert(
            path,
            FakeNode::File {
                data: data.clone(),
                mtime: 1_700_000_100,
            },
        );
        Ok(Box::pin(SharedWriter(data)))
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(&from) {
            return Err(FsError::NotFound(from));
        }
        let moved: Vec<(String, FakeNode)> = nodes
            .iter()
            .filter(|(p, _)| path::is_ancestor(&from, p))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        for (old, node) in moved {
            nodes.remove(&old);
            let suffix = &old[from.len()..];
            nodes.insert(format!("{}{}", to, suffix), node);
        }
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> FsResult<()> {
        let path = path::normalize(path);
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(&path) {
            Some(FakeNode::Dir { .. }) => Err(FsError::Failure(format!("is a directory: {}", path))),
            Some(_) => {
                nodes.remove(&path);
                Ok(())
            }
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn remove_dir(&self, path: &str) -> FsResult<()> {
        let path = path::normalize(path);
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(&path) {
            Some(FakeNode::Dir { .. }) => {
                if nodes.keys().any(|p| p != &path && path::parent(p) == path) {
                    return Err(FsError::Failure(format!("directory not empty: {}", path)));
                }
                nodes.remove(&path);
                Ok(())
            }
            Some(_) => Err(FsError::Failure(format!("not a directory: {}", path))),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn mkdir(&self, path: &str) -> FsResult<()> {
        let path = path::normalize(path);
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&path) {
            return Err(FsError::Failure(format!("file exists: {}", path)));
        }
        if !matches!(nodes.get(&path::parent(&path)), Some(FakeNode::Dir { .. })) {
            return Err(FsError::NotFound(path::parent(&path)));
        }
        nodes.insert(path, FakeNode::Dir { mtime: 1_700_000_100 });
        Ok(())
    }
}
