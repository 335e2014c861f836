//! Connection Supervisor
//!
//! Owns the single shared remote session. A single supervision task drives
//! the connection through an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Disconnected -> (delay) -> Connecting ...
//!                          \-> Disconnected (attempt failed)
//! any -> Closing (shutdown)
//! ```
//!
//! There is exactly one loop per supervisor, so reconnects never overlap.
//! Retries are unconditional at a fixed interval with no attempt cap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{RemoteFs, RemoteSession, SessionConnector};

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default timeout for one connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of the shared session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live session
    Disconnected,
    /// Attempt in progress
    Connecting,
    /// Session established and usable
    Ready,
    /// Supervisor shutting down
    Closing,
}

impl ConnectionState {
    /// Lowercase name used in logs and health output
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervisor timing
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed delay before every reconnect attempt
    pub reconnect_delay: Duration,
    /// Timeout for one connect + authenticate attempt
    pub connect_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SupervisorConfig {
    /// Set the reconnect delay
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

struct Live {
    session: Arc<dyn RemoteSession>,
    filesystem: Option<Arc<dyn RemoteFs>>,
}

/// Owner of the one live remote session
pub struct ConnectionSupervisor {
    connector: Arc<dyn SessionConnector>,
    config: SupervisorConfig,
    state_tx: watch::Sender<ConnectionState>,
    live: RwLock<Option<Live>>,
    started: AtomicBool,
    attempts: AtomicU64,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor; nothing connects until [`Self::ensure_connected`]
    #[must_use]
    pub fn new(connector: Arc<dyn SessionConnector>, config: SupervisorConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            connector,
            config,
            state_tx,
            live: RwLock::new(None),
            started: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Start the supervision loop if it is not running yet.
    ///
    /// Idempotent: returns `true` only for the call that started the loop.
    pub fn ensure_connected(self: &Arc<Self>) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        info!(target_host = %self.connector.target(), "Starting connection supervisor");
        let supervisor = self.clone();
        let handle = tokio::spawn(async move { supervisor.run().await });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        true
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Number of connection attempts made so far
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Whether the shared session is usable right now
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready && self.session().is_some()
    }

    /// The live session, if ready
    #[must_use]
    pub fn session(&self) -> Option<Arc<dyn RemoteSession>> {
        let live = self.live.read().unwrap_or_else(|e| e.into_inner());
        live.as_ref()
            .filter(|l| !l.session.is_closed())
            .map(|l| l.session.clone())
    }

    /// The filesystem sub-channel, if ready
    #[must_use]
    pub fn filesystem(&self) -> Option<Arc<dyn RemoteFs>> {
        let live = self.live.read().unwrap_or_else(|e| e.into_inner());
        live.as_ref()
            .filter(|l| !l.session.is_closed())
            .and_then(|l| l.filesystem.clone())
    }

    /// The live session or [`Error::SessionUnavailable`]
    pub fn require_session(&self) -> Result<Arc<dyn RemoteSession>> {
        self.session().ok_or(Error::SessionUnavailable)
    }

    /// The filesystem sub-channel or [`Error::SessionUnavailable`]
    pub fn require_filesystem(&self) -> Result<Arc<dyn RemoteFs>> {
        self.filesystem().ok_or(Error::SessionUnavailable)
    }

    /// Wait until the state is `Ready`, up to `timeout`
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Ready)).await,
            Ok(Ok(_))
        );
        ready
    }

    /// Stop supervising and close the live session
    pub async fn shutdown(&self) {
        self.transition(ConnectionState::Closing);
        self.cancel.cancel();

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Supervisor task ended abnormally");
            }
        }

        if let Some(live) = self.take_live() {
            live.session.disconnect().await;
        }
        self.transition(ConnectionState::Disconnected);
        info!("Connection supervisor stopped");
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.transition(ConnectionState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(attempt, "Connecting to remote host");

            let outcome = tokio::select! {
                outcome = tokio::time::timeout(self.config.connect_timeout, self.connector.connect()) => outcome,
                _ = self.cancel.cancelled() => break,
            };

            match outcome {
                Ok(Ok(session)) => {
                    let filesystem = match session.open_filesystem().await {
                        Ok(fs) => {
                            info!("Filesystem sub-channel ready");
                            Some(fs)
                        }
                        Err(e) => {
                            warn!(error = %e, "Filesystem sub-channel unavailable");
                            None
                        }
                    };
                    self.set_live(Live {
                        session: session.clone(),
                        filesystem,
                    });
                    self.transition(ConnectionState::Ready);

                    tokio::select! {
                        _ = session.closed() => {
                            warn!("Remote session closed");
                        }
                        _ = self.cancel.cancelled() => {
                            break;
                        }
                    }
                    self.take_live();
                    self.transition(ConnectionState::Disconnected);
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Connection attempt failed");
                    self.transition(ConnectionState::Disconnected);
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_secs = self.config.connect_timeout.as_secs(),
                        "Connection attempt timed out"
                    );
                    self.transition(ConnectionState::Disconnected);
                }
            }

            info!(
                delay_secs = self.config.reconnect_delay.as_secs(),
                "Reconnecting after delay"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.cancel.cancelled() => break,
            }
        }
        debug!("Supervision loop exited");
    }

    fn transition(&self, to: ConnectionState) {
        let mut from = to;
        let changed = self.state_tx.send_if_modified(|state| {
            from = *state;
            // Once closing, only the final Disconnected is accepted
            if *state == to
                || (*state == ConnectionState::Closing && to != ConnectionState::Disconnected)
            {
                return false;
            }
            *state = to;
            true
        });
        if changed {
            info!(from = %from, to = %to, "Connection state changed");
        }
    }

    fn set_live(&self, live: Live) {
        *self.live.write().unwrap_or_else(|e| e.into_inner()) = Some(live);
    }

    fn take_live(&self) -> Option<Live> {
        self.live.write().unwrap_or_else(|e| e.into_inner()).take()
    }
}
