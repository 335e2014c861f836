//! SSH connector and session
//!
//! One [`SshSession`] wraps one authenticated russh client handle. Every
//! exec, shell and sftp request opens its own channel on that handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use webtop_core::session::{
    ExecOutput, PtySize, RemoteFs, RemoteSession, SessionConnector, ShellHandle,
};

use crate::config::SshConfig;
use crate::error::{Error, Result};
use crate::sftp::SftpFs;
use crate::shell;

/// russh event handler; its lifetime is the lifetime of the connection
pub struct ClientHandler {
    pinned_fingerprint: Option<String>,
    // Dropped with the handler when the connection task ends
    _alive: watch::Sender<()>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        match &self.pinned_fingerprint {
            Some(pinned) if !fingerprint_matches(pinned, &fingerprint) => {
                warn!(%fingerprint, "Server host key does not match pinned fingerprint");
                Err(Error::HostKeyMismatch)
            }
            Some(_) => Ok(true),
            None => {
                info!(%fingerprint, "Accepting server host key");
                Ok(true)
            }
        }
    }
}

/// Compare fingerprints, ignoring an optional `SHA256:` prefix
fn fingerprint_matches(pinned: &str, actual: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches("SHA256:").to_string();
    strip(pinned) == strip(actual)
}

/// Connects to the configured host
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    /// Connector for `config`
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect and authenticate once
    pub async fn open(&self) -> Result<SshSession> {
        let (alive_tx, alive_rx) = watch::channel(());
        let handler = ClientHandler {
            pinned_fingerprint: self.config.host_key_fingerprint.clone(),
            _alive: alive_tx,
        };

        let ssh_config = client::Config {
            keepalive_interval: (self.config.keepalive_secs > 0)
                .then(|| Duration::from_secs(self.config.keepalive_secs)),
            ..Default::default()
        };

        let addr = (self.config.host.as_str(), self.config.port);
        info!(target_host = %self.config.target(), "Opening SSH connection");
        let mut handle = client::connect(Arc::new(ssh_config), addr, handler).await?;

        self.authenticate(&mut handle).await?;
        info!(target_host = %self.config.target(), "SSH session authenticated");

        Ok(SshSession {
            handle,
            alive: alive_rx,
            term: self.config.term.clone(),
        })
    }

    async fn authenticate(&self, handle: &mut Handle<ClientHandler>) -> Result<()> {
        let user = self.config.username.as_str();
        if !self.config.has_credentials() {
            return Err(Error::NoCredentials);
        }

        if let Some(path) = self.config.key_path() {
            let passphrase = self.config.passphrase.as_ref().map(|p| p.expose_secret());
            let key_pair = russh_keys::load_secret_key(&path, passphrase).map_err(|e| Error::Key {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            if handle
                .authenticate_publickey(user, Arc::new(key_pair))
                .await?
            {
                debug!(user, "Public key authentication accepted");
                return Ok(());
            }
            warn!(user, "Public key authentication rejected");
        }

        if let Some(password) = self.config.password.as_ref().filter(|_| self.config.has_password()) {
            if handle
                .authenticate_password(user, password.expose_secret())
                .await?
            {
                debug!(user, "Password authentication accepted");
                return Ok(());
            }
            warn!(user, "Password authentication rejected");
        }

        Err(Error::AuthRejected(user.to_string()))
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    fn target(&self) -> String {
        self.config.target()
    }

    async fn connect(&self) -> webtop_core::Result<Arc<dyn RemoteSession>> {
        let session = self.open().await?;
        Ok(Arc::new(session))
    }
}

/// One authenticated SSH connection
pub struct SshSession {
    handle: Handle<ClientHandler>,
    alive: watch::Receiver<()>,
    term: String,
}

fn channel_error(err: russh::Error) -> webtop_core::Error {
    webtop_core::Error::Channel(err.to_string())
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str) -> webtop_core::Result<ExecOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(channel_error)?;
        channel.exec(true, command).await.map_err(channel_error)?;

        let mut output = ExecOutput::default();
        // Exit status may arrive after EOF, so read until the channel closes
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => output.stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    output.stderr.extend_from_slice(&data)
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    output.exit_status = Some(exit_status)
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }
        Ok(output)
    }

    async fn open_shell(&self, size: PtySize) -> webtop_core::Result<ShellHandle> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(channel_error)?;
        channel
            .request_pty(true, &self.term, size.cols, size.rows, 0, 0, &[])
            .await
            .map_err(channel_error)?;
        channel.request_shell(true).await.map_err(channel_error)?;
        Ok(shell::spawn(channel))
    }

    async fn open_filesystem(&self) -> webtop_core::Result<Arc<dyn RemoteFs>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(channel_error)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(channel_error)?;
        let fs = SftpFs::connect(channel).await?;
        Ok(Arc::new(fs))
    }

    fn is_closed(&self) -> bool {
        self.alive.has_changed().is_err()
    }

    async fn closed(&self) {
        let mut alive = self.alive.clone();
        // Only ever resolves once the handler's sender is gone
        while alive.changed().await.is_ok() {}
    }

    async fn disconnect(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(error = %e, "Disconnect on an already closed session");
        }
    }
}
