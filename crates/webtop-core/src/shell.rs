//! Shell Bridge
//!
//! Per-client state machine binding one browser terminal to one PTY
//! channel on the shared session:
//!
//! ```text
//! Attaching -> Active -> Closed
//!          \-> Closed (channel open failed)
//! ```
//!
//! Inbound frames are demultiplexed with [`decode_client_frame`]: a frame
//! that parses as a known control message is applied to the channel, any
//! other payload is keyboard input. Input that happens to be valid JSON of
//! the exact control shape is therefore swallowed as a control message.
//! That collision is part of the wire protocol.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::{PtySize, RemoteSession, ShellInput};

/// Control messages a client may send on the terminal connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Change the terminal geometry
    Resize {
        /// Columns
        cols: u32,
        /// Rows
        rows: u32,
    },
}

/// One decoded client frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Structured control message
    Control(ControlMessage),
    /// Opaque terminal input
    Input(Bytes),
}

/// Decode a client payload into a control message or raw input
#[must_use]
pub fn decode_client_frame(payload: Bytes) -> ClientFrame {
    match serde_json::from_slice::<ControlMessage>(&payload) {
        Ok(control) => ClientFrame::Control(control),
        Err(_) => ClientFrame::Input(payload),
    }
}

/// Inline terminal notice for a failed or unavailable session
#[must_use]
pub fn error_notice(err: &Error) -> String {
    format!("\x1b[31m[SSH connection error: {}]\x1b[0m\r\n", err)
}

/// Lifecycle of one client session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Waiting for the PTY channel
    Attaching,
    /// Channel open, bytes flowing
    Active,
    /// Torn down
    Closed,
}

/// One browser terminal attached to the shared session
#[derive(Debug)]
pub struct ClientSession {
    id: Uuid,
    state: BridgeState,
    input: Option<mpsc::Sender<ShellInput>>,
    cancel: CancellationToken,
}

impl ClientSession {
    /// New session in `Attaching`
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: BridgeState::Attaching,
            input: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Token cancelled when the session closes; drives the telemetry task
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open the PTY channel and move to `Active`.
    ///
    /// Returns the channel's output stream. On failure the session is
    /// `Closed` and the error should be shown to the client.
    pub async fn attach(
        &mut self,
        session: &dyn RemoteSession,
        size: PtySize,
    ) -> Result<mpsc::Receiver<Bytes>> {
        if self.state != BridgeState::Attaching {
            return Err(Error::InvalidOperation(format!(
                "cannot attach a session in state {:?}",
                self.state
            )));
        }
        match session.open_shell(size).await {
            Ok(handle) => {
                self.input = Some(handle.input);
                self.state = BridgeState::Active;
                info!(session_id = %self.id, cols = size.cols, rows = size.rows, "Shell channel attached");
                Ok(handle.output)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Apply one inbound client frame to the channel, in arrival order
    pub async fn handle_client_frame(&self, payload: Bytes) -> Result<()> {
        let input = match (&self.state, &self.input) {
            (BridgeState::Active, Some(input)) => input,
            _ => return Err(Error::Channel("shell channel is not active".to_string())),
        };

        let message = match decode_client_frame(payload) {
            ClientFrame::Control(ControlMessage::Resize { cols, rows }) => {
                debug!(session_id = %self.id, cols, rows, "Terminal resized");
                ShellInput::Resize(PtySize { cols, rows })
            }
            ClientFrame::Input(bytes) => ShellInput::Data(bytes),
        };

        input
            .send(message)
            .await
            .map_err(|_| Error::Channel("shell channel closed".to_string()))
    }

    /// Tear down: stop telemetry and release the channel.
    ///
    /// Idempotent; returns `true` only for the call that closed it.
    pub fn close(&mut self) -> bool {
        if self.state == BridgeState::Closed {
            return false;
        }
        self.state = BridgeState::Closed;
        self.input = None;
        self.cancel.cancel();
        info!(session_id = %self.id, "Client session closed");
        true
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSession;

    #[test]
    fn test_decode_resize() {
        let frame = decode_client_frame(Bytes::from_static(br#"{"type":"resize","cols":120,"rows":40}"#));
        assert_eq!(
            frame,
            ClientFrame::Control(ControlMessage::Resize { cols: 120, rows: 40 })
        );
    }

    #[test]
    fn test_decode_plain_input() {
        let frame = decode_client_frame(Bytes::from_static(b"ls -la\r"));
        assert_eq!(frame, ClientFrame::Input(Bytes::from_static(b"ls -la\r")));
    }

    #[test]
    fn test_decode_other_json_is_input() {
        let payload = Bytes::from_static(br#"{"type":"paste","text":"x"}"#);
        assert_eq!(decode_client_frame(payload.clone()), ClientFrame::Input(payload));

        let partial = Bytes::from_static(br#"{"type":"resize","cols":80}"#);
        assert_eq!(decode_client_frame(partial.clone()), ClientFrame::Input(partial));
    }

    #[test]
    fn test_error_notice() {
        assert_eq!(
            error_notice(&Error::SessionUnavailable),
            "\x1b[31m[SSH connection error: remote session unavailable]\x1b[0m\r\n"
        );
    }

    #[tokio::test]
    async fn test_attach_and_forward_in_order() {
        let session = FakeSession::new();
        let mut client = ClientSession::new();
        assert_eq!(client.state(), BridgeState::Attaching);

        let mut output = client.attach(&session, PtySize::default()).await.unwrap();
        assert_eq!(client.state(), BridgeState::Active);
        let mut shell = session.take_shells().pop().unwrap();

        client.handle_client_frame(Bytes::from_static(b"a")).await.unwrap();
        client
            .handle_client_frame(Bytes::from_static(br#"{"type":"resize","cols":100,"rows":30}"#))
            .await
            .unwrap();
        client.handle_client_frame(Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(shell.input.recv().await, Some(ShellInput::Data(Bytes::from_static(b"a"))));
        assert_eq!(
            shell.input.recv().await,
            Some(ShellInput::Resize(PtySize { cols: 100, rows: 30 }))
        );
        assert_eq!(shell.input.recv().await, Some(ShellInput::Data(Bytes::from_static(b"b"))));

        shell.output.send(Bytes::from_static(b"$ ")).await.unwrap();
        assert_eq!(output.recv().await, Some(Bytes::from_static(b"$ ")));
    }

    #[tokio::test]
    async fn test_attach_failure_closes() {
        let session = FakeSession::new();
        session.fail_shells();
        let mut client = ClientSession::new();
        let token = client.cancel_token();

        assert!(client.attach(&session, PtySize::default()).await.is_err());
        assert_eq!(client.state(), BridgeState::Closed);
        assert!(token.is_cancelled());
        assert!(client
            .handle_client_frame(Bytes::from_static(b"x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_channel() {
        let session = FakeSession::new();
        let mut client = ClientSession::new();
        let _output = client.attach(&session, PtySize::default()).await.unwrap();
        let mut shell = session.take_shells().pop().unwrap();
        let token = client.cancel_token();

        assert!(client.close());
        assert!(!client.close());
        assert!(token.is_cancelled());
        // Input sender dropped, so the remote end sees the channel end
        assert_eq!(shell.input.recv().await, None);
    }

    #[tokio::test]
    async fn test_attach_twice_rejected() {
        let session = FakeSession::new();
        let mut client = ClientSession::new();
        let _output = client.attach(&session, PtySize::default()).await.unwrap();
        assert!(matches!(
            client.attach(&session, PtySize::default()).await,
            Err(Error::InvalidOperation(_))
        ));
    }
}
