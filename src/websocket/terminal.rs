//! Terminal WebSocket handler
//!
//! Binds one browser terminal to a PTY channel on the shared SSH session
//! and pushes host statistics on the same socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webtop_core::session::PtySize;
use webtop_core::shell::error_notice;
use webtop_core::telemetry::spawn_sampler;
use webtop_core::{ClientSession, ConnectionSupervisor, StatsPayload};

use crate::middleware::auth::RequireAuth;

/// Per-connection settings shared by every terminal
#[derive(Debug, Clone)]
pub struct TerminalSettings {
    /// Telemetry push period
    pub telemetry_interval: Duration,
    /// Cancelled on server shutdown
    pub shutdown: CancellationToken,
}

/// Server-to-client notifications sent as text frames
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Periodic host statistics
    Stats(StatsPayload),
}

/// WebSocket upgrade handler
pub async fn terminal_handler(
    RequireAuth(user): RequireAuth,
    Extension(supervisor): Extension<Arc<ConnectionSupervisor>>,
    Extension(settings): Extension<TerminalSettings>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!(user = %user, "Terminal upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, supervisor, settings))
}

/// Handle WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    supervisor: Arc<ConnectionSupervisor>,
    settings: TerminalSettings,
) {
    let (sender, receiver) = socket.split();
    bridge(sender, receiver, supervisor, settings).await;
}

/// Write an inline error notice and close the socket
async fn reject<S>(sender: &mut S, err: &webtop_core::Error)
where
    S: Sink<Message> + Unpin,
{
    let _ = sender.send(Message::Text(error_notice(err))).await;
    let _ = sender.send(Message::Close(None)).await;
}

/// Run one terminal session until either side goes away
pub async fn bridge<S, R>(
    mut sender: S,
    mut receiver: R,
    supervisor: Arc<ConnectionSupervisor>,
    settings: TerminalSettings,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut client = ClientSession::new();
    let session_id = client.id();
    info!(%session_id, "Terminal connection established");

    let session = match supervisor.require_session() {
        Ok(session) => session,
        Err(e) => {
            warn!(%session_id, error = %e, "Terminal rejected, session not ready");
            reject(&mut sender, &e).await;
            return;
        }
    };

    let mut output = match client.attach(session.as_ref(), PtySize::default()).await {
        Ok(output) => output,
        Err(e) => {
            warn!(%session_id, error = %e, "Failed to open shell channel");
            reject(&mut sender, &e).await;
            return;
        }
    };

    let (stats_tx, mut stats_rx) = mpsc::channel(4);
    spawn_sampler(
        session,
        settings.telemetry_interval,
        stats_tx,
        client.cancel_token(),
    );

    loop {
        tokio::select! {
            _ = settings.shutdown.cancelled() => {
                debug!(%session_id, "Server shutting down");
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = client.handle_client_frame(Bytes::from(text)).await {
                        debug!(%session_id, error = %e, "Dropping client input");
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = client.handle_client_frame(Bytes::from(data)).await {
                        debug!(%session_id, error = %e, "Dropping client input");
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(%session_id, "Client closed terminal");
                    break;
                }
                Some(Err(e)) => {
                    warn!(%session_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
            chunk = output.recv() => match chunk {
                Some(bytes) => {
                    if sender.send(Message::Binary(bytes.to_vec())).await.is_err() {
                        break;
                    }
                }
                None => {
                    info!(%session_id, "Remote shell closed");
                    break;
                }
            },
            Some(stats) = stats_rx.recv() => {
                match serde_json::to_string(&ServerEvent::Stats(stats)) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%session_id, error = %e, "Failed to encode stats"),
                }
            }
        }
    }

    client.close();
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use webtop_core::session::ShellInput;
    use webtop_core::telemetry::RawTelemetry;
    use webtop_core::{TelemetrySample, TelemetrySampler};
    use webtop_core::testing::{ready_supervisor, FakeSession, FakeShellEnd};

    fn settings() -> TerminalSettings {
        TerminalSettings {
            telemetry_interval: Duration::from_secs(3600),
            shutdown: CancellationToken::new(),
        }
    }

    async fn wait_for_shell(session: &FakeSession) -> FakeShellEnd {
        for _ in 0..200 {
            if let Some(shell) = session.take_shells().pop() {
                return shell;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("shell was never opened");
    }

    #[test]
    fn test_stats_event_shape() {
        let sample = TelemetrySample::parse(&RawTelemetry::default(), chrono::Utc::now());
        let payload = TelemetrySampler::new().observe(sample);
        let json = serde_json::to_value(ServerEvent::Stats(payload)).unwrap();
        assert_eq!(json["type"], "stats");
        assert_eq!(json["data"]["osName"], "N/A");
        assert_eq!(json["data"]["rxSpeed"], "0 Bytes/s");
    }

    #[tokio::test]
    async fn test_bridge_round_trip() {
        let session = Arc::new(FakeSession::new());
        let supervisor = ready_supervisor(session.clone()).await;
        let (to_client, mut from_server) = fmpsc::unbounded::<Message>();
        let (to_server, from_client) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let task = tokio::spawn(bridge(to_client, from_client, supervisor, settings()));
        let mut shell = wait_for_shell(&session).await;

        to_server
            .unbounded_send(Ok(Message::Text(r#"{"type":"resize","cols":100,"rows":30}"#.into())))
            .unwrap();
        match shell.input.recv().await {
            Some(ShellInput::Resize(size)) => assert_eq!((size.cols, size.rows), (100, 30)),
            other => panic!("unexpected shell input: {:?}", other),
        }

        to_server
            .unbounded_send(Ok(Message::Binary(b"ls -la\n".to_vec())))
            .unwrap();
        match shell.input.recv().await {
            Some(ShellInput::Data(data)) => assert_eq!(&data[..], b"ls -la\n"),
            other => panic!("unexpected shell input: {:?}", other),
        }

        shell.output.send(Bytes::from_static(b"total 0\r\n")).await.unwrap();
        match from_server.next().await {
            Some(Message::Binary(data)) => assert_eq!(data, b"total 0\r\n"),
            other => panic!("unexpected frame: {:?}", other),
        }

        to_server
            .unbounded_send(Ok(Message::Ping(b"hb".to_vec())))
            .unwrap();
        match from_server.next().await {
            Some(Message::Pong(data)) => assert_eq!(data, b"hb"),
            other => panic!("unexpected frame: {:?}", other),
        }

        to_server.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();
        assert!(matches!(from_server.next().await, Some(Message::Close(None))));
        // Client session released its end of the channel
        assert!(shell.input.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shell_failure_writes_notice() {
        let session = Arc::new(FakeSession::new());
        session.fail_shells();
        let supervisor = ready_supervisor(session).await;
        let (to_client, from_server) = fmpsc::unbounded::<Message>();
        let (_to_server, from_client) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        bridge(to_client, from_client, supervisor, settings()).await;

        let frames: Vec<Message> = from_server.collect().await;
        match &frames[..] {
            [Message::Text(notice), Message::Close(None)] => {
                assert!(notice.starts_with("\x1b[31m[SSH connection error:"));
                assert!(notice.ends_with("\x1b[0m\r\n"));
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_shell_exit_closes_socket() {
        let session = Arc::new(FakeSession::new());
        let supervisor = ready_supervisor(session.clone()).await;
        let (to_client, mut from_server) = fmpsc::unbounded::<Message>();
        let (_to_server, from_client) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let task = tokio::spawn(bridge(to_client, from_client, supervisor, settings()));
        let shell = wait_for_shell(&session).await;
        drop(shell);

        task.await.unwrap();
        assert!(matches!(from_server.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn test_shutdown_ends_bridge() {
        let session = Arc::new(FakeSession::new());
        let supervisor = ready_supervisor(session.clone()).await;
        let (to_client, _from_server) = fmpsc::unbounded::<Message>();
        let (_to_server, from_client) = fmpsc::unbounded::<Result<Message, axum::Error>>();
        let settings = settings();
        let shutdown = settings.shutdown.clone();

        let task = tokio::spawn(bridge(to_client, from_client, supervisor, settings));
        let _shell = wait_for_shell(&session).await;
        shutdown.cancel();
        tokio_test::assert_ok!(task.await);
    }
}
