//! PTY channel actor
//!
//! A spawned task owns the russh channel and multiplexes remote output
//! with client input, so the channel is only ever touched from one place.

use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use webtop_core::session::{ShellHandle, ShellInput};

const CHANNEL_BUFFER: usize = 256;

/// Start driving an open PTY channel
pub fn spawn(channel: Channel<Msg>) -> ShellHandle {
    let (input_tx, input_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (output_tx, output_rx) = mpsc::channel(CHANNEL_BUFFER);
    tokio::spawn(drive(channel, input_rx, output_tx));
    ShellHandle {
        input: input_tx,
        output: output_rx,
    }
}

async fn drive(
    mut channel: Channel<Msg>,
    mut input: mpsc::Receiver<ShellInput>,
    output: mpsc::Sender<Bytes>,
) {
    let id = channel.id();
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if output.send(Bytes::copy_from_slice(&data)).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(channel = ?id, exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                _ => {}
            },
            cmd = input.recv() => match cmd {
                Some(ShellInput::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!(channel = ?id, error = %e, "Failed to write to shell channel");
                        break;
                    }
                }
                Some(ShellInput::Resize(size)) => {
                    if let Err(e) = channel.window_change(size.cols, size.rows, 0, 0).await {
                        debug!(channel = ?id, error = %e, "Window change rejected");
                    }
                }
                // Client side released the handle
                None => break,
            },
        }
    }

    if let Err(e) = channel.eof().await {
        debug!(channel = ?id, error = %e, "EOF on an already closed shell channel");
    }
    if let Err(e) = channel.close().await {
        debug!(channel = ?id, error = %e, "Close on an already closed shell channel");
    }
    debug!(channel = ?id, "Shell channel closed");
}
