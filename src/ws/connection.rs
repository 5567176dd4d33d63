//! WebSocket connection state machine.
//!
//! Each upgraded socket is split in two. A writer task owns the sink and
//! drains the binding's bounded [`SocketQueue`]; the read loop below owns the
//! stream, decodes inbound [`WireMessage`]s and dispatches them to the SSH
//! bridge.
//!
//! ```text
//! bind ─▶ shell running? ─ no ─▶ allocate pty ─ err ─▶ failure as `output` message, return
//!              │ yes                  │ ok
//!              └──────────┬───────────┘
//!                         ▼
//!             "shell ready" ─▶ read loop ─▶ release binding
//! ```

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::app_state::AppState;
use crate::domain::{Session, SessionId, SocketCommand, SocketQueue, socket_channel};
use crate::error::GatewayError;
use crate::protocol::{Frame, MessageKind, WireMessage};

/// How long a closing writer waits for the peer to take the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why the read loop stopped.
#[derive(Debug)]
enum LoopExit {
    /// Peer sent a close frame or the stream ended.
    Closed,
    /// Reading from the socket failed.
    ReadFailed(String),
    /// Forwarding to the shell failed.
    Bridge(GatewayError),
    /// The session was cleaned up elsewhere.
    Cancelled,
    /// A newer socket took over the session.
    Superseded,
}

/// Runs the full lifecycle of one WebSocket bound to `session_id`.
pub async fn run_connection(socket: WebSocket, session_id: SessionId, state: AppState) {
    let (sink, stream) = socket.split();
    let (sender, queue) = socket_channel(state.socket_queue_capacity);
    let closed = queue.close_signal();
    tokio::spawn(write_socket(sink, queue));

    let (session, generation) = match state.registry.bind(&session_id, sender).await {
        Ok(bound) => bound,
        Err(err) => {
            // Cleaned up between the upgrade check and now; dropping the
            // sender stops the writer, which closes the socket.
            tracing::info!(%session_id, error = %err, "websocket bind failed");
            return;
        }
    };
    tracing::info!(%session_id, generation, "websocket bound");

    let codec = state.bridge.codec();
    if session.shell_commands().await.is_some() {
        tracing::info!(%session_id, generation, "reattached to running shell");
    } else if let Err(err) = state.bridge.allocate_pty(&session).await {
        tracing::warn!(%session_id, error = %err, "pty allocation failed");
        if let Err(send_err) = session
            .socket()
            .send(codec, &WireMessage::output(err.to_string()))
            .await
        {
            tracing::debug!(%session_id, error = %send_err, "could not report pty failure");
        }
        return;
    }
    if let Err(err) = session
        .socket()
        .send(codec, &WireMessage::status("shell ready"))
        .await
    {
        tracing::debug!(%session_id, error = %err, "could not announce shell");
    }

    let exit = read_loop(stream, &session, generation, &closed, &state).await;
    match &exit {
        LoopExit::Closed | LoopExit::Cancelled | LoopExit::Superseded => {
            tracing::info!(%session_id, exit = ?exit, "websocket read loop ended");
        }
        LoopExit::ReadFailed(error) => {
            tracing::warn!(%session_id, %error, "websocket read failed");
        }
        LoopExit::Bridge(error) => {
            tracing::warn!(%session_id, %error, "shell relay failed");
        }
    }
    state.registry.release_binding(&session_id, generation).await;
}

/// Reads frames until the socket closes, fails, is superseded, or the
/// session is cancelled. Malformed frames are skipped.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    session: &Session,
    generation: u64,
    closed: &CancellationToken,
    state: &AppState,
) -> LoopExit {
    let cancel = session.cancel_token().clone();
    let codec = state.bridge.codec();

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return LoopExit::Cancelled,
            () = closed.cancelled() => return LoopExit::Superseded,
            next = stream.next() => next,
        };
        let frame = match next {
            None => return LoopExit::Closed,
            Some(Err(e)) => return LoopExit::ReadFailed(e.to_string()),
            Some(Ok(Message::Close(_))) => return LoopExit::Closed,
            Some(Ok(message)) => match inbound_frame(message) {
                Some(frame) => frame,
                None => continue,
            },
        };

        if !session.socket().is_current(generation).await {
            return LoopExit::Superseded;
        }

        let message = match codec
            .decode(&frame)
            .map_err(|e| GatewayError::ProtocolDecode(e.to_string()))
        {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(session_id = %session.id(), error = %err, "dropping undecodable frame");
                continue;
            }
        };

        if let Err(err) = dispatch(state, session, message).await {
            return LoopExit::Bridge(err);
        }
    }
}

/// Applies one decoded message to the session's shell.
async fn dispatch(
    state: &AppState,
    session: &Session,
    message: WireMessage,
) -> Result<(), GatewayError> {
    match message.kind {
        MessageKind::Input => {
            let data = message.data.unwrap_or_default();
            if !data.is_empty() {
                state.bridge.write(session, data.as_bytes()).await?;
            }
        }
        MessageKind::Resize => {
            let cols = message.cols.unwrap_or(0);
            let rows = message.rows.unwrap_or(0);
            if !state.bridge.resize(session, cols, rows).await? {
                tracing::debug!(session_id = %session.id(), cols, rows, "ignoring non-positive resize");
            }
        }
        other => {
            tracing::debug!(session_id = %session.id(), kind = %other, "ignoring inbound message");
        }
    }
    Ok(())
}

/// Maps a data frame to a codec [`Frame`]; control frames yield `None`.
fn inbound_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

/// Drains the socket queue into the sink until told to close, the queue's
/// senders are gone, or the peer stops accepting frames. A pending write is
/// abandoned as soon as the binding is closed.
async fn write_socket(mut sink: SplitSink<WebSocket, Message>, mut queue: SocketQueue) {
    let closed = queue.close_signal();
    while let Some(command) = queue.recv().await {
        let message = match command {
            SocketCommand::Send(Frame::Binary(bytes)) => Message::binary(bytes),
            SocketCommand::Send(Frame::Text(text)) => Message::text(text),
            SocketCommand::Close => break,
        };
        let written = tokio::select! {
            () = closed.cancelled() => break,
            written = sink.send(message) => written,
        };
        if let Err(e) = written {
            tracing::debug!(error = %e, "websocket write failed");
            break;
        }
    }
    if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
        tracing::debug!("peer did not take the close frame in time");
    }
}
