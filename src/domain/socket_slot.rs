//! Ownership of a session's currently-bound WebSocket.
//!
//! The socket itself is owned by the gateway's writer task; the session only
//! holds a [`SocketSender`] for that task's bounded queue, wrapped in a
//! [`BoundSocket`]. Rebinding swaps the handle out of the [`SocketSlot`] and
//! hands the previous one back to the caller, who must close it.
//!
//! Closing never waits for queue capacity. Each binding carries a close
//! signal that the writer and any sender blocked on a full queue observe, so
//! a stalled peer is cut off at once.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::protocol::{CodecChain, Frame, WireMessage};

/// Instruction for a socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Send a frame to the peer.
    Send(Frame),
    /// Send a close frame and stop writing.
    Close,
}

/// Creates the queue between a session and one socket writer task.
#[must_use]
pub fn socket_channel(capacity: usize) -> (SocketSender, SocketQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        SocketSender {
            tx,
            closed: closed.clone(),
        },
        SocketQueue { rx, closed },
    )
}

/// Sending side of a socket writer's queue.
#[derive(Debug, Clone)]
pub struct SocketSender {
    tx: mpsc::Sender<SocketCommand>,
    closed: CancellationToken,
}

impl SocketSender {
    /// Queues `command`, waiting for capacity until the binding is closed.
    async fn send(&self, command: SocketCommand) -> Result<(), GatewayError> {
        tokio::select! {
            () = self.closed.cancelled() => {
                Err(GatewayError::Transport("socket closed".to_string()))
            }
            sent = self.tx.send(command) => {
                sent.map_err(|_| GatewayError::Transport("socket writer closed".to_string()))
            }
        }
    }
}

/// Receiving side of a socket writer's queue.
#[derive(Debug)]
pub struct SocketQueue {
    rx: mpsc::Receiver<SocketCommand>,
    closed: CancellationToken,
}

impl SocketQueue {
    /// Signal fired when the binding is closed without going through the
    /// queue.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Next queued command. `None` once the binding is closed or every
    /// sender is gone.
    pub async fn recv(&mut self) -> Option<SocketCommand> {
        tokio::select! {
            () = self.closed.cancelled() => None,
            command = self.rx.recv() => command,
        }
    }
}

/// Exclusive handle to one bound WebSocket.
#[derive(Debug)]
pub struct BoundSocket {
    generation: u64,
    sender: SocketSender,
}

impl BoundSocket {
    /// Binding generation; increases with every bind on the same session.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Closes the socket at once, dropping whatever is still queued.
    pub fn close(self) {
        self.sender.closed.cancel();
    }

    /// Queues `message` followed by a close. Falls back to [`Self::close`]
    /// when the queue has no room, so this never waits on the peer.
    pub fn close_with(self, codec: &CodecChain, message: &WireMessage) {
        let queued = match codec.encode(message) {
            Ok(frame) => {
                self.sender.tx.try_send(SocketCommand::Send(frame)).is_ok()
                    && self.sender.tx.try_send(SocketCommand::Close).is_ok()
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping final message");
                false
            }
        };
        if !queued {
            self.close();
        }
    }
}

/// Slot holding at most one [`BoundSocket`].
#[derive(Debug, Default)]
pub struct SocketSlot {
    current: Mutex<Option<BoundSocket>>,
    generations: AtomicU64,
}

impl SocketSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new socket and returns its generation together with the
    /// previously bound socket, which the caller must close.
    pub async fn swap(&self, sender: SocketSender) -> (u64, Option<BoundSocket>) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self
            .current
            .lock()
            .await
            .replace(BoundSocket { generation, sender });
        (generation, previous)
    }

    /// Removes and returns the bound socket.
    pub async fn take(&self) -> Option<BoundSocket> {
        self.current.lock().await.take()
    }

    /// Returns `true` if `generation` is the currently bound socket.
    pub async fn is_current(&self, generation: u64) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|bound| bound.generation == generation)
    }

    /// Returns `true` if the binding `generation` may end the session: it is
    /// still the bound socket, or nothing is bound.
    pub async fn may_release(&self, generation: u64) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_none_or(|bound| bound.generation == generation)
    }

    async fn current_sender(&self) -> Option<(u64, SocketSender)> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|bound| (bound.generation, bound.sender.clone()))
    }

    /// Encodes `message` and queues it on the bound socket.
    ///
    /// The lock is released before awaiting queue capacity so a slow socket
    /// never blocks a concurrent rebind. A send that fails because its
    /// binding was replaced meanwhile is retried on the newer socket.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when no socket is bound or the
    /// bound socket is closed, and [`GatewayError::Internal`] when the
    /// message cannot be encoded.
    pub async fn send(&self, codec: &CodecChain, message: &WireMessage) -> Result<(), GatewayError> {
        let frame = codec
            .encode(message)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let mut failed = None;
        loop {
            let (generation, sender) = self
                .current_sender()
                .await
                .ok_or_else(|| GatewayError::Transport("no socket bound".to_string()))?;
            if failed == Some(generation) {
                return Err(GatewayError::Transport("socket closed".to_string()));
            }
            match sender.send(SocketCommand::Send(frame.clone())).await {
                Ok(()) => return Ok(()),
                Err(_) => failed = Some(generation),
            }
        }
    }
}
