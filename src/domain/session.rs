//! One live remote-shell session and the resources it owns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{SessionId, SocketSlot};
use crate::protocol::{CodecChain, WireMessage};
use crate::ssh::{RemoteShell, ShellCommand, ShellHandle, SshConnection, SshTransport};

/// Monotonic record of the last input or output on a session.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    /// Starts the clock at "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Records activity at the current instant.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Instant of the most recent activity (creation if none).
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    /// Instant the session was created.
    #[must_use]
    pub const fn created(&self) -> Instant {
        self.origin
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum ShellSlot {
    /// Channel opened, shell not started yet.
    Pending(Box<dyn RemoteShell>),
    /// Shell started; the driver task owns the channel.
    Running(ShellHandle),
    /// Taken for startup, or already closed.
    Empty,
}

/// A live remote shell bridged to at most one WebSocket.
///
/// Created by [`super::SessionRegistry::create`] once SSH authentication
/// succeeded. The registry is the only party that tears it down.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    target: String,
    created_at: DateTime<Utc>,
    activity: Arc<ActivityClock>,
    transport: Mutex<Option<Box<dyn SshTransport>>>,
    shell: Mutex<ShellSlot>,
    socket: Arc<SocketSlot>,
    cancel: CancellationToken,
}

impl Session {
    /// Wraps an authenticated connection into a session record.
    #[must_use]
    pub fn new(id: SessionId, target: String, connection: SshConnection) -> Self {
        Self {
            id,
            target,
            created_at: Utc::now(),
            activity: Arc::new(ActivityClock::new()),
            transport: Mutex::new(Some(connection.transport)),
            shell: Mutex::new(ShellSlot::Pending(connection.shell)),
            socket: Arc::new(SocketSlot::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// `user@host:port` of the remote end.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Activity clock shared with the session's tasks.
    #[must_use]
    pub fn activity(&self) -> &Arc<ActivityClock> {
        &self.activity
    }

    /// Slot holding the bound WebSocket.
    #[must_use]
    pub fn socket(&self) -> &Arc<SocketSlot> {
        &self.socket
    }

    /// Cancellation signal triggered once by cleanup.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Takes the not-yet-started shell, leaving the slot empty.
    pub async fn take_pending_shell(&self) -> Option<Box<dyn RemoteShell>> {
        let mut slot = self.shell.lock().await;
        match std::mem::replace(&mut *slot, ShellSlot::Empty) {
            ShellSlot::Pending(shell) => Some(shell),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Returns `true` while a not-yet-started shell is held.
    pub async fn has_pending_shell(&self) -> bool {
        matches!(*self.shell.lock().await, ShellSlot::Pending(_))
    }

    /// Puts back a shell whose startup failed so cleanup can close it.
    /// Closes it right away if the session is already being torn down.
    pub async fn restore_shell(&self, mut shell: Box<dyn RemoteShell>) {
        if self.cancel.is_cancelled() {
            shell.close().await;
            return;
        }
        *self.shell.lock().await = ShellSlot::Pending(shell);
    }

    /// Records the handle of a started shell.
    pub async fn install_shell(&self, handle: ShellHandle) {
        if self.cancel.is_cancelled() {
            handle.shutdown().await;
            return;
        }
        *self.shell.lock().await = ShellSlot::Running(handle);
    }

    /// Sender for the running shell's command queue.
    pub async fn shell_commands(&self) -> Option<mpsc::Sender<ShellCommand>> {
        match &*self.shell.lock().await {
            ShellSlot::Running(handle) => Some(handle.commands()),
            ShellSlot::Pending(_) | ShellSlot::Empty => None,
        }
    }

    /// Releases everything the session owns, in order: cancellation signal,
    /// WebSocket (after `farewell`, if any), SSH shell, SSH transport.
    /// The shell channel is closed while its transport is still up.
    pub(crate) async fn close(&self, farewell: Option<&WireMessage>, codec: &CodecChain) {
        self.cancel.cancel();

        if let Some(bound) = self.socket.take().await {
            match farewell {
                Some(message) => bound.close_with(codec, message),
                None => bound.close(),
            }
        }

        let shell = std::mem::replace(&mut *self.shell.lock().await, ShellSlot::Empty);
        match shell {
            ShellSlot::Pending(mut shell) => shell.close().await,
            ShellSlot::Running(handle) => handle.shutdown().await,
            ShellSlot::Empty => {}
        }

        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }
}
