//! Concurrent session storage with idle-timeout scheduling.
//!
//! [`SessionRegistry`] maps [`SessionId`]s to live [`Session`]s. The map is
//! guarded by one [`tokio::sync::RwLock`]; everything inside a session has
//! its own lock, so traffic on one session never serializes on another.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;

use super::{Session, SessionId, SocketSender};
use crate::error::GatewayError;
use crate::protocol::{CodecChain, WireMessage};
use crate::ssh::SshConnection;

/// When the idle deadline of a session is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// From creation; activity never extends the session.
    #[default]
    Fixed,
    /// From the latest input or output.
    RenewOnActivity,
}

impl std::str::FromStr for IdlePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "renew" | "renew_on_activity" => Ok(Self::RenewOnActivity),
            other => Err(format!("unknown idle policy {other:?}")),
        }
    }
}

/// Idle-timeout configuration applied to every new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleSettings {
    /// Idle duration after which a session is cleaned up; `None` disables
    /// the timer.
    pub timeout: Option<Duration>,
    /// Deadline policy.
    pub policy: IdlePolicy,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(600)),
            policy: IdlePolicy::Fixed,
        }
    }
}

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    /// Explicit disconnect request.
    Disconnect,
    /// The bound WebSocket closed or failed.
    SocketClosed,
    /// The idle timer fired.
    IdleTimeout,
    /// The process is shutting down.
    Shutdown,
}

impl CleanupReason {
    /// Short name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::SocketClosed => "socket_closed",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
        }
    }

    /// Last message sent on a still-bound socket before it is closed.
    #[must_use]
    pub fn farewell(self) -> Option<WireMessage> {
        match self {
            Self::IdleTimeout => Some(WireMessage::error("session expired after idle timeout")),
            Self::Disconnect | Self::Shutdown => Some(WireMessage::status("session closed")),
            Self::SocketClosed => None,
        }
    }
}

impl fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Central store for all live sessions.
///
/// # Concurrency
///
/// - Insert, lookup and removal are atomic with respect to each other; a
///   session is inserted fully constructed.
/// - Removal happens before any resource is closed, so concurrent cleanups
///   of the same id race only on the map: exactly one of them wins and
///   performs the teardown.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    idle: IdleSettings,
    codec: CodecChain,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("idle", &self.idle)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(idle: IdleSettings, codec: CodecChain) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle,
            codec,
        }
    }

    /// Idle settings applied to new sessions.
    #[must_use]
    pub const fn idle_settings(&self) -> IdleSettings {
        self.idle
    }

    /// Registers an authenticated connection under a fresh identifier and
    /// schedules its idle timer.
    pub async fn create(self: &Arc<Self>, target: String, connection: SshConnection) -> Arc<Session> {
        let session = {
            let mut map = self.sessions.write().await;
            let mut id = SessionId::generate();
            while map.contains_key(&id) {
                id = SessionId::generate();
            }
            let session = Arc::new(Session::new(id, target, connection));
            map.insert(id, Arc::clone(&session));
            session
        };

        if let Some(timeout) = self.idle.timeout {
            tokio::spawn(watch_idle(
                Arc::downgrade(self),
                Arc::clone(&session),
                timeout,
                self.idle.policy,
            ));
        }

        tracing::info!(session_id = %session.id(), ssh_target = session.target(), "session created");
        session
    }

    /// Looks up a live session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SessionNotFound`] for unknown or removed ids.
    pub async fn get(&self, id: &SessionId) -> Result<Arc<Session>, GatewayError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::session_not_found(id))
    }

    /// Returns `true` if `id` names a live session.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Binds a socket writer to a session, closing any socket bound before.
    /// Returns the session and the new binding generation.
    ///
    /// The swap happens under the map's read lock, so it is ordered against
    /// every removal: a session is never bound after it left the map.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SessionNotFound`] for unknown or removed ids;
    /// nothing is bound in that case.
    pub async fn bind(
        &self,
        id: &SessionId,
        socket: SocketSender,
    ) -> Result<(Arc<Session>, u64), GatewayError> {
        let (session, generation, previous) = {
            let map = self.sessions.read().await;
            let session = map
                .get(id)
                .cloned()
                .ok_or_else(|| GatewayError::session_not_found(id))?;
            let (generation, previous) = session.socket().swap(socket).await;
            (session, generation, previous)
        };
        if let Some(previous) = previous {
            tracing::info!(session_id = %id, replaced = previous.generation(), "socket rebound");
            previous.close();
        }
        Ok((session, generation))
    }

    /// Tears a session down: cancels its tasks and closes socket, shell and
    /// transport. Idempotent; returns `true` only for the call that actually
    /// removed the session.
    pub async fn cleanup(&self, id: &SessionId, reason: CleanupReason) -> bool {
        let removed = self.sessions.write().await.remove(id);
        let Some(session) = removed else {
            tracing::debug!(session_id = %id, %reason, "cleanup of absent session ignored");
            return false;
        };
        self.tear_down(&session, reason).await;
        true
    }

    /// Cleans up on behalf of a socket binding, unless that binding has been
    /// superseded by a newer one. The generation check and the removal happen
    /// under one write lock, so a concurrent [`Self::bind`] either lands
    /// first and wins, or finds the session gone.
    pub async fn release_binding(&self, id: &SessionId, generation: u64) -> bool {
        let removed = {
            let mut map = self.sessions.write().await;
            let Some(session) = map.get(id) else {
                return false;
            };
            if !session.socket().may_release(generation).await {
                tracing::debug!(session_id = %id, generation, "superseded socket closed");
                return false;
            }
            map.remove(id)
        };
        match removed {
            Some(session) => {
                self.tear_down(&session, CleanupReason::SocketClosed).await;
                true
            }
            None => false,
        }
    }

    async fn tear_down(&self, session: &Session, reason: CleanupReason) {
        let farewell = reason.farewell();
        session.close(farewell.as_ref(), &self.codec).await;
        tracing::info!(session_id = %session.id(), %reason, "session cleaned up");
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cleans up every live session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().copied().collect();
        tracing::info!(sessions = ids.len(), "closing all sessions");
        for id in ids {
            self.cleanup(&id, CleanupReason::Shutdown).await;
        }
    }
}

/// Fires cleanup once the session has been idle for `timeout`, unless the
/// session is cancelled first.
async fn watch_idle(
    registry: Weak<SessionRegistry>,
    session: Arc<Session>,
    timeout: Duration,
    policy: IdlePolicy,
) {
    let id = session.id();
    let cancel = session.cancel_token().clone();
    let activity = Arc::clone(session.activity());
    drop(session);

    loop {
        let base = match policy {
            IdlePolicy::Fixed => activity.created(),
            IdlePolicy::RenewOnActivity => activity.last_activity(),
        };
        let deadline = base + timeout;
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep_until(deadline) => {}
        }
        if policy == IdlePolicy::RenewOnActivity && activity.last_activity() + timeout > deadline {
            continue;
        }
        break;
    }

    if let Some(registry) = registry.upgrade() {
        tracing::info!(session_id = %id, timeout_secs = timeout.as_secs(), "session idle timeout");
        registry.cleanup(&id, CleanupReason::IdleTimeout).await;
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{SocketCommand, socket_channel};
    use crate::protocol::MessageKind;
    use crate::ssh::fake::fake_connection;

    fn registry(idle: IdleSettings) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(idle, CodecChain::default()))
    }

    fn no_timer() -> IdleSettings {
        IdleSettings {
            timeout: None,
            policy: IdlePolicy::Fixed,
        }
    }

    #[tokio::test]
    async fn create_registers_fresh_ids() {
        let registry = registry(no_timer());
        let a = registry.create("a".into(), fake_connection().0).await.id();
        let b = registry.create("b".into(), fake_connection().0).await.id();
        assert_ne!(a, b);
        assert_eq!(registry.count().await, 2);
        assert!(registry.contains(&a).await);
        tokio_test::assert_ok!(registry.get(&b).await);
    }

    #[tokio::test]
    async fn bind_unknown_id_is_not_found() {
        let registry = registry(no_timer());
        let (tx, _queue) = socket_channel(1);
        let result = registry.bind(&SessionId::generate(), tx).await;
        assert!(matches!(result, Err(GatewayError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn rebind_closes_previous_socket() {
        let registry = registry(no_timer());
        let id = registry.create("t".into(), fake_connection().0).await.id();
        let (tx1, queue1) = socket_channel(4);
        let (tx2, queue2) = socket_channel(4);
        let Ok((_, first)) = registry.bind(&id, tx1).await else {
            panic!("first bind failed");
        };
        let Ok((session, second)) = registry.bind(&id, tx2).await else {
            panic!("second bind failed");
        };
        assert!(queue1.close_signal().is_cancelled());
        assert!(!queue2.close_signal().is_cancelled());
        assert!(session.socket().is_current(second).await);

        // the superseded socket's loop must not take the session down
        assert!(!registry.release_binding(&id, first).await);
        assert!(registry.contains(&id).await);
        assert!(registry.release_binding(&id, second).await);
        assert!(!registry.contains(&id).await);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_final() {
        let registry = registry(no_timer());
        let (conn, probe) = fake_connection();
        let id = registry.create("t".into(), conn).await.id();

        assert!(registry.cleanup(&id, CleanupReason::Disconnect).await);
        assert!(probe.shell_closed());
        assert!(probe.transport_closed());
        assert!(!registry.cleanup(&id, CleanupReason::Disconnect).await);

        let (tx, _queue) = socket_channel(1);
        let result = registry.bind(&id, tx).await;
        assert!(matches!(result, Err(GatewayError::SessionNotFound(_))));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_cleanups_tear_down_once() {
        let registry = registry(no_timer());
        let id = registry.create("t".into(), fake_connection().0).await.id();

        let (a, b, c) = tokio::join!(
            registry.cleanup(&id, CleanupReason::Disconnect),
            registry.cleanup(&id, CleanupReason::SocketClosed),
            registry.cleanup(&id, CleanupReason::IdleTimeout),
        );
        assert_eq!([a, b, c].iter().filter(|won| **won).count(), 1);
    }

    #[tokio::test]
    async fn disconnect_sends_status_before_close() {
        let registry = registry(no_timer());
        let id = registry.create("t".into(), fake_connection().0).await.id();
        let (tx, mut queue) = socket_channel(4);
        tokio_test::assert_ok!(registry.bind(&id, tx).await);

        registry.cleanup(&id, CleanupReason::Disconnect).await;
        let Some(SocketCommand::Send(frame)) = queue.recv().await else {
            panic!("expected farewell frame");
        };
        let Ok(msg) = CodecChain::default().decode(&frame) else {
            panic!("farewell must decode");
        };
        assert_eq!(msg.kind, MessageKind::Status);
        assert_eq!(queue.recv().await, Some(SocketCommand::Close));
    }

    #[tokio::test]
    async fn rebind_does_not_wait_for_stalled_socket() {
        let registry = registry(no_timer());
        let id = registry.create("t".into(), fake_connection().0).await.id();
        let (stalled, stalled_queue) = socket_channel(1);
        let Ok((session, _)) = registry.bind(&id, stalled).await else {
            panic!("first bind failed");
        };
        let codec = CodecChain::default();
        tokio_test::assert_ok!(session.socket().send(&codec, &WireMessage::output("x")).await);

        let (fresh, fresh_queue) = socket_channel(4);
        let rebound = tokio::time::timeout(Duration::from_secs(1), registry.bind(&id, fresh)).await;
        assert!(matches!(rebound, Ok(Ok(_))));
        assert!(stalled_queue.close_signal().is_cancelled());
        assert!(!fresh_queue.close_signal().is_cancelled());
    }

    #[tokio::test]
    async fn release_and_rebind_race_never_strands_new_socket() {
        let registry = registry(no_timer());
        for _ in 0..50 {
            let id = registry.create("t".into(), fake_connection().0).await.id();
            let (old, _old_queue) = socket_channel(4);
            let Ok((_, generation)) = registry.bind(&id, old).await else {
                panic!("first bind failed");
            };

            let (new, new_queue) = socket_channel(4);
            let (released, rebound) =
                tokio::join!(registry.release_binding(&id, generation), registry.bind(&id, new));

            // exactly one side wins: either the session is gone and the
            // bind failed, or the new socket owns a live session
            assert_ne!(released, rebound.is_ok());
            assert_eq!(registry.contains(&id).await, rebound.is_ok());
            if rebound.is_ok() {
                assert!(!new_queue.close_signal().is_cancelled());
            }
            registry.cleanup(&id, CleanupReason::Shutdown).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_idle_timer_removes_session() {
        let registry = registry(IdleSettings {
            timeout: Some(Duration::from_secs(600)),
            policy: IdlePolicy::Fixed,
        });
        let (conn, probe) = fake_connection();
        let id = registry.create("t".into(), conn).await.id();

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert!(registry.contains(&id).await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!registry.contains(&id).await);
        assert!(probe.transport_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_policy_ignores_activity() {
        let registry = registry(IdleSettings::default());
        let id = registry.create("t".into(), fake_connection().0).await.id();
        let Ok(session) = registry.get(&id).await else {
            panic!("session expected");
        };

        tokio::time::sleep(Duration::from_secs(590)).await;
        session.activity().touch();
        drop(session);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!registry.contains(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn renew_policy_extends_active_sessions() {
        let registry = registry(IdleSettings {
            timeout: Some(Duration::from_secs(60)),
            policy: IdlePolicy::RenewOnActivity,
        });
        let id = registry.create("t".into(), fake_connection().0).await.id();
        let Ok(session) = registry.get(&id).await else {
            panic!("session expected");
        };

        tokio::time::sleep(Duration::from_secs(50)).await;
        session.activity().touch();
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(registry.contains(&id).await);

        drop(session);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(!registry.contains(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cleanup_cancels_timer() {
        let registry = registry(IdleSettings::default());
        let id = registry.create("t".into(), fake_connection().0).await.id();
        assert!(registry.cleanup(&id, CleanupReason::Disconnect).await);
        tokio::time::sleep(Duration::from_secs(700)).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_clears_everything() {
        let registry = registry(no_timer());
        for _ in 0..3 {
            registry.create("t".into(), fake_connection().0).await;
        }
        registry.shutdown().await;
        assert_eq!(registry.count().await, 0);
    }

    #[test]
    fn idle_policy_parses() {
        assert_eq!("fixed".parse::<IdlePolicy>(), Ok(IdlePolicy::Fixed));
        assert_eq!("Renew".parse::<IdlePolicy>(), Ok(IdlePolicy::RenewOnActivity));
        assert!("sometimes".parse::<IdlePolicy>().is_err());
    }
}
