//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::SessionRegistry;
use crate::ssh::SshBridge;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry of live sessions.
    pub registry: Arc<SessionRegistry>,
    /// SSH dialing and shell relay.
    pub bridge: Arc<SshBridge>,
    /// Outbound frames buffered per WebSocket.
    pub socket_queue_capacity: usize,
}

impl AppState {
    /// Default capacity of a WebSocket's outbound queue.
    pub const DEFAULT_SOCKET_QUEUE_CAPACITY: usize = 512;

    /// Bundles the registry and bridge with the default socket queue size.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, bridge: Arc<SshBridge>) -> Self {
        Self {
            registry,
            bridge,
            socket_queue_capacity: Self::DEFAULT_SOCKET_QUEUE_CAPACITY,
        }
    }

    /// Overrides the outbound queue capacity of each WebSocket.
    #[must_use]
    pub fn with_socket_queue_capacity(mut self, capacity: usize) -> Self {
        self.socket_queue_capacity = capacity.max(1);
        self
    }
}
