//! Connection state of a [`super::TerminalClient`].

use std::fmt;

/// Lifecycle of the client's single session.
///
/// ```text
/// Disconnected ─connect─▶ Connecting ─ws open─▶ Connected
///       ▲                     │                    │
///       │                control failure      read failure /
///       │                     ▼                 error message
///       └──────────────────  Error  ◀──────────────┘
/// ```
///
/// After a read failure the state passes through `Error` and settles on
/// `Disconnected`; after a failed control request it stays on `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Control request or WebSocket dial in flight.
    Connecting,
    /// WebSocket open; input and resize are accepted.
    Connected,
    /// The last attempt or the live connection failed.
    Error,
}

impl ConnectionState {
    /// Returns `true` if a new connect may start from this state.
    #[must_use]
    pub const fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
