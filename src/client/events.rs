//! Host-facing collaborators of the client: notifications and credentials.

use tokio::sync::mpsc;

/// Notification delivered to the hosting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The WebSocket is open.
    Connected {
        /// Session identifier assigned by the gateway.
        session_id: String,
    },
    /// The connection ended.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// Terminal output.
    Output {
        /// Text to render.
        data: String,
    },
    /// A failure reported by the gateway or seen locally.
    Error {
        /// Description.
        message: String,
    },
    /// Informational status from the gateway.
    Status {
        /// Description.
        message: String,
    },
}

impl ClientEvent {
    /// Event name as exposed to hosts that dispatch by string.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Output { .. } => "output",
            Self::Error { .. } => "error",
            Self::Status { .. } => "status",
        }
    }
}

/// Receiver of [`ClientEvent`]s. Must not block.
pub trait NotificationSink: Send + Sync {
    /// Delivers one event.
    fn notify(&self, event: ClientEvent);
}

impl NotificationSink for mpsc::UnboundedSender<ClientEvent> {
    fn notify(&self, event: ClientEvent) {
        if self.send(event).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

/// Sink that only logs events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: ClientEvent) {
        tracing::debug!(event = event.name(), ?event, "terminal client event");
    }
}

/// Source of the bearer token sent with every outbound request.
pub trait TokenProvider: Send + Sync {
    /// Current token, or `None` to send no `Authorization` header.
    fn bearer_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// Fixed token, or none at all.
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Always returns `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Never sends a token.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken")
            .field(&self.0.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_sender_is_a_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.notify(ClientEvent::Status {
            message: "shell ready".into(),
        });
        let Ok(event) = rx.try_recv() else {
            panic!("event expected");
        };
        assert_eq!(event.name(), "status");
    }

    #[test]
    fn closures_provide_tokens() {
        let provider = || Some("abc".to_string());
        assert_eq!(provider.bearer_token().as_deref(), Some("abc"));
        assert_eq!(StaticToken::none().bearer_token(), None);
    }

    #[test]
    fn static_token_debug_is_redacted() {
        assert!(!format!("{:?}", StaticToken::new("hunter2")).contains("hunter2"));
    }
}
