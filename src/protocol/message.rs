//! Wire message schema shared by the gateway and the terminal client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminator carried in the `type` field of every [`WireMessage`].
///
/// Unknown discriminators are kept verbatim in [`MessageKind::Other`] so a
/// newer peer never makes the decoder fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Client → server keystrokes for the remote shell.
    Input,
    /// Client → server terminal size change.
    Resize,
    /// Server → client remote shell bytes.
    Output,
    /// Human-readable state message.
    Status,
    /// Failure description.
    Error,
    /// Any discriminator this build does not know.
    Other(String),
}

impl MessageKind {
    /// Returns the wire spelling of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Input => "input",
            Self::Resize => "resize",
            Self::Output => "output",
            Self::Status => "status",
            Self::Error => "error",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "input" => Self::Input,
            "resize" => Self::Resize,
            "output" => Self::Output,
            "status" => Self::Status,
            "error" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit exchanged over the WebSocket.
///
/// Fields that do not apply to a message's type are omitted on the wire.
/// `cols`/`rows` stay optional so that an explicit zero is distinguishable
/// from an absent dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Terminal bytes for `input` / `output`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Column count for `resize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<i32>,
    /// Row count for `resize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<i32>,
    /// Text for `status` / `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WireMessage {
    fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            data: None,
            cols: None,
            rows: None,
            message: None,
        }
    }

    /// Builds an `input` message.
    #[must_use]
    pub fn input(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::bare(MessageKind::Input)
        }
    }

    /// Builds an `output` message.
    #[must_use]
    pub fn output(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::bare(MessageKind::Output)
        }
    }

    /// Builds a `resize` message.
    #[must_use]
    pub fn resize(cols: i32, rows: i32) -> Self {
        Self {
            cols: Some(cols),
            rows: Some(rows),
            ..Self::bare(MessageKind::Resize)
        }
    }

    /// Builds a `status` message.
    #[must_use]
    pub fn status(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(MessageKind::Status)
        }
    }

    /// Builds an `error` message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(MessageKind::Error)
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn to_json(msg: &WireMessage) -> serde_json::Value {
        let Ok(value) = serde_json::to_value(msg) else {
            panic!("serialization failed");
        };
        value
    }

    #[test]
    fn input_omits_unrelated_fields() {
        let json = to_json(&WireMessage::input("ls\n"));
        assert_eq!(json, serde_json::json!({"type": "input", "data": "ls\n"}));
    }

    #[test]
    fn resize_keeps_explicit_zero() {
        let json = to_json(&WireMessage::resize(0, 24));
        assert_eq!(json, serde_json::json!({"type": "resize", "cols": 0, "rows": 24}));
    }

    #[test]
    fn unknown_type_is_preserved() {
        let Ok(msg) = serde_json::from_str::<WireMessage>(r#"{"type":"bell","data":"x"}"#) else {
            panic!("unknown type must still decode");
        };
        assert_eq!(msg.kind, MessageKind::Other("bell".to_string()));
        assert_eq!(to_json(&msg)["type"], "bell");
    }
}
