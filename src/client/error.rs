//! Client-side error type.

use tokio_tungstenite::tungstenite;

use super::ConnectionState;
use crate::protocol::CodecError;

/// Errors returned by [`super::TerminalClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Input or resize while no WebSocket is open.
    #[error("not connected")]
    NotConnected,

    /// `connect` called while a connection is in flight or open.
    #[error("cannot connect while {0}")]
    InvalidState(ConnectionState),

    /// The control request could not be sent or its body not read.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered the control request with an error.
    #[error("connect rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message from the gateway's error body.
        message: String,
    },

    /// Dialing, reading or writing the WebSocket failed.
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// A message could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(#[from] CodecError),

    /// The gateway URL cannot be used.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The bearer token is not a valid header value.
    #[error("invalid bearer token")]
    InvalidToken,
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
