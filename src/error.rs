//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.
//! Setup-time failures (connect, bind) reach the caller synchronously through
//! this type; steady-state failures are reported over the WebSocket instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::SessionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: missing required fields",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                 |
/// |-----------|-------------------|-----------------------------|
/// | 1000–1999 | Validation        | 400 Bad Request             |
/// | 2000–2999 | Session           | 404 Not Found               |
/// | 3000–3999 | Server / Stream   | 500 Internal Server Error   |
/// | 4000–4999 | Remote host       | 401 Unauthorized / 502      |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Connect parameters missing or malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote host rejected the supplied credentials.
    #[error("authentication failed for {0}")]
    AuthenticationFailed(String),

    /// The remote host could not be reached or the SSH handshake failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The pseudo-terminal or remote shell could not be started.
    #[error("pty setup failed: {0}")]
    PtySetupFailed(String),

    /// No live session with the given identifier.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// An inbound wire message could not be decoded.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Read or write failure on an established SSH or WebSocket stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Builds the [`GatewayError::InvalidRequest`] used when hostname,
    /// username or password is absent.
    #[must_use]
    pub fn missing_fields() -> Self {
        Self::InvalidRequest("missing required fields".to_string())
    }

    /// Builds a [`GatewayError::SessionNotFound`] for the given identifier.
    #[must_use]
    pub fn session_not_found(id: &SessionId) -> Self {
        Self::SessionNotFound(id.to_string())
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::ProtocolDecode(_) => 1002,
            Self::SessionNotFound(_) => 2001,
            Self::Internal(_) => 3000,
            Self::PtySetupFailed(_) => 3001,
            Self::Transport(_) => 3002,
            Self::AuthenticationFailed(_) => 4001,
            Self::ConnectionFailed(_) => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::ProtocolDecode(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::ConnectionFailed(_) => StatusCode::BAD_GATEWAY,
            Self::PtySetupFailed(_) | Self::Transport(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
