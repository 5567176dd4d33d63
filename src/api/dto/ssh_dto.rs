//! DTOs for the SSH session endpoints.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for `POST /api/v1/ssh/connect`.
///
/// Every field is optional at the JSON level so that a missing field is
/// reported as "missing required fields" rather than a deserialization
/// error.
#[derive(Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConnectRequest {
    /// Remote host name or address.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Remote SSH port; 22 when absent.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login name.
    #[serde(default)]
    pub username: Option<String>,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
}

impl ConnectRequest {
    /// Password login on the default port.
    #[must_use]
    pub fn password_login(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: Some(hostname.into()),
            port: None,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Sets the SSH port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Response body of a successful connect.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectResponse {
    /// 32-character lowercase hex session identifier.
    pub session_id: String,
    /// Always `"connected"`.
    pub status: String,
    /// `user@host:port` of the remote end.
    pub target: String,
    /// Session creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Response body of `GET /api/v1/ssh/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionCountResponse {
    /// Number of live sessions.
    pub count: usize,
}
