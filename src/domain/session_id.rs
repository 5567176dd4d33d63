//! Type-safe, unguessable session identifier.
//!
//! [`SessionId`] wraps 128 random bits drawn from the thread-local CSPRNG
//! and renders them as 32 lowercase hex characters. The identifier is the
//! only credential needed to bind a WebSocket to a session, so it is never
//! derived from anything predictable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length of the hex-encoded identifier.
pub const SESSION_ID_LEN: usize = 32;

/// Unique identifier for a live remote-shell session.
///
/// Generated once when the SSH connection is authenticated and used as the
/// key in [`super::SessionRegistry`] and in the `/ws/ssh/{id}` path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SessionId(u128);

impl SessionId {
    /// Creates a new random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// Full identifiers are credentials; keep them out of debug dumps.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_string();
        write!(f, "SessionId({}…)", hex.get(..8).unwrap_or_default())
    }
}

/// Error returned when a string is not a well-formed session identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed session id")]
pub struct ParseSessionIdError;

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != SESSION_ID_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseSessionIdError);
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ParseSessionIdError)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ParseSessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}
