//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).
//!
//! | Variable | Default |
//! |---|---|
//! | `LISTEN_ADDR` | `0.0.0.0:3000` |
//! | `SSH_CONNECT_TIMEOUT_SECS` | `30` |
//! | `SESSION_IDLE_TIMEOUT_SECS` | `600` (`0` disables) |
//! | `SESSION_IDLE_POLICY` | `fixed` (or `renew`) |
//! | `SHELL_QUEUE_CAPACITY` | `256` |
//! | `SOCKET_QUEUE_CAPACITY` | `512` |
//! | `REQUEST_TIMEOUT_SECS` | `60` |
//! | `LOG_FORMAT` | `text` (or `json`) |

use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::{IdlePolicy, IdleSettings};
use crate::ssh::{BridgeSettings, PtyRequest};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Upper bound on TCP connect plus SSH handshake plus authentication.
    pub ssh_connect_timeout_secs: u64,

    /// Idle timeout of a session in seconds (0 = never expire).
    pub session_idle_timeout_secs: u64,

    /// How the idle deadline is measured.
    pub session_idle_policy: IdlePolicy,

    /// Frames buffered per direction between a shell driver and its pumps.
    pub shell_queue_capacity: usize,

    /// Outbound frames buffered per WebSocket.
    pub socket_queue_capacity: usize,

    /// Timeout for plain HTTP requests.
    pub request_timeout_secs: u64,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ssh_connect_timeout_secs: 30,
            session_idle_timeout_secs: 600,
            session_idle_policy: IdlePolicy::Fixed,
            shell_queue_capacity: 256,
            socket_queue_capacity: 512,
            request_timeout_secs: 60,
            log_format: LogFormat::Text,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set or
    /// cannot be parsed. Calls `dotenvy::dotenv().ok()` to optionally load a
    /// `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.listen_addr,
        };

        Ok(Self {
            listen_addr,
            ssh_connect_timeout_secs: parse_env(
                "SSH_CONNECT_TIMEOUT_SECS",
                defaults.ssh_connect_timeout_secs,
            ),
            session_idle_timeout_secs: parse_env(
                "SESSION_IDLE_TIMEOUT_SECS",
                defaults.session_idle_timeout_secs,
            ),
            session_idle_policy: parse_env("SESSION_IDLE_POLICY", defaults.session_idle_policy),
            shell_queue_capacity: parse_capacity(
                "SHELL_QUEUE_CAPACITY",
                defaults.shell_queue_capacity,
            ),
            socket_queue_capacity: parse_capacity(
                "SOCKET_QUEUE_CAPACITY",
                defaults.socket_queue_capacity,
            ),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            log_format: parse_env("LOG_FORMAT", defaults.log_format),
        })
    }

    /// Idle settings for the session registry.
    #[must_use]
    pub const fn idle_settings(&self) -> IdleSettings {
        IdleSettings {
            timeout: if self.session_idle_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(self.session_idle_timeout_secs))
            },
            policy: self.session_idle_policy,
        }
    }

    /// Settings for the SSH bridge.
    #[must_use]
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
            shell_queue_capacity: self.shell_queue_capacity,
            pty: PtyRequest::default(),
        }
    }

    /// HTTP request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like [`parse_env`], but a zero capacity also falls back to `default`
/// since bounded channels need at least one slot.
fn parse_capacity(key: &str, default: usize) -> usize {
    match parse_env(key, default) {
        0 => default,
        n => n,
    }
}
