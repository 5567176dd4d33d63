//! # ssh-tunnel-gateway
//!
//! Browser-reachable remote terminals: an HTTP control endpoint opens an SSH
//! session with password authentication, and a WebSocket endpoint streams
//! that session's interactive shell as typed wire messages.
//!
//! ## Architecture
//!
//! ```text
//! TerminalClient (client/)            Browser / other clients
//!     │ POST /api/v1/ssh/connect          │
//!     │ GET  /ws/ssh/{id}                 │
//!     ├───────────────────────────────────┤
//!     ├── REST Handlers (api/)
//!     ├── WS Gateway (ws/)
//!     │
//!     ├── SessionRegistry (domain/)  ── idle watcher per session
//!     ├── SshBridge (ssh/)           ── shell driver + stdout/stderr pumps
//!     │
//!     └── russh client ──▶ remote sshd
//! ```
//!
//! Wire messages (`protocol/`) are MessagePack maps by default, with JSON as
//! the fallback encoding.

pub mod api;
pub mod app_state;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod ssh;
pub mod ws;
