//! SSH side of the tunnel.
//!
//! The bridge never talks to an SSH library directly: it goes through the
//! [`SshConnector`], [`SshTransport`] and [`RemoteShell`] traits. The
//! production implementation lives in [`transport`] (russh); tests plug in
//! an in-memory shell.

pub mod bridge;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use async_trait::async_trait;

use crate::error::GatewayError;

pub use bridge::{BridgeSettings, ShellCommand, ShellHandle, SshBridge};
pub use transport::RusshConnector;

/// Port used when a connect request does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Terminal type requested for every PTY.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Validated connection target with credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Remote host name or address.
    pub hostname: String,
    /// Remote SSH port.
    pub port: u16,
    /// Login user.
    pub username: String,
    password: String,
}

impl SshTarget {
    /// Validates raw connect parameters.
    ///
    /// Blank values count as missing. A missing or zero port becomes
    /// [`DEFAULT_SSH_PORT`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] ("missing required fields")
    /// if hostname, username or password is absent.
    pub fn from_parts(
        hostname: Option<String>,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, GatewayError> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let (Some(hostname), Some(username), Some(password)) =
            (present(hostname), present(username), present(password))
        else {
            return Err(GatewayError::missing_fields());
        };
        Ok(Self {
            hostname: hostname.trim().to_string(),
            port: port.filter(|p| *p != 0).unwrap_or(DEFAULT_SSH_PORT),
            username,
            password,
        })
    }

    /// Returns the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// `user@host:port`, used in logs and responses.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Columns.
    pub cols: u32,
    /// Rows.
    pub rows: u32,
}

impl TerminalSize {
    /// Builds a size from signed wire dimensions; `None` unless both are
    /// positive.
    #[must_use]
    pub fn from_dimensions(cols: i32, rows: i32) -> Option<Self> {
        let cols = u32::try_from(cols).ok().filter(|c| *c > 0)?;
        let rows = u32::try_from(rows).ok().filter(|r| *r > 0)?;
        Some(Self { cols, rows })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Parameters of the pseudo-terminal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// `TERM` value announced to the remote host.
    pub term: String,
    /// Initial window size.
    pub size: TerminalSize,
    /// Whether the remote line discipline echoes input.
    pub echo: bool,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: DEFAULT_TERM.to_string(),
            size: TerminalSize::default(),
            echo: true,
        }
    }
}

/// Something observed on the remote shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// Bytes on standard output.
    Stdout(Vec<u8>),
    /// Bytes on standard error.
    Stderr(Vec<u8>),
    /// The remote side will send no more output.
    Eof,
    /// The remote command exited.
    Exit(u32),
}

/// An authenticated SSH connection with an opened (not yet started) shell
/// channel.
#[derive(Debug)]
pub struct SshConnection {
    /// Underlying SSH transport.
    pub transport: Box<dyn SshTransport>,
    /// Session channel that will host the interactive shell.
    pub shell: Box<dyn RemoteShell>,
}

/// Opens SSH connections.
#[async_trait]
pub trait SshConnector: Send + Sync + fmt::Debug {
    /// Dials, authenticates and opens a session channel.
    ///
    /// # Errors
    ///
    /// [`GatewayError::AuthenticationFailed`] when credentials are rejected,
    /// [`GatewayError::ConnectionFailed`] for network or handshake failures.
    async fn connect(&self, target: &SshTarget) -> Result<SshConnection, GatewayError>;
}

/// The SSH transport connection.
#[async_trait]
pub trait SshTransport: Send + Sync + fmt::Debug {
    /// Disconnects. Must be safe to call more than once.
    async fn close(&self);
}

/// One remote shell channel.
#[async_trait]
pub trait RemoteShell: Send + fmt::Debug {
    /// Requests a PTY and starts the interactive shell.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PtySetupFailed`] if the remote side refuses
    /// either request.
    async fn start(&mut self, pty: &PtyRequest) -> Result<(), GatewayError>;

    /// Waits for the next event. `None` once the channel is closed.
    async fn next_event(&mut self) -> Option<ShellEvent>;

    /// Writes bytes to the shell's standard input.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the channel is gone.
    async fn write(&mut self, data: &[u8]) -> Result<(), GatewayError>;

    /// Sends a window-change request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the channel is gone.
    async fn resize(&mut self, size: TerminalSize) -> Result<(), GatewayError>;

    /// Closes the channel.
    async fn close(&mut self);
}
