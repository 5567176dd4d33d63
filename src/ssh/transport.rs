//! russh-backed implementation of the SSH traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use russh_keys::key::PublicKey;

use super::{
    PtyRequest, RemoteShell, ShellEvent, SshConnection, SshConnector, SshTarget, SshTransport,
    TerminalSize,
};
use crate::error::GatewayError;

/// Extended-data stream number of standard error.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Client handler. The tunnel's users have no known_hosts file to check
/// against, so every host key is accepted and only logged.
#[derive(Debug, Default)]
struct TunnelHandler;

#[async_trait]
impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        tracing::debug!(algorithm = server_public_key.name(), "accepting host key");
        Ok(true)
    }
}

/// Connector that dials real hosts with russh and password authentication.
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    /// Creates a connector with russh's default client configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RusshConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RusshConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<SshConnection, GatewayError> {
        let addr = (target.hostname.as_str(), target.port);
        let mut handle = client::connect(Arc::clone(&self.config), addr, TunnelHandler)
            .await
            .map_err(|e| GatewayError::ConnectionFailed(format!("{}: {e}", target.label())))?;

        let accepted = handle
            .authenticate_password(target.username.as_str(), target.password())
            .await
            .map_err(|e| GatewayError::ConnectionFailed(format!("{}: {e}", target.label())))?;
        if !accepted {
            return Err(GatewayError::AuthenticationFailed(target.label()));
        }

        let channel = match handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
                return Err(GatewayError::ConnectionFailed(format!(
                    "{}: cannot open session channel: {e}",
                    target.label()
                )));
            }
        };

        Ok(SshConnection {
            transport: Box::new(RusshTransport { handle }),
            shell: Box::new(RusshShell { channel }),
        })
    }
}

/// An authenticated russh client connection.
struct RusshTransport {
    handle: Handle<TunnelHandler>,
}

impl fmt::Debug for RusshTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RusshTransport")
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

#[async_trait]
impl SshTransport for RusshTransport {
    async fn close(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            tracing::debug!(error = %e, "ssh disconnect failed");
        }
    }
}

/// A russh session channel.
struct RusshShell {
    channel: Channel<Msg>,
}

impl fmt::Debug for RusshShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RusshShell")
            .field("channel", &self.channel.id())
            .finish()
    }
}

impl RusshShell {
    /// Waits for the reply to a `want_reply` channel request.
    async fn await_reply(&mut self, request: &str) -> Result<(), GatewayError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(GatewayError::PtySetupFailed(format!("{request} request refused")));
                }
                Some(ChannelMsg::Close) | None => {
                    return Err(GatewayError::PtySetupFailed(format!(
                        "channel closed during {request} request"
                    )));
                }
                Some(_) => {}
            }
        }
    }
}

#[async_trait]
impl RemoteShell for RusshShell {
    async fn start(&mut self, pty: &PtyRequest) -> Result<(), GatewayError> {
        let modes = [(Pty::ECHO, u32::from(pty.echo))];
        self.channel
            .request_pty(true, &pty.term, pty.size.cols, pty.size.rows, 0, 0, &modes)
            .await
            .map_err(|e| GatewayError::PtySetupFailed(e.to_string()))?;
        self.await_reply("pty").await?;

        self.channel
            .request_shell(true)
            .await
            .map_err(|e| GatewayError::PtySetupFailed(e.to_string()))?;
        self.await_reply("shell").await
    }

    async fn next_event(&mut self) -> Option<ShellEvent> {
        loop {
            match self.channel.wait().await? {
                ChannelMsg::Data { data } => return Some(ShellEvent::Stdout(data.to_vec())),
                ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    return Some(ShellEvent::Stderr(data.to_vec()));
                }
                ChannelMsg::Eof => return Some(ShellEvent::Eof),
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(ShellEvent::Exit(exit_status));
                }
                ChannelMsg::Close => return None,
                _ => {}
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), GatewayError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| GatewayError::Transport(format!("shell write failed: {e}")))
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), GatewayError> {
        self.channel
            .window_change(size.cols, size.rows, 0, 0)
            .await
            .map_err(|e| GatewayError::Transport(format!("window change failed: {e}")))
    }

    async fn close(&mut self) {
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
    }
}
