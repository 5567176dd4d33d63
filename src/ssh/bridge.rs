//! Per-session SSH bridge: opens the transport, starts the PTY shell and
//! relays bytes between the remote shell and the bound WebSocket.
//!
//! Once the shell is started, three tasks serve the session:
//!
//! ```text
//!                 ┌──────────── stdout queue ──▶ pump ──┐
//! remote shell ◀─▶ driver                               ├──▶ SocketSlot
//!                 └──────────── stderr queue ──▶ pump ──┘
//!        ▲
//!        └──── command queue (input, resize) ◀── SshBridge::write / resize
//! ```
//!
//! The driver is the only owner of the shell channel. All queues are bounded
//! by [`BridgeSettings::shell_queue_capacity`]; a full queue blocks its
//! producer, which pushes backpressure into the SSH channel window instead of
//! buffering without limit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{PtyRequest, RemoteShell, ShellEvent, SshConnection, SshConnector, SshTarget, TerminalSize};
use crate::domain::session::ActivityClock;
use crate::domain::{Session, SessionId, SocketSlot};
use crate::error::GatewayError;
use crate::protocol::{CodecChain, WireMessage};

/// Maximum payload of one `output` message.
pub const OUTPUT_CHUNK_SIZE: usize = 4096;

/// How long teardown waits for the shell driver to close the channel.
const DRIVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tunables of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Upper bound for dialing and authenticating.
    pub connect_timeout: Duration,
    /// Capacity of each per-session shell queue (commands, stdout, stderr).
    pub shell_queue_capacity: usize,
    /// PTY requested for every shell.
    pub pty: PtyRequest,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            shell_queue_capacity: 256,
            pty: PtyRequest::default(),
        }
    }
}

/// Work item for the shell driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Bytes for the shell's standard input.
    Input(Vec<u8>),
    /// New window size.
    Resize(TerminalSize),
}

/// Handle to a running shell: its command queue and its tasks.
#[derive(Debug)]
pub struct ShellHandle {
    commands: mpsc::Sender<ShellCommand>,
    driver: JoinHandle<()>,
    pumps: Vec<JoinHandle<()>>,
}

impl ShellHandle {
    /// Returns a sender for the driver's command queue.
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<ShellCommand> {
        self.commands.clone()
    }

    /// Stops the shell. The session's cancellation token must already be
    /// triggered; this waits for the driver to close the channel.
    pub async fn shutdown(self) {
        drop(self.commands);
        let abort = self.driver.abort_handle();
        if tokio::time::timeout(DRIVER_SHUTDOWN_GRACE, self.driver).await.is_err() {
            tracing::warn!("shell driver did not stop in time, aborting");
            abort.abort();
        }
        for pump in self.pumps {
            pump.abort();
        }
    }
}

/// Which remote stream a pump relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Opens SSH shells and relays their traffic.
#[derive(Debug, Clone)]
pub struct SshBridge {
    connector: Arc<dyn SshConnector>,
    settings: BridgeSettings,
    codec: CodecChain,
}

impl SshBridge {
    /// Creates a bridge over the given connector.
    #[must_use]
    pub fn new(connector: Arc<dyn SshConnector>, settings: BridgeSettings, codec: CodecChain) -> Self {
        Self {
            connector,
            settings,
            codec,
        }
    }

    /// Returns the bridge settings.
    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Returns the codec used for outbound messages.
    #[must_use]
    pub fn codec(&self) -> &CodecChain {
        &self.codec
    }

    /// Dials and authenticates within [`BridgeSettings::connect_timeout`].
    ///
    /// # Errors
    ///
    /// [`GatewayError::AuthenticationFailed`] for rejected credentials,
    /// [`GatewayError::ConnectionFailed`] for network failures and timeouts.
    pub async fn connect(&self, target: &SshTarget) -> Result<SshConnection, GatewayError> {
        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.connect(target)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::ConnectionFailed(format!(
                "{}: timed out after {}s",
                target.label(),
                timeout.as_secs()
            ))),
        }
    }

    /// Requests the PTY, starts the shell and begins streaming its output
    /// to the session's bound socket.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PtySetupFailed`] if the shell was already
    /// started, was closed, or the remote side refused the requests. The
    /// transport stays open; closing it is the session's cleanup job.
    pub async fn allocate_pty(&self, session: &Session) -> Result<(), GatewayError> {
        let Some(mut shell) = session.take_pending_shell().await else {
            return Err(GatewayError::PtySetupFailed(
                "shell already started or closed".to_string(),
            ));
        };
        if let Err(err) = shell.start(&self.settings.pty).await {
            session.restore_shell(shell).await;
            return Err(err);
        }
        let handle = self.stream_output(session, shell);
        session.install_shell(handle).await;
        tracing::info!(session_id = %session.id(), "remote shell started");
        Ok(())
    }

    /// Spawns the shell driver and the stdout/stderr pumps.
    fn stream_output(&self, session: &Session, shell: Box<dyn RemoteShell>) -> ShellHandle {
        let capacity = self.settings.shell_queue_capacity.max(1);
        let (commands, command_rx) = mpsc::channel(capacity);
        let (stdout_tx, stdout_rx) = mpsc::channel(capacity);
        let (stderr_tx, stderr_rx) = mpsc::channel(capacity);
        let cancel = session.cancel_token().clone();

        let driver = tokio::spawn(drive_shell(
            session.id(),
            shell,
            command_rx,
            stdout_tx,
            stderr_tx,
            cancel.clone(),
        ));

        let pumps = [(OutputStream::Stdout, stdout_rx), (OutputStream::Stderr, stderr_rx)]
            .into_iter()
            .map(|(stream, rx)| {
                tokio::spawn(pump_output(OutputPump {
                    session_id: session.id(),
                    stream,
                    chunks: rx,
                    socket: Arc::clone(session.socket()),
                    codec: self.codec.clone(),
                    activity: Arc::clone(session.activity()),
                    cancel: cancel.clone(),
                }))
            })
            .collect();

        ShellHandle {
            commands,
            driver,
            pumps,
        }
    }

    /// Queues bytes for the remote shell's standard input.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the shell is not running.
    pub async fn write(&self, session: &Session, data: &[u8]) -> Result<(), GatewayError> {
        let commands = session
            .shell_commands()
            .await
            .ok_or_else(|| GatewayError::Transport("shell is not running".to_string()))?;
        session.activity().touch();
        commands
            .send(ShellCommand::Input(data.to_vec()))
            .await
            .map_err(|_| GatewayError::Transport("shell input closed".to_string()))
    }

    /// Forwards a window change. Non-positive dimensions are ignored and
    /// reported as `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] if the shell is not running.
    pub async fn resize(&self, session: &Session, cols: i32, rows: i32) -> Result<bool, GatewayError> {
        let Some(size) = TerminalSize::from_dimensions(cols, rows) else {
            return Ok(false);
        };
        let commands = session
            .shell_commands()
            .await
            .ok_or_else(|| GatewayError::Transport("shell is not running".to_string()))?;
        commands
            .send(ShellCommand::Resize(size))
            .await
            .map(|()| true)
            .map_err(|_| GatewayError::Transport("shell input closed".to_string()))
    }
}

/// Owns the shell channel: routes its output to the pump queues and applies
/// queued commands, until cancelled or the command queue closes.
async fn drive_shell(
    session_id: SessionId,
    mut shell: Box<dyn RemoteShell>,
    mut commands: mpsc::Receiver<ShellCommand>,
    stdout: mpsc::Sender<Vec<u8>>,
    stderr: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut stdout = Some(stdout);
    let mut stderr = Some(stderr);
    let mut events_open = true;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = shell.next_event(), if events_open => match event {
                Some(ShellEvent::Stdout(data)) => forward(&mut stdout, &data).await,
                Some(ShellEvent::Stderr(data)) => forward(&mut stderr, &data).await,
                Some(ShellEvent::Exit(code)) => {
                    tracing::info!(%session_id, exit_code = code, "remote shell exited");
                }
                Some(ShellEvent::Eof) => {
                    tracing::debug!(%session_id, "remote shell sent eof");
                    stdout = None;
                    stderr = None;
                }
                None => {
                    tracing::debug!(%session_id, "remote shell channel closed");
                    stdout = None;
                    stderr = None;
                    events_open = false;
                }
            },
            command = commands.recv() => match command {
                Some(ShellCommand::Input(bytes)) => {
                    if let Err(err) = shell.write(&bytes).await {
                        tracing::warn!(%session_id, error = %err, "shell write failed");
                        break;
                    }
                }
                Some(ShellCommand::Resize(size)) => {
                    if let Err(err) = shell.resize(size).await {
                        tracing::warn!(%session_id, error = %err, "shell resize failed");
                    }
                }
                None => break,
            },
        }
    }

    shell.close().await;
    tracing::debug!(%session_id, "shell driver stopped");
}

/// Sends `data` to a pump queue in [`OUTPUT_CHUNK_SIZE`] pieces. A pump that
/// has gone away is forgotten.
async fn forward(queue: &mut Option<mpsc::Sender<Vec<u8>>>, data: &[u8]) {
    let Some(tx) = queue.as_ref() else {
        return;
    };
    let mut closed = false;
    for chunk in data.chunks(OUTPUT_CHUNK_SIZE) {
        if tx.send(chunk.to_vec()).await.is_err() {
            closed = true;
            break;
        }
    }
    if closed {
        *queue = None;
    }
}

struct OutputPump {
    session_id: SessionId,
    stream: OutputStream,
    chunks: mpsc::Receiver<Vec<u8>>,
    socket: Arc<SocketSlot>,
    codec: CodecChain,
    activity: Arc<ActivityClock>,
    cancel: CancellationToken,
}

/// Relays one output stream to the bound socket as `output` messages.
/// Ends on EOF of its stream or cancellation; never tears the session down
/// itself. Output produced while no socket can take it is dropped.
async fn pump_output(mut pump: OutputPump) {
    let mut text = Utf8Carry::default();
    loop {
        let chunk = tokio::select! {
            () = pump.cancel.cancelled() => break,
            chunk = pump.chunks.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        pump.activity.touch();
        let data = text.push(&chunk);
        if data.is_empty() {
            continue;
        }
        let message = WireMessage::output(data);
        let delivered = tokio::select! {
            () = pump.cancel.cancelled() => break,
            sent = pump.socket.send(&pump.codec, &message) => sent,
        };
        if let Err(err) = delivered {
            tracing::debug!(
                session_id = %pump.session_id,
                stream = pump.stream.as_str(),
                error = %err,
                "output dropped"
            );
        }
    }
    tracing::debug!(
        session_id = %pump.session_id,
        stream = pump.stream.as_str(),
        "output pump finished"
    );
}

/// Turns a byte stream into UTF-8 text, holding back a multi-byte character
/// split across reads until its remaining bytes arrive.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, invalid) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = invalid.get(len..).unwrap_or_default();
                        }
                        // incomplete trailing sequence: wait for more bytes
                        None => {
                            rest = invalid;
                            break;
                        }
                    }
                }
            }
        }
        let carried = rest.to_vec();
        self.pending = carried;
        text
    }
}
