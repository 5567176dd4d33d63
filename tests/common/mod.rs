//! Shared harness: an in-memory echo shell behind the public SSH traits and
//! a gateway served on an ephemeral port.

#![allow(dead_code, clippy::panic)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ssh_tunnel_gateway::api;
use ssh_tunnel_gateway::api::dto::{ConnectRequest, ConnectResponse};
use ssh_tunnel_gateway::app_state::AppState;
use ssh_tunnel_gateway::client::{ClientEvent, TerminalClient};
use ssh_tunnel_gateway::domain::{IdleSettings, SessionRegistry};
use ssh_tunnel_gateway::error::GatewayError;
use ssh_tunnel_gateway::protocol::{CodecChain, Frame, WireMessage};
use ssh_tunnel_gateway::ssh::{
    BridgeSettings, PtyRequest, RemoteShell, ShellEvent, SshBridge, SshConnection, SshConnector,
    SshTarget, SshTransport, TerminalSize,
};
use ssh_tunnel_gateway::ws::handler::ws_ssh_handler;

/// Window sizes applied to any echo shell, in order.
#[derive(Debug, Default)]
pub struct EchoLog {
    resizes: Mutex<Vec<TerminalSize>>,
}

impl EchoLog {
    /// Snapshot of the recorded window sizes.
    pub fn resizes(&self) -> Vec<TerminalSize> {
        self.resizes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Accepts `alice`/`secret` on any host and hands out echo shells.
#[derive(Debug, Default)]
pub struct EchoConnector {
    /// Shared record of what the shells saw.
    pub log: Arc<EchoLog>,
    /// Makes every shell refuse its PTY request.
    pub refuse_pty: bool,
}

#[async_trait]
impl SshConnector for EchoConnector {
    async fn connect(&self, target: &SshTarget) -> Result<SshConnection, GatewayError> {
        if target.username != "alice" || target.password() != "secret" {
            return Err(GatewayError::AuthenticationFailed(target.label()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(SshConnection {
            transport: Box::new(EchoTransport),
            shell: Box::new(EchoShell {
                log: Arc::clone(&self.log),
                refuse_pty: self.refuse_pty,
                events_tx,
                events_rx,
            }),
        })
    }
}

#[derive(Debug)]
struct EchoTransport;

#[async_trait]
impl SshTransport for EchoTransport {
    async fn close(&self) {}
}

/// Echoes input back, and for `echo <text>` lines also prints `<text>`.
#[derive(Debug)]
struct EchoShell {
    log: Arc<EchoLog>,
    refuse_pty: bool,
    events_tx: mpsc::UnboundedSender<ShellEvent>,
    events_rx: mpsc::UnboundedReceiver<ShellEvent>,
}

#[async_trait]
impl RemoteShell for EchoShell {
    async fn start(&mut self, _pty: &PtyRequest) -> Result<(), GatewayError> {
        if self.refuse_pty {
            return Err(GatewayError::PtySetupFailed("pty request refused".to_string()));
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ShellEvent> {
        self.events_rx.recv().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), GatewayError> {
        let _ = self.events_tx.send(ShellEvent::Stdout(data.to_vec()));
        let text = String::from_utf8_lossy(data);
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("echo ") {
                let _ = self
                    .events_tx
                    .send(ShellEvent::Stdout(format!("{rest}\r\n").into_bytes()));
            }
        }
        Ok(())
    }

    async fn resize(&mut self, size: TerminalSize) -> Result<(), GatewayError> {
        self.log
            .resizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(size);
        Ok(())
    }

    async fn close(&mut self) {}
}

/// A gateway listening on `127.0.0.1:<ephemeral>`.
#[derive(Debug)]
pub struct TestServer {
    /// `http://127.0.0.1:<port>`.
    pub base_url: String,
    /// The server's registry.
    pub registry: Arc<SessionRegistry>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serves the gateway over `connector`.
pub async fn spawn_server(connector: Arc<dyn SshConnector>, settings: BridgeSettings) -> TestServer {
    spawn_server_with(connector, settings, IdleSettings::default()).await
}

/// Serves the gateway over `connector` with the given idle settings.
pub async fn spawn_server_with(
    connector: Arc<dyn SshConnector>,
    settings: BridgeSettings,
    idle: IdleSettings,
) -> TestServer {
    let (state, registry) = app_state(connector, settings, idle);
    let app = api::build_router()
        .route("/ws/ssh/{id}", get(ws_ssh_handler))
        .with_state(state);
    serve(app, registry).await
}

/// Serves only the control endpoints; WebSocket dials get a 404.
pub async fn spawn_control_only_server() -> TestServer {
    let (state, registry) = app_state(
        Arc::new(EchoConnector::default()),
        BridgeSettings::default(),
        IdleSettings::default(),
    );
    serve(api::build_router().with_state(state), registry).await
}

fn app_state(
    connector: Arc<dyn SshConnector>,
    settings: BridgeSettings,
    idle: IdleSettings,
) -> (AppState, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new(idle, CodecChain::default()));
    let bridge = Arc::new(SshBridge::new(connector, settings, CodecChain::default()));
    (AppState::new(Arc::clone(&registry), bridge), registry)
}

async fn serve(app: Router, registry: Arc<SessionRegistry>) -> TestServer {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("cannot bind test listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestServer {
        base_url: format!("http://{addr}"),
        registry,
        handle,
    }
}

/// Serves the gateway over a fresh [`EchoConnector`].
pub async fn spawn_echo_server() -> (TestServer, Arc<EchoLog>) {
    let connector = EchoConnector::default();
    let log = Arc::clone(&connector.log);
    let server = spawn_server(Arc::new(connector), BridgeSettings::default()).await;
    (server, log)
}

/// Client wired to an unbounded event channel.
pub fn client(server: &TestServer) -> (TerminalClient, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let Ok(client) = TerminalClient::builder(server.base_url.as_str())
        .notifications(Arc::new(tx))
        .build()
    else {
        panic!("client must build");
    };
    (client, rx)
}

/// Waits up to five seconds for an event matching `pred`.
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed"),
        Err(_) => panic!("timed out waiting for event"),
    }
}

/// Polls `cond` every 10ms for up to five seconds.
pub async fn eventually<F, Fut>(cond: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A WebSocket to the gateway driven without the terminal client.
pub type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a session for `alice` through the control endpoint.
pub async fn open_session(server: &TestServer) -> String {
    let url = format!("{}/api/v1/ssh/connect", server.base_url);
    let request = ConnectRequest::password_login("testhost", "alice", "secret");
    let Ok(response) = reqwest::Client::new().post(url).json(&request).send().await else {
        panic!("connect request must complete");
    };
    let Ok(body) = response.json::<ConnectResponse>().await else {
        panic!("connect must succeed");
    };
    body.session_id
}

/// Dials the streaming endpoint of `session_id`.
pub async fn dial(server: &TestServer, session_id: &str) -> RawSocket {
    let url = format!(
        "{}/ws/ssh/{session_id}",
        server.base_url.replacen("http://", "ws://", 1)
    );
    let Ok((socket, _)) = tokio_tungstenite::connect_async(url).await else {
        panic!("websocket dial failed");
    };
    socket
}

/// Encodes `message` with the default codec and sends it.
pub async fn send_message(socket: &mut RawSocket, message: &WireMessage) {
    let Ok(frame) = CodecChain::default().encode(message) else {
        panic!("message must encode");
    };
    send_raw(socket, frame_message(frame)).await;
}

/// Sends a WebSocket message as is.
pub async fn send_raw(socket: &mut RawSocket, message: Message) {
    if let Err(e) = socket.send(message).await {
        panic!("websocket send failed: {e}");
    }
}

/// Next decoded message within five seconds; `None` once the socket closed.
pub async fn next_message(socket: &mut RawSocket) -> Option<WireMessage> {
    let codec = CodecChain::default();
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = match socket.next().await? {
                Ok(Message::Binary(bytes)) => Frame::Binary(bytes.to_vec()),
                Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            };
            let Ok(message) = codec.decode(&frame) else {
                panic!("gateway sent an undecodable frame");
            };
            return Some(message);
        }
    })
    .await;
    match next {
        Ok(message) => message,
        Err(_) => panic!("timed out waiting for a websocket message"),
    }
}

fn frame_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(bytes) => Message::binary(bytes),
        Frame::Text(text) => Message::text(text),
    }
}
