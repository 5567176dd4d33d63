//! The terminal bridge client.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{ClientError, ClientEvent, ConnectionState, LogSink, NotificationSink, TokenProvider};
use crate::api::dto::{ConnectRequest, ConnectResponse};
use crate::error::ErrorResponse;
use crate::protocol::{CodecChain, Frame, MessageKind, WireMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Builder for [`TerminalClient`].
pub struct TerminalClientBuilder {
    base_url: String,
    http: Option<reqwest::Client>,
    tokens: Option<Arc<dyn TokenProvider>>,
    sink: Option<Arc<dyn NotificationSink>>,
    codec: CodecChain,
}

impl fmt::Debug for TerminalClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalClientBuilder")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TerminalClientBuilder {
    /// Uses a preconfigured HTTP client for control requests.
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Sets where bearer tokens come from.
    #[must_use]
    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Sets where notifications go. Defaults to [`LogSink`].
    #[must_use]
    pub fn notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Overrides the wire codec chain.
    #[must_use]
    pub fn codec(mut self, codec: CodecChain) -> Self {
        self.codec = codec;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if the base URL does not parse or
    /// is not `http`/`https`.
    pub fn build(self) -> Result<TerminalClient, ClientError> {
        let mut base_url =
            Url::parse(&self.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme {}",
                base_url.scheme()
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(TerminalClient {
            inner: Arc::new(Inner {
                http: self.http.unwrap_or_default(),
                base_url,
                tokens: self.tokens,
                sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
                codec: self.codec,
                state,
                session_id: Mutex::new(None),
                writer: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        })
    }
}

/// Client side of the tunnel: opens a session through the control endpoint,
/// streams it over a WebSocket and reports everything to a
/// [`NotificationSink`].
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct TerminalClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    tokens: Option<Arc<dyn TokenProvider>>,
    sink: Arc<dyn NotificationSink>,
    codec: CodecChain,
    state: watch::Sender<ConnectionState>,
    session_id: Mutex<Option<String>>,
    writer: Mutex<Option<WsWriter>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TerminalClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl TerminalClient {
    /// Starts building a client for the gateway at `base_url`
    /// (e.g. `http://127.0.0.1:3000`).
    #[must_use]
    pub fn builder(base_url: impl Into<String>) -> TerminalClientBuilder {
        TerminalClientBuilder {
            base_url: base_url.into(),
            http: None,
            tokens: None,
            sink: None,
            codec: CodecChain::default(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watches state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Identifier of the current session, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().await.clone()
    }

    /// Opens a session and its WebSocket. Allowed from `Disconnected` and
    /// `Error` only.
    ///
    /// Returns the session identifier.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] if a connection is in flight or open.
    /// Any control or dial failure moves the state to `Error`, emits an
    /// [`ClientEvent::Error`] and is returned as [`ClientError::Rejected`],
    /// [`ClientError::Http`] or [`ClientError::WebSocket`].
    pub async fn connect(&self, request: &ConnectRequest) -> Result<String, ClientError> {
        let mut refused = None;
        self.inner.state.send_if_modified(|state| {
            if state.can_connect() {
                *state = ConnectionState::Connecting;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        if let Some(state) = refused {
            return Err(ClientError::InvalidState(state));
        }

        match self.open(request).await {
            Ok(session_id) => Ok(session_id),
            Err(err) => {
                tracing::warn!(error = %err, "terminal connect failed");
                self.inner.state.send_replace(ConnectionState::Error);
                self.inner.sink.notify(ClientEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn open(&self, request: &ConnectRequest) -> Result<String, ClientError> {
        let inner = &self.inner;
        let token = inner.tokens.as_ref().and_then(|t| t.bearer_token());

        let url = inner
            .base_url
            .join("api/v1/ssh/connect")
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let mut call = inner.http.post(url).json(request);
        if let Some(token) = &token {
            call = call.bearer_auth(token);
        }
        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
            };
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let body: ConnectResponse = response.json().await?;

        let stream = match self.dial(&body.session_id, token.as_deref()).await {
            Ok(stream) => stream,
            Err(err) => {
                self.release_session(&body.session_id, token.as_deref()).await;
                return Err(err);
            }
        };
        let (writer, reader) = stream.split();

        *inner.writer.lock().await = Some(writer);
        *inner.session_id.lock().await = Some(body.session_id.clone());
        inner.state.send_replace(ConnectionState::Connected);
        inner.sink.notify(ClientEvent::Connected {
            session_id: body.session_id.clone(),
        });
        tracing::info!(session_id = %body.session_id, target = %body.target, "terminal connected");

        let task = tokio::spawn(read_loop(Arc::clone(inner), reader));
        *inner.reader.lock().await = Some(task);
        Ok(body.session_id)
    }

    async fn dial(&self, session_id: &str, token: Option<&str>) -> Result<WsStream, ClientError> {
        let ws_url = streaming_url(&self.inner.base_url, session_id)?;
        let mut ws_request = ws_url.as_str().into_client_request()?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::InvalidToken)?;
            ws_request.headers_mut().insert(AUTHORIZATION, value);
        }
        let (stream, _) = tokio_tungstenite::connect_async(ws_request).await?;
        Ok(stream)
    }

    /// Best-effort `DELETE` of a session this client created but could not
    /// stream, so it does not linger until the idle timeout.
    async fn release_session(&self, session_id: &str, token: Option<&str>) {
        let url = match self
            .inner
            .base_url
            .join(&format!("api/v1/ssh/sessions/{session_id}"))
        {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(%session_id, error = %e, "cannot build release url");
                return;
            }
        };
        let mut call = self.inner.http.delete(url);
        if let Some(token) = token {
            call = call.bearer_auth(token);
        }
        match call.send().await {
            Ok(response) => {
                tracing::debug!(%session_id, status = %response.status(), "released unstreamed session");
            }
            Err(e) => tracing::debug!(%session_id, error = %e, "session release failed"),
        }
    }

    /// Sends keyboard input. Encodes with the primary codec and falls back
    /// to the next one if that fails.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless connected; no I/O happens then.
    /// [`ClientError::Encode`] if every codec fails,
    /// [`ClientError::WebSocket`] if the write fails.
    pub async fn send_input(&self, text: &str) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let frame = self.inner.codec.encode(&WireMessage::input(text))?;
        self.send_frame(frame).await
    }

    /// Announces a new terminal size. Uses the primary codec only.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless connected; no I/O happens then.
    /// [`ClientError::Encode`] if the primary codec fails,
    /// [`ClientError::WebSocket`] if the write fails.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let message = WireMessage::resize(i32::from(cols), i32::from(rows));
        let frame = self.inner.codec.encode_primary(&message)?;
        self.send_frame(frame).await
    }

    /// Closes the WebSocket and returns to `Disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        if let Some(reader) = self.inner.reader.lock().await.take() {
            reader.abort();
        }
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "websocket close failed");
            }
        }
        self.inner.session_id.lock().await.take();
        self.inner.mark_disconnected("disconnected by client");
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), ClientError> {
        let mut writer = self.inner.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        writer.send(to_message(frame)).await?;
        Ok(())
    }
}

impl Inner {
    /// Moves to `Disconnected`, notifying only on an actual transition.
    fn mark_disconnected(&self, reason: &str) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        });
        if changed {
            self.sink.notify(ClientEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn fail(&self, message: String) {
        self.state.send_replace(ConnectionState::Error);
        self.sink.notify(ClientEvent::Error { message });
    }
}

/// Dispatches inbound messages until the socket closes, fails, or the
/// gateway reports an error.
async fn read_loop(inner: Arc<Inner>, mut reader: WsReader) {
    loop {
        let frame = match reader.next().await {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Err(e)) => {
                inner.fail(e.to_string());
                break;
            }
            Some(Ok(message)) => match from_message(message) {
                Some(frame) => frame,
                None => continue,
            },
        };
        let message = match inner.codec.decode(&frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "dropping undecodable message");
                continue;
            }
        };
        if dispatch(&inner, message).is_break() {
            break;
        }
    }

    if let Some(mut writer) = inner.writer.lock().await.take() {
        let _ = writer.close().await;
    }
    inner.session_id.lock().await.take();
    inner.reader.lock().await.take();
    inner.mark_disconnected("connection closed");
}

/// Forwards one inbound message to the sink. Breaks after an `error`.
fn dispatch(inner: &Inner, message: WireMessage) -> ControlFlow<()> {
    match message.kind {
        MessageKind::Output => inner.sink.notify(ClientEvent::Output {
            data: message.data.unwrap_or_default(),
        }),
        MessageKind::Status => inner.sink.notify(ClientEvent::Status {
            message: message.message.unwrap_or_default(),
        }),
        MessageKind::Error => {
            inner.fail(message.message.unwrap_or_default());
            return ControlFlow::Break(());
        }
        MessageKind::Input | MessageKind::Resize | MessageKind::Other(_) => match message.data {
            Some(data) if !data.is_empty() => {
                inner.sink.notify(ClientEvent::Output { data });
            }
            _ => tracing::debug!(kind = %message.kind, "ignoring message without payload"),
        },
    }
    ControlFlow::Continue(())
}

/// `ws(s)://…/ws/ssh/{id}` for an `http(s)://…/` base.
fn streaming_url(base: &Url, session_id: &str) -> Result<Url, ClientError> {
    let mut url = base.clone();
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot switch {base} to {scheme}")))?;
    url.join(&format!("ws/ssh/{session_id}"))
        .map_err(|e| ClientError::InvalidUrl(e.to_string()))
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(bytes) => Message::binary(bytes),
        Frame::Text(text) => Message::text(text),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
