//! Terminal bridge client.
//!
//! [`TerminalClient`] is what a host application embeds to drive a remote
//! shell through the gateway: it calls the control endpoint, dials the
//! streaming endpoint with the same bearer token, and turns inbound wire
//! messages into [`ClientEvent`]s for a [`NotificationSink`].
//!
//! ```no_run
//! # async fn demo() -> Result<(), ssh_tunnel_gateway::client::ClientError> {
//! use std::sync::Arc;
//! use ssh_tunnel_gateway::api::dto::ConnectRequest;
//! use ssh_tunnel_gateway::client::{ClientEvent, StaticToken, TerminalClient};
//!
//! let (events, mut rx) = tokio::sync::mpsc::unbounded_channel::<ClientEvent>();
//! let client = TerminalClient::builder("http://127.0.0.1:3000")
//!     .token_provider(Arc::new(StaticToken::new("token")))
//!     .notifications(Arc::new(events))
//!     .build()?;
//! client
//!     .connect(&ConnectRequest::password_login("testhost", "alice", "secret"))
//!     .await?;
//! client.send_input("echo hi\n").await?;
//! while let Some(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod state;
pub mod terminal;

pub use error::ClientError;
pub use events::{ClientEvent, LogSink, NotificationSink, StaticToken, TokenProvider};
pub use state::ConnectionState;
pub use terminal::{TerminalClient, TerminalClientBuilder};
