//! Domain layer: session identity, the session record, socket binding, and
//! the session registry.
//!
//! Everything that outlives a single HTTP request lives here. The registry
//! owns every [`Session`]; the WebSocket and SSH layers only ever hold
//! `Arc<Session>` clones obtained from it.

pub mod session;
pub mod session_id;
pub mod session_registry;
pub mod socket_slot;

pub use session::{ActivityClock, Session};
pub use session_id::{ParseSessionIdError, SessionId};
pub use session_registry::{CleanupReason, IdlePolicy, IdleSettings, SessionRegistry};
pub use socket_slot::{
    BoundSocket, SocketCommand, SocketQueue, SocketSender, SocketSlot, socket_channel,
};
