//! WebSocket layer: upgrade handling and the per-socket read/write loops.
//!
//! The endpoint at `/ws/ssh/{session_id}` streams one registered session.
//! Every frame in either direction is a [`crate::protocol::WireMessage`].

pub mod connection;
pub mod handler;
