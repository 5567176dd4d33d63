//! Wire protocol spoken over the streaming endpoint.
//!
//! Every WebSocket frame carries one [`WireMessage`]. Binary frames hold the
//! MessagePack encoding; text frames hold the JSON fallback.

pub mod codec;
pub mod message;

pub use codec::{CodecChain, CodecError, Frame, JsonCodec, MsgPackCodec, WireCodec};
pub use message::{MessageKind, WireMessage};
