//! Wire encodings for [`WireMessage`].
//!
//! Two strategies implement [`WireCodec`]: [`MsgPackCodec`] (compact,
//! map-based, carried in binary frames) and [`JsonCodec`] (plain text,
//! carried in text frames). [`CodecChain`] tries them in a fixed priority
//! order so the fallback decision lives in one place.

use std::fmt;
use std::sync::Arc;

use super::message::WireMessage;

/// A single encoded WebSocket payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary frame payload.
    Binary(Vec<u8>),
    /// Text frame payload.
    Text(String),
}

/// Failure raised by a codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The message could not be encoded.
    #[error("{codec} encode failed: {reason}")]
    Encode {
        /// Codec that failed.
        codec: &'static str,
        /// Underlying failure.
        reason: String,
    },
    /// The frame could not be decoded.
    #[error("{codec} decode failed: {reason}")]
    Decode {
        /// Codec that failed.
        codec: &'static str,
        /// Underlying failure.
        reason: String,
    },
    /// The chain holds no codec able to handle the request.
    #[error("no codec available")]
    Exhausted,
}

/// Serialization strategy for wire messages.
pub trait WireCodec: Send + Sync + fmt::Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Encodes `msg` into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when serialization fails.
    fn encode(&self, msg: &WireMessage) -> Result<Frame, CodecError>;

    /// Decodes a frame produced by this codec.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the frame is malformed or of a
    /// kind this codec does not read.
    fn decode(&self, frame: &Frame) -> Result<WireMessage, CodecError>;
}

/// MessagePack with named fields, so the payload stays a map.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl WireCodec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, msg: &WireMessage) -> Result<Frame, CodecError> {
        rmp_serde::to_vec_named(msg)
            .map(Frame::Binary)
            .map_err(|e| CodecError::Encode {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn decode(&self, frame: &Frame) -> Result<WireMessage, CodecError> {
        let Frame::Binary(bytes) = frame else {
            return Err(CodecError::Decode {
                codec: self.name(),
                reason: "expected a binary frame".to_string(),
            });
        };
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// Plain-text JSON. Also reads JSON that arrives in a binary frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, msg: &WireMessage) -> Result<Frame, CodecError> {
        serde_json::to_string(msg)
            .map(Frame::Text)
            .map_err(|e| CodecError::Encode {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn decode(&self, frame: &Frame) -> Result<WireMessage, CodecError> {
        let result = match frame {
            Frame::Text(text) => serde_json::from_str(text),
            Frame::Binary(bytes) => serde_json::from_slice(bytes),
        };
        result.map_err(|e| CodecError::Decode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// Ordered list of codecs: the first is primary, the rest are fallbacks.
#[derive(Debug, Clone)]
pub struct CodecChain {
    codecs: Vec<Arc<dyn WireCodec>>,
}

impl CodecChain {
    /// Builds a chain from codecs in priority order.
    #[must_use]
    pub fn new(codecs: Vec<Arc<dyn WireCodec>>) -> Self {
        Self { codecs }
    }

    /// Returns the primary codec, if any.
    #[must_use]
    pub fn primary(&self) -> Option<&Arc<dyn WireCodec>> {
        self.codecs.first()
    }

    /// Encodes with the primary codec, falling back in order on failure.
    ///
    /// # Errors
    ///
    /// Returns the last codec's error when every codec fails, or
    /// [`CodecError::Exhausted`] for an empty chain.
    pub fn encode(&self, msg: &WireMessage) -> Result<Frame, CodecError> {
        let mut last = CodecError::Exhausted;
        for codec in &self.codecs {
            match codec.encode(msg) {
                Ok(frame) => return Ok(frame),
                Err(err) => {
                    tracing::warn!(codec = codec.name(), error = %err, "wire encode failed, trying next codec");
                    last = err;
                }
            }
        }
        Err(last)
    }

    /// Encodes with the primary codec only.
    ///
    /// # Errors
    ///
    /// Returns the primary codec's error, or [`CodecError::Exhausted`] for
    /// an empty chain.
    pub fn encode_primary(&self, msg: &WireMessage) -> Result<Frame, CodecError> {
        self.primary()
            .ok_or(CodecError::Exhausted)
            .and_then(|codec| codec.encode(msg))
    }

    /// Decodes a frame with the first codec that accepts it.
    ///
    /// # Errors
    ///
    /// Returns the last codec's error when no codec accepts the frame.
    pub fn decode(&self, frame: &Frame) -> Result<WireMessage, CodecError> {
        let mut last = CodecError::Exhausted;
        for codec in &self.codecs {
            match codec.decode(frame) {
                Ok(msg) => return Ok(msg),
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}

impl Default for CodecChain {
    /// MessagePack first, JSON as fallback.
    fn default() -> Self {
        Self::new(vec![Arc::new(MsgPackCodec), Arc::new(JsonCodec)])
    }
}
