//! Codec trait and implementations for serializing/deserializing envelopes.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The mesh never touches `serde_json` directly; it encodes through a
//! [`Codec`], so a binary format can be dropped in later without changing
//! the mesh actor.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Envelope, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec value is shared by the mesh
/// actor and every per-link reader task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type. A known control
    /// message with an unusable payload is a decode error too.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Convenience wrapper for the one type the mesh actually sends.
    fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        self.encode(envelope)
    }

    /// Convenience wrapper for the one type the mesh actually receives.
    fn decode_envelope(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        self.decode(data)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Every peer in a world must agree on the codec; the browser clients
/// this mesh interoperates with speak JSON, so this is the default.
///
/// ## Example
///
/// ```rust
/// use serde_json::json;
/// use zion_protocol::{Codec, Envelope, JsonCodec};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::app("zion-alice-1000", "chat", json!({ "text": "hi" }));
///
/// let bytes = codec.encode_envelope(&envelope).unwrap();
/// let decoded = codec.decode_envelope(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
