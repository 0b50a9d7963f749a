//! Structured payload codec.
//!
//! Handshake and hello payloads cross the wire as compact, self-describing
//! binary structures (nested scalars, arrays, and maps keyed by field name).
//! MessagePack via `rmp-serde` provides exactly that shape; the functions
//! here are the only place the crate touches the encoding, so the format is
//! swappable without reaching into the record layer or the coordinator.

use crate::error::{Result, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value into its compact binary form.
///
/// # Errors
/// Returns [`TransportError::SerializeError`] if the value cannot be
/// represented, which indicates a programming error rather than bad input.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| TransportError::SerializeError(e.to_string()))
}

/// Decode a compact binary payload.
///
/// A handshake payload without a recognizable `type` discriminant fails
/// here and surfaces as a malformed-packet protocol error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| TransportError::MalformedPacket(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::HandshakePacket;

    #[test]
    fn string_roundtrip() {
        let bytes = encode(&"hello".to_string()).unwrap();
        let back: String = decode(&bytes).unwrap();
        assert_eq!(back, "hello");
    }

    #[test]
    fn packet_without_discriminant_is_rejected() {
        // A bare map with no "type" key must not decode into a packet
        let mut map = std::collections::BTreeMap::new();
        map.insert("count".to_string(), 5u32);
        let bytes = encode(&map).unwrap();
        let result: Result<HandshakePacket> = decode(&bytes);
        assert!(matches!(result, Err(TransportError::MalformedPacket(_))));
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("type".to_string(), "warp_drive".to_string());
        let bytes = encode(&map).unwrap();
        let result: Result<HandshakePacket> = decode(&bytes);
        assert!(result.is_err());
    }
}
