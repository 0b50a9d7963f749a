//! Frame content types and the handshake packet schema.
//!
//! Handshake payloads are a tagged union on the `type` field. Matching on
//! [`HandshakePacket`] is exhaustive, so an unhandled packet type is a
//! compile error rather than a runtime fallthrough; an unknown `type` on the
//! wire fails at decode time.
//!
//! Several tags travel in both directions with different required fields
//! (`ecdhe` carries the client ephemeral key on the way in and the server
//! ephemeral key plus config on the way out). Direction-specific fields are
//! optional in the schema and enforced by the coordinator via [`require`].

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// TLS-like record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    Hello = 24,
}

impl ContentType {
    /// Parse a content type byte from a frame header.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            24 => Ok(ContentType::Hello),
            other => Err(TransportError::UnknownContentType(other)),
        }
    }
}

/// Server parameters advertised in handshake responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportInfo {
    pub version: u8,
    /// Ticket lifetime in seconds, so clients can schedule refresh
    pub ticket_ttl: u64,
}

/// The handshake packet union, one variant per `type` discriminant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakePacket {
    /// Anonymous ephemeral ECDH. Request carries the client ephemeral key;
    /// response carries the server ephemeral key, agent, and config.
    Ecdhe {
        key: ByteBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<TransportInfo>,
    },
    /// ECDH with proof of private-key possession: single-use nonce, bounded
    /// timestamp, and a signature over the domain-separated exchange.
    Ecdhex {
        key: ByteBuf,
        nonce: ByteBuf,
        timestamp: u64,
        signature: ByteBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plain: Option<bool>,
    },
    /// Session resumption via fresh ECDH re-authenticated against the
    /// session's bound public key. Server-only entry point.
    Session {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_key: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<ByteBuf>,
        /// Response: server ephemeral key
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_login_step: Option<ByteBuf>,
    },
    /// Request a batch of resumption tickets for the current session.
    TicketRequest { count: u32 },
    /// Server response carrying issued tickets and their TTL in seconds.
    TicketResponse { tickets: Vec<ByteBuf>, ttl: u64 },
    /// Redeem a single-use resumption ticket. Response carries the server
    /// random used to re-derive the key block from the restored master
    /// secret.
    Ticket {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket_id: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_random: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plain: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_random: Option<ByteBuf>,
    },
    /// SRP-6a first leg. Request: identity and host. Response: group
    /// parameters, salt, and the server public value B.
    SrpInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        i: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        n: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        g: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        k: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        s: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        b: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// SRP-6a second leg. Request: A, M1, and an optional ticket count.
    /// Response: M2 plus the tickets issued in the same exchange.
    SrpExchange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        a: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        m1: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_key: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        m2: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tickets: Option<Vec<ByteBuf>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_login_step: Option<ByteBuf>,
    },
    /// ECDHE pinned to a named long-lived server key instead of a fresh
    /// ephemeral one.
    Ecdhef {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_id: Option<String>,
        key: ByteBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    /// Key-possession login, first leg: the client names its known public
    /// key; the server answers with a secret K encrypted to it.
    /// Server-only entry point.
    KeyInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_k: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Key-possession login, second leg: the decrypted K plus a freshness
    /// proof. Server-only entry point.
    KeyExchange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        k: Option<ByteBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        additional_login_step: Option<ByteBuf>,
    },
}

/// Extract a direction-required field, failing with a malformed-packet
/// error naming the missing field.
pub(crate) fn require<T>(field: Option<T>, name: &'static str) -> Result<T> {
    field.ok_or(TransportError::MissingField(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec;

    #[test]
    fn content_type_bytes() {
        assert_eq!(ContentType::ChangeCipherSpec as u8, 20);
        assert_eq!(ContentType::Hello as u8, 24);
        assert_eq!(
            ContentType::from_byte(23).unwrap(),
            ContentType::ApplicationData
        );
        assert!(ContentType::from_byte(25).is_err());
    }

    #[test]
    fn packet_tag_roundtrip() {
        let packet = HandshakePacket::Ecdhe {
            key: ByteBuf::from(vec![1u8; 32]),
            agent: Some("client/1.0".into()),
            config: None,
        };
        let bytes = codec::encode(&packet).unwrap();
        match codec::decode::<HandshakePacket>(&bytes).unwrap() {
            HandshakePacket::Ecdhe { key, agent, config } => {
                assert_eq!(key.len(), 32);
                assert_eq!(agent.as_deref(), Some("client/1.0"));
                assert!(config.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn require_reports_field_name() {
        let missing: Option<u32> = None;
        match require(missing, "ticket_id") {
            Err(TransportError::MissingField(name)) => assert_eq!(name, "ticket_id"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
