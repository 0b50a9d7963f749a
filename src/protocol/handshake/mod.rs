//! # Handshake Coordination
//!
//! The multiplexed handshake state machine: one coordinator per connection
//! role, driven packet-by-packet from the connection's frame loop.
//!
//! ## Flow
//! The connection loop decodes each HANDSHAKE frame into a
//! [`HandshakePacket`](crate::protocol::packet::HandshakePacket) and hands
//! it to the role's [`HandshakeDriver`] together with a [`Channel`] for the
//! response. Every authentication method funnels into the same key
//! schedule: produce (or restore) a premaster secret, derive the pending
//! cipher states, send the response under the old write state, then switch.
//!
//! ## Proof messages
//! The signed flows (`ecdhex`, `session`, `key_exchange`) sign a
//! domain-separated message built here, never raw concatenated fields. Both
//! ends must build the identical byte string, so each field is
//! length-prefixed.

use crate::error::Result;
use crate::protocol::frame::Channel;
use crate::protocol::packet::HandshakePacket;
use async_trait::async_trait;
use tokio::io::AsyncWrite;

mod client;
mod server;

pub use client::ClientHandshake;
pub use server::{ServerContext, ServerHandshake};

/// A handshake role: consumes inbound handshake packets and writes whatever
/// the exchange calls for (responses, cipher-spec changes) to the channel.
#[async_trait]
pub trait HandshakeDriver: Send {
    async fn on_packet<W: AsyncWrite + Unpin + Send>(
        &mut self,
        packet: HandshakePacket,
        channel: &mut Channel<'_, W>,
    ) -> Result<()>;
}

const CONTEXT_ECDHEX: &[u8] = b"transport-proof:ecdhex";
const CONTEXT_SESSION: &[u8] = b"transport-proof:session";
const CONTEXT_KEY: &[u8] = b"transport-proof:key-exchange";

fn proof_message(context: &[u8], fields: &[&[u8]], timestamp: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        context.len() + 1 + fields.iter().map(|f| 4 + f.len()).sum::<usize>() + 8,
    );
    out.extend_from_slice(context);
    out.push(0);
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out.extend_from_slice(&timestamp.to_be_bytes());
    out
}

/// The message signed by an `ecdhex` client over its ephemeral exchange.
pub fn ecdhex_proof_message(public_key: &[u8], nonce: &[u8], timestamp: u64) -> Vec<u8> {
    proof_message(CONTEXT_ECDHEX, &[public_key, nonce], timestamp)
}

/// The message signed by a resuming client over its fresh session exchange.
pub fn session_proof_message(
    session_id: &str,
    session_key: &[u8],
    nonce: &[u8],
    timestamp: u64,
) -> Vec<u8> {
    proof_message(
        CONTEXT_SESSION,
        &[session_id.as_bytes(), session_key, nonce],
        timestamp,
    )
}

/// The message signed by a key-possession client over the recovered secret.
pub fn key_proof_message(session_id: &str, k: &[u8], nonce: &[u8], timestamp: u64) -> Vec<u8> {
    proof_message(CONTEXT_KEY, &[session_id.as_bytes(), k, nonce], timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_messages_are_domain_separated() {
        let a = ecdhex_proof_message(b"key", b"nonce", 7);
        let b = session_proof_message("key", b"", b"nonce", 7);
        let c = key_proof_message("key", b"", b"nonce", 7);
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        // Shifting a byte across a field boundary must change the message.
        let a = ecdhex_proof_message(b"ab", b"c", 1);
        let b = ecdhex_proof_message(b"a", b"bc", 1);
        assert_ne!(a, b);
    }
}
