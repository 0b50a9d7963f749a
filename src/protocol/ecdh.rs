//! Elliptic-curve Diffie-Hellman collaborator.
//!
//! Pure key agreement over x25519: ephemeral keypair generation for the
//! one-shot handshake flows and static-secret agreement for keystore-pinned
//! exchanges. Public values travel as opaque bytes; everything else in the
//! crate treats this module as a black box producing 32-byte shared points.

use crate::error::{Result, TransportError};
use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of an encoded public value
pub const PUBLIC_KEY_LEN: usize = 32;

/// Generate a fresh ephemeral keypair. The secret is consumed by the single
/// [`agree`] call it participates in.
pub fn generate() -> (EphemeralSecret, [u8; 32]) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret).to_bytes();
    (secret, public)
}

/// Generate a long-lived static keypair, e.g. for a named keystore entry.
pub fn generate_static() -> (StaticSecret, [u8; 32]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret).to_bytes();
    (secret, public)
}

/// The encoded public value of a static secret.
pub fn static_public(secret: &StaticSecret) -> [u8; 32] {
    PublicKey::from(secret).to_bytes()
}

/// Compute the shared secret between an ephemeral secret and a peer public
/// value.
///
/// # Errors
/// Fails if the peer value is not a valid encoded public key.
pub fn agree(secret: EphemeralSecret, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let peer = parse_public(peer_public)?;
    Ok(Zeroizing::new(secret.diffie_hellman(&peer).to_bytes()))
}

/// Compute the shared secret under a static (reusable) secret.
pub fn agree_static(secret: &StaticSecret, peer_public: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let peer = parse_public(peer_public)?;
    Ok(Zeroizing::new(secret.diffie_hellman(&peer).to_bytes()))
}

fn parse_public(bytes: &[u8]) -> Result<PublicKey> {
    let array: [u8; PUBLIC_KEY_LEN] = bytes
        .try_into()
        .map_err(|_| TransportError::MalformedPacket("bad public key length".into()))?;
    Ok(PublicKey::from(array))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let (a_secret, a_public) = generate();
        let (b_secret, b_public) = generate();

        let ab = agree(a_secret, &b_public).unwrap();
        let ba = agree(b_secret, &a_public).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn static_key_agrees_with_ephemeral() {
        let (static_secret, static_public) = generate_static();
        let (eph_secret, eph_public) = generate();

        let client_side = agree(eph_secret, &static_public).unwrap();
        let server_side = agree_static(&static_secret, &eph_public).unwrap();
        assert_eq!(*client_side, *server_side);
    }

    #[test]
    fn bad_length_is_rejected() {
        let (secret, _) = generate();
        assert!(agree(secret, &[0u8; 31]).is_err());
    }
}
