//! TLS-style key schedule.
//!
//! A premaster secret from any handshake method is expanded into a 48-byte
//! master secret, then into a 128-byte key block split across the client and
//! server record states. The mapping into read/write slots is asymmetric by
//! role: the server reads under the client state and writes under the server
//! state; the client mirrors that.

use crate::core::cipher::CipherState;
use crate::core::crypto::hmac_sha256;
use zeroize::Zeroizing;

/// Master secret length in bytes
pub const MASTER_SECRET_LEN: usize = 48;

const KEY_BLOCK_LEN: usize = 128;
const LABEL_MASTER: &[u8] = b"master secret";
const LABEL_EXPANSION: &[u8] = b"key expansion";

/// Which end of the connection this schedule is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The HMAC-SHA256 PRF: `A_0 = seed`, `A_i = HMAC(secret, A_{i-1})`, output
/// is the concatenation of `HMAC(secret, A_i ‖ seed)` truncated to `len`.
pub fn prf(secret: &[u8], seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut a = hmac_sha256(secret, &[seed]);
    while out.len() < len {
        out.extend_from_slice(&hmac_sha256(secret, &[&a, seed]));
        a = hmac_sha256(secret, &[&a]);
    }
    out.truncate(len);
    out
}

/// Derive the 48-byte master secret from a premaster secret and the two
/// handshake randoms.
pub fn derive_master_secret(
    premaster: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Zeroizing<Vec<u8>> {
    let mut seed = Vec::with_capacity(LABEL_MASTER.len() + client_random.len() + server_random.len());
    seed.extend_from_slice(LABEL_MASTER);
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    Zeroizing::new(prf(premaster, &seed, MASTER_SECRET_LEN))
}

/// Expand a master secret into the `(read, write)` cipher state pair for
/// the given role.
///
/// Key block layout: `clientMac[0..32] serverMac[32..64] clientKey[64..96]
/// serverKey[96..128]`, seeded with `server_random ‖ client_random` (note
/// the reversed order relative to master secret derivation). The result
/// goes into the pending slots, never directly into current.
pub fn derive_states(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    role: Role,
) -> (CipherState, CipherState) {
    let mut seed =
        Vec::with_capacity(LABEL_EXPANSION.len() + client_random.len() + server_random.len());
    seed.extend_from_slice(LABEL_EXPANSION);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    let block = Zeroizing::new(prf(master_secret, &seed, KEY_BLOCK_LEN));

    let mut client_mac = [0u8; 32];
    let mut server_mac = [0u8; 32];
    let mut client_key = [0u8; 32];
    let mut server_key = [0u8; 32];
    client_mac.copy_from_slice(&block[0..32]);
    server_mac.copy_from_slice(&block[32..64]);
    client_key.copy_from_slice(&block[64..96]);
    server_key.copy_from_slice(&block[96..128]);

    let client_state = CipherState::new(client_key, client_mac);
    let server_state = CipherState::new(server_key, server_mac);

    match role {
        // Server reads what the client writes
        Role::Server => (client_state, server_state),
        Role::Client => (server_state, client_state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::ct_eq;

    #[test]
    fn prf_is_deterministic_and_length_exact() {
        let a = prf(b"secret", b"seed", 48);
        let b = prf(b"secret", b"seed", 48);
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
        assert_eq!(prf(b"secret", b"seed", 5).len(), 5);
        // Prefix property: shorter output is a prefix of longer output
        assert_eq!(&prf(b"secret", b"seed", 100)[..48], &a[..]);
    }

    #[test]
    fn master_secret_is_48_bytes_and_random_sensitive() {
        let m1 = derive_master_secret(b"premaster", b"client", b"server");
        let m2 = derive_master_secret(b"premaster", b"client2", b"server");
        assert_eq!(m1.len(), MASTER_SECRET_LEN);
        assert!(!ct_eq(&m1, &m2));
    }

    #[test]
    fn roles_mirror_each_other() {
        let master = derive_master_secret(b"pre", b"cr", b"sr");
        let (server_read, server_write) = derive_states(&master, b"cr", b"sr", Role::Server);
        let (client_read, client_write) = derive_states(&master, b"cr", b"sr", Role::Client);

        assert_eq!(server_read.key, client_write.key);
        assert_eq!(server_read.mac_key, client_write.mac_key);
        assert_eq!(server_write.key, client_read.key);
        assert_eq!(server_write.mac_key, client_read.mac_key);
        assert_ne!(server_read.key, server_write.key);
    }
}
