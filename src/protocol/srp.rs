//! SRP-6a exchange math.
//!
//! Pure functions over big integers: no I/O, no state, no knowledge of the
//! packet schema. The coordinator feeds wire bytes in and gets wire bytes
//! (or proofs) out. The default group is the 2048-bit group from RFC 5054.
//!
//! Notation follows the SRP papers: `N, g` group, `s` salt, `x` private key
//! derived from the password, `v = g^x` verifier, `A/B` public values,
//! `u` scrambling parameter, `S` raw shared secret, `K = H(S)` session key,
//! `M1/M2` the client and server proofs.

use crate::core::crypto::{random_bytes, sha256};
use crate::error::{Result, TransportError};
use num_bigint::BigUint;
use num_traits::Zero;

/// RFC 5054, appendix A, 2048-bit group modulus.
const N_2048_HEX: &str = "AC6BDB41324A9A9BF166DE5E1389582FAF72B6651987EE07FC3192943DB56050\
A37329CBB4A099ED8193E0757767A13DD52312AB4B03310DCD7F48A9DA04FD50\
E8083969EDB767B0CF6095179A163AB3661A05FBD5FAAAE82918A9962F0B93B8\
55F97993EC975EEAA80D740ADBF4FF747359D041D5C33EA71D281E446B14773B\
CA97B43A23FB801676BD207A436C6481F1D2B9078717461A5B9D32E688F87748\
544523B524B0D57D5EA77A2775D2ECFA032CFBDBF52FB3786160279004E57AE6\
AF874E7303CE53299CCC041C7BC308D82A5698F3A8D0C38271AE35F8E9DBFBB6\
94B5C803D89F7AE435DE236D525F54759B65E372FCD68EF20FA7111F9E4AFF73";

/// An SRP group: safe prime modulus and generator.
#[derive(Debug, Clone)]
pub struct SrpGroup {
    pub n: BigUint,
    pub g: BigUint,
}

impl SrpGroup {
    /// The default 2048-bit group (RFC 5054), g = 2.
    pub fn rfc5054_2048() -> Self {
        let n = BigUint::parse_bytes(N_2048_HEX.as_bytes(), 16)
            .expect("RFC 5054 modulus constant parses");
        Self {
            n,
            g: BigUint::from(2u8),
        }
    }

    /// Left-pad a value's big-endian bytes to the modulus width.
    pub fn pad(&self, value: &BigUint) -> Vec<u8> {
        let width = (self.n.bits() as usize).div_ceil(8);
        let bytes = value.to_bytes_be();
        let mut out = vec![0u8; width - bytes.len()];
        out.extend_from_slice(&bytes);
        out
    }

    /// The multiplier parameter `k = H(N ‖ pad(g))`.
    pub fn k(&self) -> BigUint {
        let mut data = self.n.to_bytes_be();
        data.extend_from_slice(&self.pad(&self.g));
        BigUint::from_bytes_be(&sha256(&data))
    }
}

impl Default for SrpGroup {
    fn default() -> Self {
        Self::rfc5054_2048()
    }
}

/// A random 256-bit private value for `a` or `b`.
pub fn private_value() -> BigUint {
    loop {
        let value = BigUint::from_bytes_be(&random_bytes::<32>());
        if !value.is_zero() {
            return value;
        }
    }
}

/// The password-derived private key `x = H(s ‖ H(I ‖ ":" ‖ P))`.
pub fn compute_x(salt: &[u8], identity: &str, password: &str) -> BigUint {
    let mut inner = Vec::with_capacity(identity.len() + 1 + password.len());
    inner.extend_from_slice(identity.as_bytes());
    inner.push(b':');
    inner.extend_from_slice(password.as_bytes());
    let inner_hash = sha256(&inner);

    let mut outer = Vec::with_capacity(salt.len() + 32);
    outer.extend_from_slice(salt);
    outer.extend_from_slice(&inner_hash);
    BigUint::from_bytes_be(&sha256(&outer))
}

/// The password verifier `v = g^x mod N`, stored server-side at enrollment.
pub fn compute_verifier(group: &SrpGroup, x: &BigUint) -> BigUint {
    group.g.modpow(x, &group.n)
}

/// Client public value `A = g^a mod N`.
pub fn client_public(group: &SrpGroup, a: &BigUint) -> BigUint {
    group.g.modpow(a, &group.n)
}

/// Server public value `B = (k·v + g^b) mod N`.
pub fn server_public(group: &SrpGroup, k: &BigUint, v: &BigUint, b: &BigUint) -> BigUint {
    (k * v + group.g.modpow(b, &group.n)) % &group.n
}

/// Scrambling parameter `u = H(pad(A) ‖ pad(B))`, rejected if zero.
pub fn compute_u(group: &SrpGroup, a_pub: &BigUint, b_pub: &BigUint) -> Result<BigUint> {
    let mut data = group.pad(a_pub);
    data.extend_from_slice(&group.pad(b_pub));
    let u = BigUint::from_bytes_be(&sha256(&data));
    if u.is_zero() {
        return Err(TransportError::auth("SRP scrambling parameter is zero"));
    }
    Ok(u)
}

/// Client-side raw shared secret `S = (B − k·g^x)^(a + u·x) mod N`.
///
/// # Errors
/// Rejects `B ≡ 0 (mod N)`, which would let a fake server pin the secret.
pub fn client_secret(
    group: &SrpGroup,
    b_pub: &BigUint,
    k: &BigUint,
    x: &BigUint,
    a: &BigUint,
    u: &BigUint,
) -> Result<BigUint> {
    if (b_pub % &group.n).is_zero() {
        return Err(TransportError::auth("SRP server public value is invalid"));
    }
    let kgx = (k * group.g.modpow(x, &group.n)) % &group.n;
    let base = ((b_pub % &group.n) + &group.n - kgx) % &group.n;
    let exp = a + u * x;
    Ok(base.modpow(&exp, &group.n))
}

/// Server-side raw shared secret `S = (A·v^u)^b mod N`.
///
/// # Errors
/// Rejects `A ≡ 0 (mod N)` per SRP-6a safety rules.
pub fn server_secret(
    group: &SrpGroup,
    a_pub: &BigUint,
    v: &BigUint,
    u: &BigUint,
    b: &BigUint,
) -> Result<BigUint> {
    if (a_pub % &group.n).is_zero() {
        return Err(TransportError::auth("SRP client public value is invalid"));
    }
    let base = (a_pub * v.modpow(u, &group.n)) % &group.n;
    Ok(base.modpow(b, &group.n))
}

/// Session key `K = H(pad(S))`, the premaster secret of the SRP flows.
pub fn session_key(group: &SrpGroup, s: &BigUint) -> [u8; 32] {
    sha256(&group.pad(s))
}

/// Client proof `M1 = H(H(N)⊕H(g) ‖ H(I) ‖ s ‖ A ‖ B ‖ K)`.
pub fn client_proof(
    group: &SrpGroup,
    identity: &str,
    salt: &[u8],
    a_pub: &BigUint,
    b_pub: &BigUint,
    key: &[u8; 32],
) -> [u8; 32] {
    let hn = sha256(&group.n.to_bytes_be());
    let hg = sha256(&group.g.to_bytes_be());
    let mut data = Vec::new();
    for i in 0..32 {
        data.push(hn[i] ^ hg[i]);
    }
    data.extend_from_slice(&sha256(identity.as_bytes()));
    data.extend_from_slice(salt);
    data.extend_from_slice(&a_pub.to_bytes_be());
    data.extend_from_slice(&b_pub.to_bytes_be());
    data.extend_from_slice(key);
    sha256(&data)
}

/// Server proof `M2 = H(A ‖ M1 ‖ K)`.
pub fn server_proof(a_pub: &BigUint, m1: &[u8; 32], key: &[u8; 32]) -> [u8; 32] {
    let mut data = a_pub.to_bytes_be();
    data.extend_from_slice(m1);
    data.extend_from_slice(key);
    sha256(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Full exchange with a correct password: proofs agree, keys agree.
    #[test]
    fn correct_password_converges() {
        let group = SrpGroup::default();
        let k = group.k();
        let identity = "alice";
        let password = "password123";
        let salt = random_bytes::<16>();

        // Enrollment
        let x = compute_x(&salt, identity, password);
        let v = compute_verifier(&group, &x);

        // Exchange
        let a = private_value();
        let b = private_value();
        let a_pub = client_public(&group, &a);
        let b_pub = server_public(&group, &k, &v, &b);
        let u = compute_u(&group, &a_pub, &b_pub).unwrap();

        let client_s = client_secret(&group, &b_pub, &k, &x, &a, &u).unwrap();
        let server_s = server_secret(&group, &a_pub, &v, &u, &b).unwrap();
        assert_eq!(client_s, server_s);

        let client_k = session_key(&group, &client_s);
        let server_k = session_key(&group, &server_s);
        assert_eq!(client_k, server_k);

        let client_m1 = client_proof(&group, identity, &salt, &a_pub, &b_pub, &client_k);
        let server_m1 = client_proof(&group, identity, &salt, &a_pub, &b_pub, &server_k);
        assert_eq!(client_m1, server_m1);
    }

    #[test]
    fn wrong_password_diverges() {
        let group = SrpGroup::default();
        let k = group.k();
        let salt = random_bytes::<16>();

        let x_right = compute_x(&salt, "alice", "correct");
        let x_wrong = compute_x(&salt, "alice", "incorrect");
        let v = compute_verifier(&group, &x_right);

        let a = private_value();
        let b = private_value();
        let a_pub = client_public(&group, &a);
        let b_pub = server_public(&group, &k, &v, &b);
        let u = compute_u(&group, &a_pub, &b_pub).unwrap();

        let client_s = client_secret(&group, &b_pub, &k, &x_wrong, &a, &u).unwrap();
        let server_s = server_secret(&group, &a_pub, &v, &u, &b).unwrap();
        assert_ne!(client_s, server_s);
    }

    #[test]
    fn zero_public_values_rejected() {
        let group = SrpGroup::default();
        let zero = BigUint::zero();
        let one = BigUint::from(1u8);
        assert!(client_secret(&group, &zero, &one, &one, &one, &one).is_err());
        assert!(server_secret(&group, &zero, &one, &one, &one).is_err());
        // N itself is ≡ 0 mod N
        assert!(server_secret(&group, &group.n, &one, &one, &one).is_err());
    }

    #[test]
    fn pad_is_modulus_width() {
        let group = SrpGroup::default();
        assert_eq!(group.pad(&BigUint::from(7u8)).len(), 256);
    }
}
