//! Symmetric primitives used by the record layer and ticket service.
//!
//! Thin wrappers over the RustCrypto stack: AES-256 in CBC (PKCS7) and
//! single-block ECB/CBC modes, HMAC-SHA256, SHA-256, and constant-time
//! comparison. All tag and MAC checks in the crate go through [`ct_eq`] so
//! that verification rejects uniformly regardless of which byte differs.

use crate::error::{Result, TransportError};
use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecrypt, BlockDecryptMut, BlockEncrypt,
    BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::Aes256;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-256-CBC encrypt with PKCS7 padding.
///
/// A full pad block is appended when the input is already block-aligned, so
/// the ciphertext length is always the smallest multiple of 16 strictly
/// greater than the plaintext length.
pub fn cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-256-CBC decrypt with PKCS7 padding removal.
///
/// # Errors
/// Returns [`TransportError::DecryptionFailure`] on invalid padding. Callers
/// must not distinguish this from a MAC failure in anything peer-visible.
pub fn cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| TransportError::DecryptionFailure)
}

/// AES-256-ECB encrypt of exactly one block, no padding.
pub fn ecb_encrypt_block(key: &[u8; 32], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes256::new(key.into());
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// AES-256-ECB decrypt of exactly one block, no padding.
pub fn ecb_decrypt_block(key: &[u8; 32], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes256::new(key.into());
    let mut out = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut out);
    out.into()
}

/// Single-block AES-256-CBC encrypt without padding (IV XOR then ECB).
/// Used for ticket ids, where the 16-byte plaintext must map to exactly
/// 16 bytes of ciphertext.
pub fn cbc_encrypt_block(key: &[u8; 32], iv: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let mut xored = [0u8; 16];
    for i in 0..16 {
        xored[i] = block[i] ^ iv[i];
    }
    ecb_encrypt_block(key, &xored)
}

/// Single-block AES-256-CBC decrypt without padding.
pub fn cbc_decrypt_block(key: &[u8; 32], iv: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let mut out = ecb_decrypt_block(key, block);
    for i in 0..16 {
        out[i] ^= iv[i];
    }
    out
}

/// HMAC-SHA256 over a sequence of chunks, avoiding intermediate
/// concatenation buffers on the frame hot path.
pub fn hmac_sha256(key: &[u8], chunks: &[&[u8]]) -> [u8; 32] {
    // HMAC accepts keys of any length. Qualified call: `KeyInit` is also in
    // scope for the AES constructors and supplies a `new_from_slice` too.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC key length");
    for chunk in chunks {
        mac.update(chunk);
    }
    mac.finalize().into_bytes().into()
}

/// SHA-256 digest
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Constant-time equality for tags, MACs, and key-confirmation proofs.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Cryptographically secure random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_always_pads_full_block() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        for len in [1usize, 15, 16, 17, 32, 100] {
            let plaintext = vec![0xAB; len];
            let ct = cbc_encrypt(&key, &iv, &plaintext);
            assert_eq!(ct.len(), ((len + 16) >> 4) << 4);
            let pt = cbc_decrypt(&key, &iv, &ct).unwrap();
            assert_eq!(pt, plaintext);
        }
    }

    #[test]
    fn ecb_block_roundtrip() {
        let key = [3u8; 32];
        let block = *b"0123456789abcdef";
        let ct = ecb_encrypt_block(&key, &block);
        assert_ne!(ct, block);
        assert_eq!(ecb_decrypt_block(&key, &ct), block);
    }

    #[test]
    fn cbc_block_matches_padded_prefix() {
        // Single-block no-pad CBC must agree with the first block of padded CBC
        let key = [5u8; 32];
        let iv = [8u8; 16];
        let block = [0x42u8; 16];
        let unpadded = cbc_encrypt_block(&key, &iv, &block);
        let padded = cbc_encrypt(&key, &iv, &block);
        assert_eq!(&padded[..16], &unpadded[..]);
        assert_eq!(cbc_decrypt_block(&key, &iv, &unpadded), block);
    }

    #[test]
    fn hmac_chunking_is_equivalent() {
        let key = b"mac key";
        let whole = hmac_sha256(key, &[b"hello world"]);
        let split = hmac_sha256(key, &[b"hello", b" ", b"world"]);
        assert_eq!(whole, split);
    }

    #[test]
    fn ct_eq_rejects_different_lengths() {
        assert!(!ct_eq(b"abc", b"abcd"));
        assert!(ct_eq(b"abc", b"abc"));
    }
}
