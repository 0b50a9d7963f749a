//! Per-direction cipher state and the pending/current slot machinery.
//!
//! Every connection owns four slots: `current.read`, `current.write`,
//! `pending.read`, `pending.write`. The key schedule only ever populates
//! `pending`; a CHANGE_CIPHER_SPEC transition promotes pending to current
//! for one direction. Sequence numbers start at 0 for every fresh state and
//! are never reset except by replacing the state object.

use crate::error::{constants, Result, TransportError};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key material plus the per-frame sequence counter for one direction.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherState {
    /// AES-256 record key
    pub key: [u8; 32],
    /// HMAC-SHA256 record MAC key
    pub mac_key: [u8; 32],
    /// Frames sent or received under this state so far
    pub sequence: u64,
}

impl CipherState {
    /// Create a fresh state with the sequence counter at zero.
    pub fn new(key: [u8; 32], mac_key: [u8; 32]) -> Self {
        Self {
            key,
            mac_key,
            sequence: 0,
        }
    }

    /// Current sequence number as the big-endian prefix used in tag and MAC
    /// computations.
    pub fn sequence_bytes(&self) -> [u8; 8] {
        self.sequence.to_be_bytes()
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material is deliberately not printed
        f.debug_struct("CipherState")
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Read/write pair of optional cipher states. `None` means uninitialized,
/// i.e. that direction runs in plaintext.
#[derive(Debug, Default)]
pub struct DirectionStates {
    pub read: Option<CipherState>,
    pub write: Option<CipherState>,
}

/// The four cipher slots of a connection with explicit activation
/// transitions. Direct field reassignment from outside this type is not
/// part of the model.
#[derive(Debug, Default)]
pub struct CipherSuite {
    pub current: DirectionStates,
    pub pending: DirectionStates,
}

impl CipherSuite {
    /// Install a freshly derived read/write pair into the pending slots.
    /// Never touches `current`.
    pub fn set_pending(&mut self, read: CipherState, write: CipherState) {
        self.pending.read = Some(read);
        self.pending.write = Some(write);
    }

    /// Promote `pending.read` to `current.read`.
    ///
    /// # Errors
    /// Fails if no pending read state has been derived.
    pub fn activate_read(&mut self) -> Result<()> {
        let state = self
            .pending
            .read
            .take()
            .ok_or(TransportError::CipherState(constants::ERR_NO_PENDING_READ))?;
        self.current.read = Some(state);
        Ok(())
    }

    /// Promote `pending.write` to `current.write`.
    ///
    /// # Errors
    /// Fails if no pending write state has been derived.
    pub fn activate_write(&mut self) -> Result<()> {
        let state = self
            .pending
            .write
            .take()
            .ok_or(TransportError::CipherState(constants::ERR_NO_PENDING_WRITE))?;
        self.current.write = Some(state);
        Ok(())
    }

    /// Whether frames written now would be encrypted.
    pub fn write_active(&self) -> bool {
        self.current.write.is_some()
    }

    /// Whether frames read now are expected to be encrypted.
    pub fn read_active(&self) -> bool {
        self.current.read.is_some()
    }

    /// Whether a pending write state is waiting for activation.
    pub fn pending_write_ready(&self) -> bool {
        self.pending.write.is_some()
    }
}
