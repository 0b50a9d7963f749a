//! # Error Types
//!
//! Error handling for the secure session transport.
//!
//! Errors fall into three classes:
//! - **Protocol errors**: bad version, bad header tag, bad record MAC,
//!   malformed headers or packets. Always connection-fatal: an ALERT frame is
//!   sent and the connection is torn down.
//! - **Authentication errors**: SRP proof mismatch, bad signatures, stale or
//!   reused nonces, unknown or expired tickets, unknown sessions. Reported to
//!   the peer as a structured error; the transport itself may keep running.
//! - **Alert**: an explicit peer-initiated abort, always fatal.
//!
//! Anything unexpected coming out of a login/ticket collaborator is converted
//! to [`TransportError::Internal`] at the dispatch boundary so that internals
//! never leak onto the wire.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
pub mod constants {
    /// Record layer errors
    pub const ERR_INVALID_FRAME_TAG: &str = "Invalid frame TAG";
    pub const ERR_INVALID_FRAME_MAC: &str = "Invalid frame MAC";
    pub const ERR_HELLO_REQUIRED: &str = "Hello packet required";
    pub const ERR_INVALID_HEADER: &str = "Invalid frame header";
    pub const ERR_OVERSIZED_FRAME: &str = "Frame exceeds maximum length";

    /// Cipher state errors
    pub const ERR_NO_PENDING_READ: &str = "No pending read cipher state";
    pub const ERR_NO_PENDING_WRITE: &str = "No pending write cipher state";

    /// Handshake errors
    pub const ERR_INVALID_TIMESTAMP: &str = "Invalid or stale timestamp";
    pub const ERR_NONCE_REUSED: &str = "Nonce already used";
    pub const ERR_INVALID_SIGNATURE: &str = "Invalid signature";
    pub const ERR_SRP_PROOF_MISMATCH: &str = "Password proof mismatch";
    pub const ERR_UNKNOWN_SESSION: &str = "Unknown session";
    pub const ERR_INVALID_TICKET: &str = "invalid ticket";
    pub const ERR_UNKNOWN_KEY_ID: &str = "Unknown key id";
    pub const ERR_KEY_MISMATCH: &str = "Key confirmation failed";
    pub const ERR_NOT_AUTHENTICATED: &str = "Connection is not authenticated";

    /// System errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
}

/// The primary error type for all transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown content type: {0}")]
    UnknownContentType(u8),

    #[error("Invalid frame TAG")]
    InvalidFrameTag,

    #[error("Invalid frame MAC")]
    InvalidFrameMac,

    #[error("Hello packet required")]
    HelloRequired,

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Invalid frame header")]
    InvalidHeader,

    #[error("Malformed handshake packet: {0}")]
    MalformedPacket(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Cipher state error: {0}")]
    CipherState(&'static str),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Peer alert: {0}")]
    Alert(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error")]
    Internal,
}

impl TransportError {
    /// Whether this error must tear down the whole connection.
    ///
    /// Protocol-level failures (framing, MAC, malformed packets) and peer
    /// alerts are fatal. Authentication failures abort only the current
    /// exchange: an ALERT is sent but cipher state activated earlier on the
    /// same connection stays valid.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TransportError::Authentication(_) | TransportError::Internal
        )
    }

    /// Shorthand for an authentication failure with a static message.
    pub fn auth(msg: &str) -> Self {
        TransportError::Authentication(msg.to_string())
    }
}

/// Type alias for Results using TransportError
pub type Result<T> = std::result::Result<T, TransportError>;
