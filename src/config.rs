//! # Configuration Management
//!
//! Centralized configuration for the secure session transport.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment variable overrides via `from_env()`
//!
//! ## Security Considerations
//! - The timestamp window bounds replay risk for signed handshake proofs
//! - Ticket TTL bounds how long a stolen ticket stays redeemable
//! - The frame length cap prevents a peer from forcing huge allocations

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Current supported protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Max allowed frame payload size (16 MB)
pub const MAX_FRAME_LENGTH: u32 = 16 * 1024 * 1024;

/// Largest ticket count a client may request in a single packet
pub const TICKET_REQUEST_MAX: u32 = 1024;

/// Transport configuration shared by the record layer, handshake
/// coordinator, and ticket service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Protocol version stamped into every frame header
    pub version: u8,

    /// Require the first frame of every stream to be a HELLO packet
    pub required_hello_packet: bool,

    /// Maximum declared frame payload length accepted on read
    pub max_frame_length: u32,

    /// Maximum age of a signed handshake timestamp, in milliseconds
    pub timestamp_window_ms: u64,

    /// Tolerated clock skew into the future, in milliseconds
    pub future_skew_ms: u64,

    /// Session resumption ticket time-to-live, in seconds
    pub ticket_ttl_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            required_hello_packet: false,
            max_frame_length: MAX_FRAME_LENGTH,
            timestamp_window_ms: 30_000,
            future_skew_ms: 2_000,
            ticket_ttl_secs: 24 * 3600,
        }
    }
}

impl TransportConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| TransportError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| TransportError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TransportError::ConfigError(format!("Failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(hello) = std::env::var("SECURE_TRANSPORT_REQUIRED_HELLO") {
            config.required_hello_packet = hello == "1" || hello.eq_ignore_ascii_case("true");
        }

        if let Ok(window) = std::env::var("SECURE_TRANSPORT_TIMESTAMP_WINDOW_MS") {
            if let Ok(val) = window.parse::<u64>() {
                config.timestamp_window_ms = val;
            }
        }

        if let Ok(ttl) = std::env::var("SECURE_TRANSPORT_TICKET_TTL_SECS") {
            if let Ok(val) = ttl.parse::<u64>() {
                config.ticket_ttl_secs = val;
            }
        }

        if let Ok(max) = std::env::var("SECURE_TRANSPORT_MAX_FRAME_LENGTH") {
            if let Ok(val) = max.parse::<u32>() {
                config.max_frame_length = val;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(TransportError::ConfigError(format!(
                "Unsupported protocol version {}",
                self.version
            )));
        }
        if self.max_frame_length == 0 {
            return Err(TransportError::ConfigError(
                "max_frame_length must be non-zero".into(),
            ));
        }
        if self.ticket_ttl_secs == 0 {
            return Err(TransportError::ConfigError(
                "ticket_ttl_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Timestamp freshness window as a [`Duration`]
    pub fn timestamp_window(&self) -> Duration {
        Duration::from_millis(self.timestamp_window_ms)
    }

    /// Ticket TTL as a [`Duration`]
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, PROTOCOL_VERSION);
        assert!(!config.required_hello_packet);
    }

    #[test]
    fn toml_roundtrip() {
        let config = TransportConfig::from_toml(
            r#"
            required_hello_packet = true
            ticket_ttl_secs = 600
            "#,
        )
        .unwrap();
        assert!(config.required_hello_packet);
        assert_eq!(config.ticket_ttl_secs, 600);
        assert_eq!(config.max_frame_length, MAX_FRAME_LENGTH);
    }

    #[test]
    fn rejects_zero_ttl() {
        let result = TransportConfig::from_toml("ticket_ttl_secs = 0");
        assert!(result.is_err());
    }
}
