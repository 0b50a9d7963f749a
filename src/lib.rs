//! # Secure Session Transport
//!
//! A TLS-like session transport for end-to-end encrypted backends: record
//! framing with authenticated encryption, a multiplexed handshake with
//! several authentication methods, and single-use ticket resumption.
//!
//! ## Layers
//! - **Record layer** ([`protocol::frame`]): framed reads/writes with an
//!   encrypted header block doubling as the body IV, sequence-bound header
//!   tags, and truncated HMAC body MACs.
//! - **Key schedule** ([`core::schedule`]): a TLS-style PRF expands any
//!   flow's premaster secret into a master secret and the per-direction
//!   cipher states.
//! - **Handshake** ([`protocol::handshake`]): one coordinator per role,
//!   dispatching the tagged handshake packet union: anonymous and signed
//!   ECDH, SRP-6a password login, keystore-pinned ECDH, key-possession
//!   login, session resumption, and ticket issuance/redemption.
//! - **Services** ([`service`]): the login, session, and ticket
//!   collaborators the server coordinator delegates to.
//!
//! ## Example
//! ```no_run
//! use secure_transport::config::TransportConfig;
//! use secure_transport::protocol::connection::{Connection, DiscardHandler};
//! use secure_transport::protocol::handshake::ClientHandshake;
//!
//! # async fn run() -> secure_transport::error::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:4433").await?;
//! let (mut reader, writer) = tokio::io::split(stream);
//!
//! let config = TransportConfig::default();
//! let driver = ClientHandshake::new(Some("client/1.0".into()));
//! let mut connection = Connection::new(&config, writer, driver, DiscardHandler);
//!
//! let (mut channel, driver) = connection.parts();
//! driver.start_ecdhe(&mut channel).await?;
//! connection.process(&mut reader).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod utils;

pub use config::TransportConfig;
pub use error::{Result, TransportError};
pub use protocol::connection::{ApplicationHandler, Connection, DiscardHandler};
pub use protocol::frame::{Channel, FrameCodec, Record};
pub use protocol::handshake::{ClientHandshake, HandshakeDriver, ServerContext, ServerHandshake};
pub use protocol::packet::{ContentType, HandshakePacket};
