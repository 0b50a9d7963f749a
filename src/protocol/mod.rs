//! Wire protocol: record framing, the handshake state machine, and the
//! key-agreement primitives they are built on.

pub mod connection;
pub mod ecdh;
pub mod frame;
pub mod handshake;
pub mod packet;
pub mod srp;
