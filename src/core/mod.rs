//! Core building blocks: symmetric primitives, cipher state slots, the key
//! schedule, and the structured payload codec.

pub mod cipher;
pub mod codec;
pub mod crypto;
pub mod schedule;
