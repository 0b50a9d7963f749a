//! Supporting utilities for the transport core.

pub mod replay;
