//! Request and response payload types.

pub mod handshake;
pub mod message;
