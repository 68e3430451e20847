//! Shared protocol definitions for the `RelayChat` wire format.

pub mod codec;
pub mod frame;
pub mod message;
