//! `RelayChat` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, acknowledges and broadcasts submitted
//! messages, and replays recent history to every new connection.

pub mod config;
pub mod history;
pub mod relay;
