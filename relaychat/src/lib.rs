//! `RelayChat`: reliable message delivery over a broadcast relay.
//!
//! The client side of the system: a [`session::DeliverySession`] turns
//! user text into acknowledged, deduplicated broadcast messages and keeps a
//! consistent timeline across any number of reconnects.

pub mod config;
pub mod connection;
pub mod delivery;
pub mod identity;
pub mod session;
pub mod timeline;
pub mod transport;
