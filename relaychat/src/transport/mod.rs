//! Transport layer abstraction for `RelayChat`.
//!
//! Defines the [`Transport`] trait the delivery session sends through, and
//! the [`TransportEvent`] stream every transport feeds back. Concrete
//! implementations:
//! - [`loopback::LoopbackTransport`]: in-process channel pair for testing
//! - [`ws::WsTransport`]: WebSocket client with automatic reconnection

pub mod loopback;
pub mod ws;

use std::fmt;

use relaychat_proto::codec::CodecError;
use relaychat_proto::frame::{ClientFrame, ServerFrame};

use crate::connection::LifecycleEvent;

/// Describes which kind of transport is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// WebSocket connection to a relay.
    WebSocket,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "WebSocket"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Everything a transport reports back to the session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection lifecycle change.
    Lifecycle(LifecycleEvent),
    /// A frame from the relay.
    Frame(ServerFrame),
    /// The transport gave up and will produce no further events.
    Closed,
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// There is no live connection to send on.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async transport the delivery session sends frames through.
///
/// Delivery is at most once per call: `Ok(())` means the frame was handed
/// to the underlying connection, not that the relay received it. The
/// session builds its guarantees on relay acknowledgments, never on this
/// return value.
pub trait Transport: Send + Sync {
    /// Send one frame to the relay.
    fn send(
        &self,
        frame: &ClientFrame,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Return the type of this transport.
    fn transport_type(&self) -> TransportType;
}
