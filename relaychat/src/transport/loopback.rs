//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a network
//! connection. [`LoopbackTransport::create_pair`] returns the client end, the
//! [`LoopbackRelay`] end a test drives to play the relay, and the event
//! receiver to hand to the session. Frames are passed through the codec in
//! both directions so encoding problems surface here too.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use relaychat_proto::codec;
use relaychat_proto::frame::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportEvent, TransportType};
use crate::connection::LifecycleEvent;

/// Client end of a loopback pair.
pub struct LoopbackTransport {
    /// Encoded frames toward the relay end.
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Shared with the relay end; sends fail while `false`.
    up: Arc<AtomicBool>,
}

/// Relay end of a loopback pair.
pub struct LoopbackRelay {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::Sender<TransportEvent>,
    up: Arc<AtomicBool>,
}

impl LoopbackTransport {
    /// Create a connected loopback pair.
    ///
    /// The link starts down; call [`LoopbackRelay::connect`] to bring it up.
    /// `buffer` is the capacity of the event channel toward the session.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use relaychat::transport::loopback::LoopbackTransport;
    /// use relaychat::transport::Transport;
    /// use relaychat_proto::frame::ClientFrame;
    ///
    /// # async fn example() {
    /// let (client, mut relay, _events) = LoopbackTransport::create_pair(32);
    /// relay.connect().await;
    /// client.send(&ClientFrame::RequestSync).await.unwrap();
    /// assert_eq!(relay.next_frame().await, Some(ClientFrame::RequestSync));
    /// # }
    /// ```
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, LoopbackRelay, mpsc::Receiver<TransportEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let up = Arc::new(AtomicBool::new(false));

        let client = Self {
            outbound: outbound_tx,
            up: Arc::clone(&up),
        };
        let relay = LoopbackRelay {
            inbound: outbound_rx,
            events: events_tx,
            up,
        };
        (client, relay, events_rx)
    }
}

impl Transport for LoopbackTransport {
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let bytes = codec::encode_client(frame)?;
        self.outbound
            .send(bytes)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

impl LoopbackRelay {
    async fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }

    /// Bring the link up and report the initial `connect`.
    pub async fn connect(&self) {
        self.up.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Lifecycle(LifecycleEvent::Connect))
            .await;
    }

    /// Take the link down and report `disconnect`.
    pub async fn disconnect(&self) {
        self.up.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Lifecycle(LifecycleEvent::Disconnect))
            .await;
    }

    /// Report a reconnection attempt without changing the link.
    pub async fn reconnect_attempt(&self, attempt: u32) {
        self.emit(TransportEvent::Lifecycle(LifecycleEvent::ReconnectAttempt {
            attempt,
        }))
        .await;
    }

    /// Bring the link back up and report `reconnect`.
    pub async fn reconnect(&self) {
        self.up.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Lifecycle(LifecycleEvent::Reconnect))
            .await;
    }

    /// Push a frame to the client, as the relay would.
    pub async fn deliver(&self, frame: ServerFrame) {
        let frame = match codec::encode_server(&frame).and_then(|b| codec::decode_server(&b)) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "loopback failed to encode server frame");
                return;
            }
        };
        self.emit(TransportEvent::Frame(frame)).await;
    }

    /// Next frame the client sent, or `None` once the client end is dropped.
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        loop {
            let bytes = self.inbound.recv().await?;
            match codec::decode_client(&bytes) {
                Ok(frame) => return Some(frame),
                Err(e) => tracing::warn!(error = %e, "loopback dropped undecodable frame"),
            }
        }
    }

    /// A frame the client already sent, without waiting.
    pub fn try_next_frame(&mut self) -> Option<ClientFrame> {
        while let Ok(bytes) = self.inbound.try_recv() {
            if let Ok(frame) = codec::decode_client(&bytes) {
                return Some(frame);
            }
        }
        None
    }

    /// Every frame the client has sent so far, without waiting.
    pub fn drain_frames(&mut self) -> Vec<ClientFrame> {
        std::iter::from_fn(|| self.try_next_frame()).collect()
    }

    /// Whether the link is currently up.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}
