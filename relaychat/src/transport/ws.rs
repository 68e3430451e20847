//! WebSocket transport with automatic reconnection.
//!
//! [`WsTransport::spawn`] starts a supervisor task that owns the connection
//! to the relay. The supervisor:
//! 1. connects with the initial-connection timeout,
//! 2. reports `Connect` (first time) or `Reconnect` (afterwards),
//! 3. forwards every decoded [`ServerFrame`](relaychat_proto::frame::ServerFrame)
//!    as a [`TransportEvent::Frame`],
//! 4. on loss reports `Disconnect`, then retries with exponential backoff,
//!    reporting `ReconnectAttempt` before each try.
//!
//! Lifecycle events and frames share one channel, so the session always sees
//! `Connect` before the first frame of a connection and `Disconnect` after
//! its last.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relaychat_proto::codec;
use relaychat_proto::frame::ClientFrame;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Transport, TransportError, TransportEvent, TransportType};
use crate::config::ReconnectConfig;
use crate::connection::LifecycleEvent;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;

/// Type alias for the read half of a WebSocket connection.
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// WebSocket client transport implementing [`Transport`].
///
/// Sends go straight to the current connection's write half; while the
/// supervisor is between connections they fail with
/// [`TransportError::ConnectionClosed`].
pub struct WsTransport {
    /// The relay server URL (ws:// or wss://).
    relay_url: String,
    /// Write half of the live connection, `None` while disconnected.
    ws_sender: Arc<Mutex<Option<WsSender>>>,
    /// Supervisor task; aborted when the transport is dropped.
    supervisor: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    /// Start connecting to `relay_url` in the background.
    ///
    /// Returns the transport and the event receiver to hand to the session.
    /// `event_buffer` bounds the event channel.
    #[must_use]
    pub fn spawn(
        relay_url: &str,
        connect_timeout: Duration,
        reconnect: ReconnectConfig,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(event_buffer);
        let ws_sender = Arc::new(Mutex::new(None));
        let supervisor = tokio::spawn(supervise(
            relay_url.to_string(),
            connect_timeout,
            reconnect,
            Arc::clone(&ws_sender),
            events_tx,
        ));
        let transport = Self {
            relay_url: relay_url.to_string(),
            ws_sender,
            supervisor,
        };
        (transport, events_rx)
    }

    /// Return the relay server URL this transport connects to.
    #[must_use]
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Stop the supervisor. No further events are produced.
    pub fn close(&self) {
        self.supervisor.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl Transport for WsTransport {
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let bytes = codec::encode_client(frame)?;
        let mut guard = self.ws_sender.lock().await;
        let Some(sender) = guard.as_mut() else {
            return Err(TransportError::ConnectionClosed);
        };
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::debug!(err = %e, "websocket send failed");
                map_ws_error(e)
            })
    }

    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }
}

/// Connection supervisor: connect, pump frames, back off, repeat.
async fn supervise(
    url: String,
    connect_timeout: Duration,
    reconnect: ReconnectConfig,
    ws_sender: Arc<Mutex<Option<WsSender>>>,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut has_connected = false;
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let event = LifecycleEvent::ReconnectAttempt { attempt };
            if events.send(TransportEvent::Lifecycle(event)).await.is_err() {
                return;
            }
        }

        match connect(&url, connect_timeout).await {
            Ok(stream) => {
                let (sink, reader) = stream.split();
                *ws_sender.lock().await = Some(sink);

                let event = if has_connected {
                    LifecycleEvent::Reconnect
                } else {
                    LifecycleEvent::Connect
                };
                has_connected = true;
                attempt = 0;
                tracing::info!(url = %url, "connected to relay");
                if events.send(TransportEvent::Lifecycle(event)).await.is_err() {
                    return;
                }

                let session_alive = pump_frames(reader, &events).await;
                ws_sender.lock().await.take();
                if !session_alive {
                    return;
                }

                tracing::warn!(url = %url, "relay connection lost");
                let event = LifecycleEvent::Disconnect;
                if events.send(TransportEvent::Lifecycle(event)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, attempt, error = %e, "relay connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        if reconnect.max_attempts.is_some_and(|max| attempt > max) {
            tracing::warn!(url = %url, attempts = attempt - 1, "giving up on relay");
            let _ = events.send(TransportEvent::Closed).await;
            return;
        }
        let delay = reconnect.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis(), "backing off before reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Establish one WebSocket connection within `timeout`.
async fn connect(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_error)?;
    Ok(stream)
}

/// Forward frames until the connection ends.
///
/// Returns `false` if the session dropped its event receiver.
async fn pump_frames(mut reader: WsReader, events: &mpsc::Sender<TransportEvent>) -> bool {
    while let Some(msg) = reader.next().await {
        match msg {
            Ok(Message::Binary(data)) => match codec::decode_server(&data) {
                Ok(frame) => {
                    if events.send(TransportEvent::Frame(frame)).await.is_err() {
                        return false;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable frame from relay");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay sent close frame");
                break;
            }
            Ok(_) => {
                // Text, ping and pong frames carry nothing for us.
            }
            Err(e) => {
                tracing::warn!(err = %e, "websocket read error");
                break;
            }
        }
    }
    true
}

/// Map a tungstenite error to a [`TransportError`].
fn map_ws_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::Io(io) => TransportError::Io(io),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed
        }
        other => TransportError::WebSocket(other.to_string()),
    }
}
