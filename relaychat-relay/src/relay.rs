//! Relay server core: shared state, WebSocket handler, connection registry,
//! acknowledgment and fan-out.
//!
//! Every accepted WebSocket is registered under a connection id. Messages a
//! client submits are validated, stamped, appended to the [`ReplayBuffer`],
//! acknowledged to the sender and broadcast to every connection (the sender
//! included). New connections are sent the replay buffer straight away.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use relaychat_proto::codec;
use relaychat_proto::frame::{Ack, ClientFrame, ServerFrame};
use relaychat_proto::message::{MAX_MESSAGE_SIZE, Message, Timestamp};
use tokio::sync::{RwLock, mpsc};

use crate::history::ReplayBuffer;

/// Identifies one WebSocket connection for the lifetime of the server.
pub type ConnectionId = u64;

/// Shared relay server state holding the connection registry and replay
/// buffer.
pub struct RelayState {
    /// Maps each live connection to the channel feeding its writer task.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<WsMessage>>>,
    /// Recently broadcast messages, replayed to new connections.
    pub history: ReplayBuffer,
    /// Maximum accepted message text size in bytes.
    max_payload_size: usize,
    next_connection_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with an empty registry and the default
    /// payload and history limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MAX_MESSAGE_SIZE, ReplayBuffer::new())
    }

    /// Creates a new relay state with a custom payload size limit and replay
    /// buffer.
    #[must_use]
    pub fn with_config(max_payload_size: usize, history: ReplayBuffer) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            history,
            max_payload_size,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection and returns its id.
    pub async fn register(&self, sender: mpsc::UnboundedSender<WsMessage>) -> ConnectionId {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Removes a connection from the registry, returning the sender if it
    /// existed.
    pub async fn unregister(&self, id: ConnectionId) -> Option<mpsc::UnboundedSender<WsMessage>> {
        self.connections.write().await.remove(&id)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Each writer task forwards the close frame, which the client reader
    /// sees as a disconnection.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, sender) in conns.iter() {
            tracing::info!(connection = id, "sending close frame");
            let _ = sender.send(WsMessage::Close(None));
        }
    }

    /// Queue `frame` for one connection.
    async fn send_to(&self, id: ConnectionId, frame: &ServerFrame) {
        let Some(bytes) = encode_frame(frame) else {
            return;
        };
        if let Some(sender) = self.connections.read().await.get(&id) {
            let _ = sender.send(WsMessage::Binary(bytes.into()));
        }
    }

    /// Queue `frame` for every connection.
    async fn broadcast(&self, frame: &ServerFrame) {
        let Some(bytes) = encode_frame(frame) else {
            return;
        };
        let payload = axum::body::Bytes::from(bytes);
        let conns = self.connections.read().await;
        for sender in conns.values() {
            let _ = sender.send(WsMessage::Binary(payload.clone()));
        }
    }

    /// Tell everyone how many participants are connected.
    async fn broadcast_user_count(&self) {
        let count = u32::try_from(self.connection_count().await).unwrap_or(u32::MAX);
        self.broadcast(&ServerFrame::UserCount(count)).await;
    }
}

fn encode_frame(frame: &ServerFrame) -> Option<Vec<u8>> {
    match codec::encode_server(frame) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server frame");
            None
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Register the connection.
/// 2. Push the replay buffer and broadcast the new participant count.
/// 3. Process client frames until either side closes.
/// 4. Unregister and broadcast the new participant count.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel feeding this connection's WebSocket writer.
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let conn_id = state.register(tx).await;
    tracing::info!(connection = conn_id, "participant connected");

    let replay = state.history.snapshot().await;
    state
        .send_to(conn_id, &ServerFrame::SyncMessages(replay))
        .await;
    state.broadcast_user_count().await;

    // Writer: forward queued frames to the WebSocket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection = conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader: process frames from this participant.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Binary(data) => {
                    handle_binary_message(conn_id, &data, &reader_state).await;
                }
                WsMessage::Close(_) => {
                    tracing::info!(connection = conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn_id).await;
    tracing::info!(connection = conn_id, "participant disconnected");
    state.broadcast_user_count().await;
}

/// Handles a binary WebSocket message from a connection.
async fn handle_binary_message(conn_id: ConnectionId, data: &[u8], state: &Arc<RelayState>) {
    let frame = match codec::decode_client(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(connection = conn_id, error = %e, "failed to decode client frame");
            return;
        }
    };

    match frame {
        ClientFrame::SendMessage { message, attempt } => {
            accept_message(conn_id, message, attempt, state).await;
        }
        ClientFrame::RequestSync => {
            let replay = state.history.snapshot().await;
            tracing::debug!(connection = conn_id, count = replay.len(), "sync requested");
            state
                .send_to(conn_id, &ServerFrame::SyncMessages(replay))
                .await;
        }
    }
}

/// Validate, record, acknowledge and broadcast one submitted message.
///
/// Resubmission of an id already in the replay buffer is acknowledged again
/// but not broadcast a second time.
async fn accept_message(
    conn_id: ConnectionId,
    message: Message,
    attempt: u32,
    state: &Arc<RelayState>,
) {
    let id = message.id.clone();

    if let Err(e) = message.validate_with_limit(state.max_payload_size) {
        tracing::warn!(connection = conn_id, message_id = %id, error = %e, "rejecting message");
        let nack = Ack::rejected(id, attempt, e.to_string());
        state.send_to(conn_id, &ServerFrame::Ack(nack)).await;
        return;
    }

    let stamped = message.stamped(Timestamp::now());
    let is_new = state.history.append(stamped.clone()).await;

    let ack = Ack::accepted(id.clone(), attempt);
    state.send_to(conn_id, &ServerFrame::Ack(ack)).await;

    if is_new {
        tracing::debug!(connection = conn_id, message_id = %id, attempt, "broadcasting message");
        state.broadcast(&ServerFrame::ReceiveMessage(stamped)).await;
    } else {
        tracing::debug!(connection = conn_id, message_id = %id, attempt, "duplicate submission acknowledged");
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_config`] to create a state with custom payload
/// and history limits from the resolved [`crate::config::RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });
    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
