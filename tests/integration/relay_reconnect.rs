// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Reconnection tests: a delivery session over `WsTransport` losing and
//! regaining its relay connection.
//!
//! These tests validate:
//! - the session moves through `Reconnecting` back to `Connected` on its own
//! - sends while disconnected are refused with `NotConnected`
//! - messages broadcast during the outage arrive through history resync
//! - a relay close frame is treated as a lost connection
//! - a bounded reconnect budget ends in `Disconnected`
//!
//! ## Disconnect simulation
//!
//! Aborting the relay's `JoinHandle` leaves existing WebSocket connections
//! alive on their own tasks. A **TCP proxy** sits between the client and the
//! relay instead; killing it aborts every proxied connection, which the
//! client's WebSocket layer sees as a lost connection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relaychat::config::ReconnectConfig;
use relaychat::connection::ConnectionState;
use relaychat::identity::Identity;
use relaychat::session::{DeliveryEvent, SendError, SessionConfig, SessionHandle, spawn_session};
use relaychat::transport::ws::WsTransport;
use relaychat_proto::message::ParticipantId;
use relaychat_relay::relay::RelayState;
use tokio::sync::mpsc;

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// A simple TCP proxy that forwards traffic between a client-facing port and
/// a backend (the real relay). Calling `kill()` aborts all tracked connection
/// tasks, which immediately tears down both directions of every proxied TCP
/// connection, causing the client's WebSocket layer to detect a disconnect.
struct TcpProxy {
    /// Address clients should connect to (127.0.0.1:<proxy_port>).
    pub client_addr: String,
    /// The acceptor task handle.
    accept_handle: tokio::task::JoinHandle<()>,
    /// All per-connection task handles. Aborting these kills the TCP streams.
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    /// Create a new TCP proxy from `proxy_port` to `backend_addr`.
    async fn new(proxy_port: u16, backend_addr: &str) -> Self {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{proxy_port}"))
            .await
            .unwrap_or_else(|e| panic!("proxy: failed to bind to port {proxy_port}: {e}"));
        let bound_addr = listener.local_addr().unwrap();
        let client_addr = format!("127.0.0.1:{}", bound_addr.port());
        let backend = backend_addr.to_string();
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let conn_handles_clone = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            loop {
                let (mut client_stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };

                let backend = backend.clone();
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) = tokio::net::TcpStream::connect(&backend).await
                    else {
                        return;
                    };

                    // Copy bidirectionally. When this task is aborted, both
                    // streams are dropped immediately, causing RST on both
                    // ends. We do NOT spawn sub-tasks so that abort propagates.
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });

                conn_handles_clone.lock().push(conn_handle);
            }
        });

        Self {
            client_addr,
            accept_handle,
            conn_handles,
        }
    }

    /// Kill the proxy, severing all connections immediately.
    fn kill(self) {
        // Abort the accept loop so no new connections are accepted.
        self.accept_handle.abort();
        // Abort all per-connection tasks, which drops the TcpStreams and
        // causes immediate RST on both ends.
        let handles = self.conn_handles.lock();
        for h in handles.iter() {
            h.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Find a free port by binding to 0 and recording the port.
async fn find_free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to port 0");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    // Brief pause to let the OS release the port.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Start relay on port 0 (OS-assigned), return (bound_addr_string, handle).
async fn start_relay() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = relaychat_relay::relay::start_server("127.0.0.1:0")
        .await
        .expect("failed to start relay server");
    (addr.to_string(), handle)
}

/// Fast reconnect settings for testing.
const fn fast_reconnect(max_attempts: Option<u32>) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(500),
        max_attempts,
    }
}

/// Spawn a session for `name` against `url`. Does not wait for the
/// connection.
fn spawn_participant(
    url: &str,
    name: &str,
    reconnect: ReconnectConfig,
) -> (SessionHandle, mpsc::UnboundedReceiver<DeliveryEvent>) {
    let (transport, transport_events) =
        WsTransport::spawn(url, Duration::from_secs(5), reconnect, 64);
    let identity = Identity::with_participant(ParticipantId::new(name));
    spawn_session(identity, SessionConfig::default(), transport, transport_events)
}

/// Wait for an event matching a predicate, with timeout.
///
/// Skips non-matching events. Panics on timeout or channel close.
async fn wait_for_event<F>(
    rx: &mut mpsc::UnboundedReceiver<DeliveryEvent>,
    timeout: Duration,
    description: &str,
    pred: F,
) -> DeliveryEvent
where
    F: Fn(&DeliveryEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(evt)) if pred(&evt) => return evt,
            Ok(Some(_other)) => continue,
            Ok(None) => panic!("channel closed while waiting for {description}"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

/// Wait for the session to report `state`.
async fn wait_for_state(rx: &mut mpsc::UnboundedReceiver<DeliveryEvent>, state: ConnectionState) {
    wait_for_event(rx, Duration::from_secs(15), &format!("state {state}"), |evt| {
        *evt == DeliveryEvent::ConnectionChanged(state)
    })
    .await;
}

// =============================================================================
// Tests
// =============================================================================

/// After the proxy is killed and recreated on the same port, the session
/// reconnects without outside help.
#[tokio::test]
async fn reconnect_after_connection_loss() {
    let (relay_addr, _relay_handle) = start_relay().await;
    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &relay_addr).await;
    let proxy_url = format!("ws://{}/ws", proxy.client_addr);

    let (alice, mut events) = spawn_participant(&proxy_url, "alice-r1", fast_reconnect(None));
    wait_for_state(&mut events, ConnectionState::Connected).await;

    proxy.kill();
    wait_for_state(&mut events, ConnectionState::Disconnected).await;
    wait_for_state(&mut events, ConnectionState::Reconnecting).await;

    let _proxy2 = TcpProxy::new(proxy_port, &relay_addr).await;
    wait_for_state(&mut events, ConnectionState::Connected).await;
    assert!(alice.is_connected());

    alice.shutdown().await;
}

/// A participant that was offline while others talked catches up through the
/// history replay on reconnect, and can send again afterwards.
#[tokio::test]
async fn outage_is_bridged_by_history_resync() {
    let (relay_addr, _relay_handle) = start_relay().await;
    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &relay_addr).await;
    let proxy_url = format!("ws://{}/ws", proxy.client_addr);
    let direct_url = format!("ws://{relay_addr}/ws");

    let (alice, mut alice_events) =
        spawn_participant(&proxy_url, "alice-r2", fast_reconnect(None));
    wait_for_state(&mut alice_events, ConnectionState::Connected).await;
    let (bob, mut bob_events) = spawn_participant(&direct_url, "bob-r2", fast_reconnect(None));
    wait_for_state(&mut bob_events, ConnectionState::Connected).await;

    proxy.kill();
    wait_for_state(&mut alice_events, ConnectionState::Disconnected).await;

    // Offline sends are refused outright.
    let err = alice.send("are you there?").await.unwrap_err();
    assert!(matches!(err, SendError::NotConnected));

    // Bob talks while alice is away.
    let missed = bob.send("you missed this").await.unwrap();
    wait_for_event(&mut bob_events, Duration::from_secs(5), "bob Delivered", |evt| {
        matches!(evt, DeliveryEvent::Delivered { message_id } if *message_id == missed.id)
    })
    .await;

    let _proxy2 = TcpProxy::new(proxy_port, &relay_addr).await;
    wait_for_state(&mut alice_events, ConnectionState::Connected).await;

    let synced = wait_for_event(
        &mut alice_events,
        Duration::from_secs(5),
        "HistorySynced with missed message",
        |evt| {
            matches!(evt, DeliveryEvent::HistorySynced { admitted, .. }
                if admitted.iter().any(|m| m.id == missed.id))
        },
    )
    .await;
    let DeliveryEvent::HistorySynced { admitted, .. } = synced else {
        unreachable!()
    };
    assert_eq!(admitted.len(), 1);

    // Sending works again and reaches bob.
    let back = alice.send("back online").await.unwrap();
    wait_for_event(&mut alice_events, Duration::from_secs(5), "alice Delivered", |evt| {
        matches!(evt, DeliveryEvent::Delivered { message_id } if *message_id == back.id)
    })
    .await;
    wait_for_event(&mut bob_events, Duration::from_secs(5), "bob receives", |evt| {
        matches!(evt, DeliveryEvent::Appended { message, .. } if message.id == back.id)
    })
    .await;

    let snap = alice.snapshot().await.unwrap();
    assert_eq!(
        snap.timeline.iter().filter(|m| m.id == missed.id).count(),
        1
    );

    alice.shutdown().await;
    bob.shutdown().await;
}

/// A close frame from the relay counts as a lost connection; the session
/// reconnects to the same relay and resyncs.
#[tokio::test]
async fn relay_close_frame_triggers_reconnect() {
    let state = Arc::new(RelayState::new());
    let (addr, _relay_handle) =
        relaychat_relay::relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .expect("failed to start relay server");
    let url = format!("ws://{addr}/ws");

    let (alice, mut events) = spawn_participant(&url, "alice-r4", fast_reconnect(None));
    wait_for_state(&mut events, ConnectionState::Connected).await;
    let sent = alice.send("before close").await.unwrap();
    wait_for_event(&mut events, Duration::from_secs(5), "Delivered", |evt| {
        matches!(evt, DeliveryEvent::Delivered { message_id } if *message_id == sent.id)
    })
    .await;

    state.close_all_connections().await;
    wait_for_state(&mut events, ConnectionState::Disconnected).await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    // The replayed history holds only what alice already has.
    let snap = alice.snapshot().await.unwrap();
    assert_eq!(snap.timeline.len(), 1);
    assert!(snap.pending.is_empty());

    alice.shutdown().await;
}

/// With a bounded reconnect budget and no relay to reach, the session ends
/// up `Disconnected` and stays there.
#[tokio::test]
async fn gives_up_after_max_attempts() {
    let (relay_addr, _relay_handle) = start_relay().await;
    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &relay_addr).await;
    let proxy_url = format!("ws://{}/ws", proxy.client_addr);

    let (alice, mut events) = spawn_participant(&proxy_url, "alice-r3", fast_reconnect(Some(2)));
    wait_for_state(&mut events, ConnectionState::Connected).await;

    proxy.kill();
    wait_for_state(&mut events, ConnectionState::Disconnected).await;
    wait_for_state(&mut events, ConnectionState::Reconnecting).await;
    wait_for_state(&mut events, ConnectionState::Disconnected).await;

    // The transport is done; nothing brings the session back.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(alice.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(
        alice.send("hello?").await,
        Err(SendError::NotConnected)
    ));

    alice.shutdown().await;
}
