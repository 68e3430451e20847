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

//! End-to-end tests: delivery sessions over real WebSockets to an in-process
//! relay.
//!
//! These tests validate:
//! - a message one participant sends reaches every participant once
//! - the sender gets `Delivered` and sees no duplicate from the relay echo
//! - a participant joining later receives the history as a replay batch
//! - participant counts follow connections
//! - a relay rejection drives the retry path to a terminal failure

use std::sync::Arc;
use std::time::Duration;

use relaychat::config::ReconnectConfig;
use relaychat::connection::ConnectionState;
use relaychat::delivery::RetryPolicy;
use relaychat::identity::Identity;
use relaychat::session::{DeliveryEvent, Origin, SessionConfig, SessionHandle, spawn_session};
use relaychat::transport::ws::WsTransport;
use relaychat_proto::message::{MessageId, ParticipantId};
use relaychat_relay::history::ReplayBuffer;
use relaychat_relay::relay::{self, RelayState};
use tokio::sync::mpsc;

// =============================================================================
// Helpers
// =============================================================================

/// Start a relay on an OS-assigned port and return its WebSocket URL.
async fn start_relay(state: Arc<RelayState>) -> String {
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start relay server");
    format!("ws://{addr}/ws")
}

/// Connect a session for `name` and wait until it is connected.
async fn join(
    url: &str,
    name: &str,
    retry: RetryPolicy,
) -> (SessionHandle, mpsc::UnboundedReceiver<DeliveryEvent>) {
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        max_attempts: None,
    };
    let (transport, transport_events) =
        WsTransport::spawn(url, Duration::from_secs(5), reconnect, 64);
    let identity = Identity::with_participant(ParticipantId::new(name));
    let config = SessionConfig {
        retry,
        ..SessionConfig::default()
    };
    let (handle, events) = spawn_session(identity, config, transport, transport_events);
    tokio::time::timeout(
        Duration::from_secs(10),
        handle.wait_for_state(ConnectionState::Connected),
    )
    .await
    .expect("timeout waiting for connection")
    .unwrap();
    (handle, events)
}

/// Wait for an event matching `pred`, skipping others.
async fn wait_for<F>(
    events: &mut mpsc::UnboundedReceiver<DeliveryEvent>,
    description: &str,
    pred: F,
) -> DeliveryEvent
where
    F: Fn(&DeliveryEvent) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Some(e) if pred(&e) => return e,
                Some(_) => continue,
                None => panic!("event channel closed while waiting for {description}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("timeout waiting for {description}"))
}

async fn wait_delivered(events: &mut mpsc::UnboundedReceiver<DeliveryEvent>, id: &MessageId) {
    wait_for(events, "Delivered", |e| {
        matches!(e, DeliveryEvent::Delivered { message_id } if message_id == id)
    })
    .await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn message_reaches_every_participant_once() {
    let url = start_relay(Arc::new(RelayState::new())).await;
    let (alice, mut alice_events) = join(&url, "alice", RetryPolicy::default()).await;
    let (bob, mut bob_events) = join(&url, "bob", RetryPolicy::default()).await;

    let sent = alice.send("hello bob").await.unwrap();
    wait_delivered(&mut alice_events, &sent.id).await;

    let received = wait_for(&mut bob_events, "Appended from alice", |e| {
        matches!(e, DeliveryEvent::Appended { origin: Origin::Live, .. })
    })
    .await;
    let DeliveryEvent::Appended { message, .. } = received else {
        unreachable!()
    };
    assert_eq!(message.id, sent.id);
    assert_eq!(message.sender_id, ParticipantId::new("alice"));
    assert!(message.timestamp.is_some());

    // Give the relay echo time to arrive, then check for duplicates.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for handle in [&alice, &bob] {
        let snap = handle.snapshot().await.unwrap();
        let copies = snap.timeline.iter().filter(|m| m.id == sent.id).count();
        assert_eq!(copies, 1);
        assert!(snap.pending.is_empty());
    }
}

#[tokio::test]
async fn late_joiner_receives_history() {
    let url = start_relay(Arc::new(RelayState::new())).await;
    let (alice, mut alice_events) = join(&url, "alice", RetryPolicy::default()).await;
    let mut sent = Vec::new();
    for text in ["one", "two", "three"] {
        let m = alice.send(text).await.unwrap();
        wait_delivered(&mut alice_events, &m.id).await;
        sent.push(m.id);
    }

    let (carol, mut carol_events) = join(&url, "carol", RetryPolicy::default()).await;
    let synced = wait_for(&mut carol_events, "HistorySynced", |e| {
        matches!(e, DeliveryEvent::HistorySynced { admitted, .. } if !admitted.is_empty())
    })
    .await;
    let DeliveryEvent::HistorySynced { admitted, .. } = synced else {
        unreachable!()
    };
    let ids: Vec<MessageId> = admitted.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, sent);

    // The unsolicited replay and the resync reply overlap; one copy each.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snap = carol.snapshot().await.unwrap();
    assert_eq!(snap.timeline.len(), 3);
}

#[tokio::test]
async fn participant_count_follows_connections() {
    let url = start_relay(Arc::new(RelayState::new())).await;
    let (_alice, mut alice_events) = join(&url, "alice", RetryPolicy::default()).await;
    wait_for(&mut alice_events, "count 1", |e| {
        *e == DeliveryEvent::ParticipantCount(1)
    })
    .await;

    let (bob, _bob_events) = join(&url, "bob", RetryPolicy::default()).await;
    wait_for(&mut alice_events, "count 2", |e| {
        *e == DeliveryEvent::ParticipantCount(2)
    })
    .await;

    bob.shutdown().await;
    wait_for(&mut alice_events, "count back to 1", |e| {
        *e == DeliveryEvent::ParticipantCount(1)
    })
    .await;
}

#[tokio::test]
async fn relay_rejection_exhausts_retries() {
    // Relay accepts at most 8 bytes of text; the client allows far more.
    let state = Arc::new(RelayState::with_config(8, ReplayBuffer::new()));
    let url = start_relay(Arc::clone(&state)).await;
    let retry = RetryPolicy {
        max_retries: 3,
        retry_timeout: Duration::from_millis(500),
    };
    let (alice, mut events) = join(&url, "alice", retry).await;

    let m = alice.send("this text is too long for the relay").await.unwrap();
    let failed = wait_for(&mut events, "DeliveryFailed", |e| {
        matches!(e, DeliveryEvent::DeliveryFailed { .. })
    })
    .await;
    assert_eq!(
        failed,
        DeliveryEvent::DeliveryFailed {
            message: m,
            attempts: 4
        }
    );
    assert!(state.history.is_empty().await);
    assert!(alice.snapshot().await.unwrap().pending.is_empty());
}
