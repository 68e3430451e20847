//! Delivery session for `RelayChat`.
//!
//! [`DeliverySession`] owns every piece of mutable delivery state: the dedup
//! filter, the pending ledger and its deadline scheduler, the connection
//! monitor and the visible timeline. It is driven one event at a time by the
//! loop in [`driver`], so none of that state needs a lock.
//!
//! The session's methods are split by concern:
//! - [`send`]: submission, the retry path, deadline handling
//! - [`receive`]: live pushes, replay batches, acks, participant counts
//! - [`lifecycle`]: connection transitions, resync and ledger flush

pub mod driver;
pub mod lifecycle;
pub mod receive;
pub mod send;

use relaychat_proto::message::{Message, MessageId, ValidationError};
use tokio::sync::{mpsc, watch};

use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::delivery::{DeadlineElapsed, DeadlineScheduler, DedupFilter, PendingLedger, RetryPolicy};
use crate::identity::Identity;
use crate::timeline::Timeline;
use crate::transport::Transport;

pub use driver::{SessionHandle, spawn_session};

/// Errors returned to callers submitting a message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The transport is not connected; sends are disabled.
    #[error("not connected to relay")]
    NotConnected,

    /// The text was rejected before entering the ledger.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The session event loop has stopped.
    #[error("session closed")]
    SessionClosed,
}

/// Where a timeline addition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Composed by this participant.
    Local,
    /// Pushed live by the relay.
    Live,
}

/// Signals emitted to the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// A message was appended to the timeline.
    Appended {
        /// The appended message.
        message: Message,
        /// Whether it was composed locally or pushed live.
        origin: Origin,
    },
    /// A replay batch was merged into the timeline.
    HistorySynced {
        /// Messages appended, in batch order.
        admitted: Vec<Message>,
        /// Batch entries already present.
        skipped: usize,
    },
    /// The relay acknowledged a message.
    Delivered {
        /// The acknowledged message.
        message_id: MessageId,
    },
    /// A message ran out of retries and was abandoned.
    DeliveryFailed {
        /// The abandoned message.
        message: Message,
        /// Total transmissions made.
        attempts: u32,
    },
    /// The connection state changed.
    ConnectionChanged(ConnectionState),
    /// Advisory participant count from the relay.
    ParticipantCount(u32),
}

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Retry bound and acknowledgment timeout.
    pub retry: RetryPolicy,
    /// Capacity of the command queue behind [`SessionHandle`].
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            command_buffer: 64,
        }
    }
}

/// Point-in-time view of a session, for the boundary and for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current connectivity.
    pub state: ConnectionState,
    /// The visible timeline, oldest first.
    pub timeline: Vec<Message>,
    /// Ids awaiting acknowledgment, in submission order.
    pub pending: Vec<MessageId>,
    /// Number of ids the dedup filter has recorded.
    pub seen: usize,
    /// Last participant count the relay reported.
    pub participants: Option<u32>,
}

/// The single owner of a participant's delivery state.
pub struct DeliverySession<T: Transport> {
    identity: Identity,
    transport: T,
    policy: RetryPolicy,
    dedup: DedupFilter,
    ledger: PendingLedger,
    scheduler: DeadlineScheduler,
    monitor: ConnectionMonitor,
    timeline: Timeline,
    participants: Option<u32>,
    event_tx: mpsc::UnboundedSender<DeliveryEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<T: Transport> DeliverySession<T> {
    /// Creates a disconnected session sending through `transport`.
    ///
    /// Returns the session, the receiver for [`DeliveryEvent`]s, and the
    /// deadline queue the driving loop must feed back into
    /// [`handle_deadline`](Self::handle_deadline).
    pub fn new(
        identity: Identity,
        transport: T,
        policy: RetryPolicy,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<DeliveryEvent>,
        mpsc::UnboundedReceiver<DeadlineElapsed>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (scheduler, deadline_rx) = DeadlineScheduler::new(policy.retry_timeout);
        let monitor = ConnectionMonitor::default();
        let (state_tx, _) = watch::channel(monitor.state());
        let session = Self {
            identity,
            transport,
            policy,
            dedup: DedupFilter::new(),
            ledger: PendingLedger::new(),
            scheduler,
            monitor,
            timeline: Timeline::new(),
            participants: None,
            event_tx,
            state_tx,
        };
        (session, event_rx, deadline_rx)
    }

    /// The identity messages are composed under.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current connectivity.
    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    /// Whether sends are currently accepted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// A receiver that observes every connection state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The pending ledger.
    #[must_use]
    pub const fn ledger(&self) -> &PendingLedger {
        &self.ledger
    }

    /// The visible timeline.
    #[must_use]
    pub const fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Captures the session's current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.monitor.state(),
            timeline: self.timeline.messages().to_vec(),
            pending: self.ledger.ids(),
            seen: self.dedup.len(),
            participants: self.participants,
        }
    }

    /// Cancels every outstanding deadline. Pending messages are dropped
    /// without a failure signal.
    pub fn close(&mut self) {
        if !self.ledger.is_empty() {
            tracing::info!(pending = self.ledger.len(), "closing session with undelivered messages");
        }
        self.ledger.cancel_all();
    }

    fn emit(&self, event: DeliveryEvent) {
        let _ = self.event_tx.send(event);
    }
}
