//! Bounded replay buffer of recently broadcast messages.
//!
//! The [`ReplayBuffer`] keeps the most recent messages in broadcast order and
//! an index of their ids. New connections are sent its contents; the id index
//! makes resubmission of an already-accepted message detectable so the relay
//! can acknowledge it again without broadcasting it twice.

use std::collections::{HashSet, VecDeque};

use relaychat_proto::message::{Message, MessageId};
use tokio::sync::RwLock;

/// Default number of messages retained for replay.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

#[derive(Debug, Default)]
struct Inner {
    messages: VecDeque<Message>,
    ids: HashSet<MessageId>,
}

/// In-memory replay buffer with FIFO eviction.
///
/// Thread-safe via [`RwLock`]. When the capacity is exceeded the oldest
/// message is dropped, along with its id.
#[derive(Debug)]
pub struct ReplayBuffer {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayBuffer {
    /// Creates an empty buffer holding up to [`DEFAULT_HISTORY_SIZE`] messages.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }

    /// Creates an empty buffer holding up to `capacity` messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
        }
    }

    /// Appends `message` unless its id is already retained.
    ///
    /// Returns `false` for a duplicate id, leaving the buffer unchanged.
    pub async fn append(&self, message: Message) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.ids.insert(message.id.clone()) {
            return false;
        }
        inner.messages.push_back(message);
        while inner.messages.len() > self.capacity {
            if let Some(evicted) = inner.messages.pop_front() {
                inner.ids.remove(&evicted.id);
            }
        }
        true
    }

    /// Whether a message with `id` is retained.
    pub async fn contains(&self, id: &MessageId) -> bool {
        self.inner.read().await.ids.contains(id)
    }

    /// All retained messages, oldest first.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.read().await.messages.iter().cloned().collect()
    }

    /// Number of retained messages.
    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    /// Returns `true` if nothing is retained.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.messages.is_empty()
    }
}
