//! Pending-delivery ledger.
//!
//! Holds one [`PendingEntry`] per message that has been submitted but not
//! yet acknowledged. Every operation is keyed by [`MessageId`] and is safe to
//! apply redundantly: clearing or retrying an id that is no longer pending is
//! a no-op. Any path that removes an entry or replaces its deadline cancels
//! the previous timer before returning.

use std::collections::HashMap;

use relaychat_proto::message::{Message, MessageId};
use tokio::time::Instant;

use super::scheduler::ArmedDeadline;

/// A message in flight.
#[derive(Debug)]
pub struct PendingEntry {
    message: Message,
    retry_count: u32,
    deadline: Option<ArmedDeadline>,
    seq: u64,
}

impl PendingEntry {
    /// The message being delivered.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Number of retries performed so far (0 after the original send).
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the current deadline elapses, or `None` while parked.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.as_ref().map(ArmedDeadline::at)
    }

    /// Whether a deadline armed for `attempt` is the one currently guarding
    /// this entry.
    #[must_use]
    pub fn is_armed_for(&self, attempt: u32) -> bool {
        self.retry_count == attempt && self.deadline.as_ref().is_some_and(|d| d.attempt() == attempt)
    }

    fn replace_deadline(&mut self, deadline: Option<ArmedDeadline>) {
        if let Some(old) = std::mem::replace(&mut self.deadline, deadline) {
            old.cancel();
        }
    }
}

/// Outcome of asking the ledger for another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry budget remains: resend `message` under `attempt`.
    Resend {
        /// The unchanged message.
        message: Message,
        /// The new retry count.
        attempt: u32,
    },
    /// Budget exhausted: the entry was removed.
    Exhausted {
        /// The undeliverable message.
        message: Message,
        /// Total transmissions made (original plus retries).
        attempts: u32,
    },
    /// The id is not pending (already acknowledged or failed).
    NotPending,
}

/// In-memory record of messages sent but not yet confirmed.
#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: HashMap<MessageId, PendingEntry>,
    next_seq: u64,
}

impl PendingLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` with a zero retry count and the given deadline.
    ///
    /// Returns `false` (and cancels `deadline`) if the id is already pending.
    pub fn insert(&mut self, message: Message, deadline: ArmedDeadline) -> bool {
        if self.entries.contains_key(&message.id) {
            deadline.cancel();
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            message.id.clone(),
            PendingEntry {
                message,
                retry_count: 0,
                deadline: Some(deadline),
                seq,
            },
        );
        true
    }

    /// Looks up a pending entry.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&PendingEntry> {
        self.entries.get(id)
    }

    /// Returns whether `id` is pending.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    /// Removes `id` after a successful acknowledgment.
    ///
    /// Returns the message if it was pending; `None` for late or repeated acks.
    pub fn clear(&mut self, id: &MessageId) -> Option<Message> {
        let mut entry = self.entries.remove(id)?;
        entry.replace_deadline(None);
        Some(entry.message)
    }

    /// Consumes one unit of retry budget for `id`.
    ///
    /// On [`RetryDecision::Resend`] the old deadline is cancelled and the
    /// entry is left unarmed; the caller arms a new one with [`Self::arm`].
    /// On [`RetryDecision::Exhausted`] the entry is removed.
    pub fn next_attempt(&mut self, id: &MessageId, max_retries: u32) -> RetryDecision {
        let Some(entry) = self.entries.get_mut(id) else {
            return RetryDecision::NotPending;
        };
        if entry.retry_count < max_retries {
            entry.retry_count += 1;
            entry.replace_deadline(None);
            return RetryDecision::Resend {
                message: entry.message.clone(),
                attempt: entry.retry_count,
            };
        }
        let attempts = entry.retry_count + 1;
        let Some(message) = self.clear(id) else {
            return RetryDecision::NotPending;
        };
        RetryDecision::Exhausted { message, attempts }
    }

    /// Installs a new deadline for `id`, cancelling any previous one.
    ///
    /// Cancels `deadline` instead if the id is no longer pending.
    pub fn arm(&mut self, id: &MessageId, deadline: ArmedDeadline) {
        match self.entries.get_mut(id) {
            Some(entry) => entry.replace_deadline(Some(deadline)),
            None => deadline.cancel(),
        }
    }

    /// Drops the deadline of `id` without touching its retry budget.
    pub fn park(&mut self, id: &MessageId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.replace_deadline(None);
        }
    }

    /// Snapshot of every pending message with its current attempt number,
    /// in submission order.
    #[must_use]
    pub fn in_flight(&self) -> Vec<(Message, u32)> {
        let mut entries: Vec<&PendingEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
            .into_iter()
            .map(|e| (e.message.clone(), e.retry_count))
            .collect()
    }

    /// Ids of every pending message, in submission order.
    #[must_use]
    pub fn ids(&self) -> Vec<MessageId> {
        self.in_flight().into_iter().map(|(m, _)| m.id).collect()
    }

    /// Cancels every timer and empties the ledger.
    pub fn cancel_all(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            entry.replace_deadline(None);
        }
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
