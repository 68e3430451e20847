//! Delivery bookkeeping: duplicate suppression, the pending ledger, and the
//! deadline timers that drive retries.

pub mod dedup;
pub mod ledger;
pub mod scheduler;

use std::time::Duration;

pub use dedup::DedupFilter;
pub use ledger::{PendingEntry, PendingLedger, RetryDecision};
pub use scheduler::{ArmedDeadline, DeadlineElapsed, DeadlineScheduler};

/// Retry bounds for outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retransmissions allowed after the original send.
    pub max_retries: u32,
    /// How long to wait for an acknowledgment before retrying.
    pub retry_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_timeout: Duration::from_millis(3000),
        }
    }
}
