//! Deadline timers for pending deliveries.
//!
//! Each armed deadline is a small tokio task that sleeps until the deadline
//! and then posts a [`DeadlineElapsed`] into the session's event queue. The
//! task is owned through an [`ArmedDeadline`]; cancelling it aborts the task
//! so no stale event is produced after the entry is gone.

use std::time::Duration;

use relaychat_proto::message::MessageId;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Posted when a deadline armed for `attempt` of `message_id` elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineElapsed {
    /// The message whose deadline elapsed.
    pub message_id: MessageId,
    /// The attempt the deadline was armed for.
    pub attempt: u32,
}

/// Handle to a running deadline timer.
#[derive(Debug)]
pub struct ArmedDeadline {
    at: Instant,
    attempt: u32,
    timer: AbortHandle,
}

impl ArmedDeadline {
    /// When the deadline elapses.
    #[must_use]
    pub const fn at(&self) -> Instant {
        self.at
    }

    /// The attempt this deadline guards.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Stops the timer. A cancelled deadline never posts an event.
    pub fn cancel(self) {
        self.timer.abort();
    }
}

/// Arms deadline timers that report into a single queue.
#[derive(Debug, Clone)]
pub struct DeadlineScheduler {
    timeout: Duration,
    tx: mpsc::UnboundedSender<DeadlineElapsed>,
}

impl DeadlineScheduler {
    /// Creates a scheduler using `timeout` for every deadline, returning the
    /// receiver the session loop drains.
    #[must_use]
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<DeadlineElapsed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { timeout, tx }, rx)
    }

    /// The timeout applied to each deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arms a deadline `timeout` from now for `attempt` of `message_id`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn arm(&self, message_id: &MessageId, attempt: u32) -> ArmedDeadline {
        let at = Instant::now() + self.timeout;
        let tx = self.tx.clone();
        let message_id = message_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = tx.send(DeadlineElapsed {
                message_id,
                attempt,
            });
        });
        ArmedDeadline {
            at,
            attempt,
            timer: task.abort_handle(),
        }
    }
}
