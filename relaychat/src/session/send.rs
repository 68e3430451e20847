//! Send path methods for [`DeliverySession`].
//!
//! Submission puts a message in the ledger and on the wire; the retry path
//! (a negative ack or an elapsed deadline) resends it under the next attempt
//! number until the retry bound is reached.

use relaychat_proto::frame::ClientFrame;
use relaychat_proto::message::{Message, MessageId};
use tokio::time::Instant;

use crate::delivery::{DeadlineElapsed, RetryDecision};
use crate::transport::Transport;

use super::{DeliveryEvent, DeliverySession, Origin, SendError};

impl<T: Transport> DeliverySession<T> {
    /// Compose and submit a message.
    ///
    /// The message is echoed into the timeline and recorded by the dedup
    /// filter immediately, so the relay's broadcast of it is absorbed. It
    /// then enters the ledger with a fresh deadline and is transmitted as
    /// attempt 0.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] while not connected and
    /// [`SendError::Validation`] for empty or oversized text. Nothing is
    /// recorded in either case.
    pub async fn submit(&mut self, text: &str) -> Result<Message, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let message = self.identity.compose(text)?;

        self.dedup.admit(&message.id);
        self.timeline.push(message.clone());
        self.emit(DeliveryEvent::Appended {
            message: message.clone(),
            origin: Origin::Local,
        });

        let deadline = self.scheduler.arm(&message.id, 0);
        self.ledger.insert(message.clone(), deadline);
        tracing::debug!(message_id = %message.id, "message submitted");

        self.transmit(&message, 0).await;
        Ok(message)
    }

    /// React to an elapsed deadline.
    ///
    /// Stale firings (the entry is gone, or its deadline was replaced) are
    /// ignored. While disconnected the entry is parked for the reconnect
    /// flush instead of spending a retry.
    pub async fn handle_deadline(&mut self, elapsed: DeadlineElapsed) {
        let DeadlineElapsed {
            message_id,
            attempt,
        } = elapsed;
        let due = self.ledger.get(&message_id).is_some_and(|entry| {
            entry.is_armed_for(attempt) && entry.deadline().is_some_and(|at| at <= Instant::now())
        });
        if !due {
            tracing::debug!(message_id = %message_id, attempt, "ignoring stale deadline");
            return;
        }

        if !self.is_connected() {
            tracing::debug!(message_id = %message_id, attempt, "deadline elapsed while offline, parking");
            self.ledger.park(&message_id);
            return;
        }

        tracing::debug!(message_id = %message_id, attempt, "no ack before deadline");
        self.retry(&message_id).await;
    }

    /// Spend one retry on `id`, or abandon it if the budget is gone.
    pub(super) async fn retry(&mut self, id: &MessageId) {
        match self.ledger.next_attempt(id, self.policy.max_retries) {
            RetryDecision::Resend { message, attempt } => {
                let deadline = self.scheduler.arm(id, attempt);
                self.ledger.arm(id, deadline);
                tracing::debug!(message_id = %id, attempt, "retransmitting");
                self.transmit(&message, attempt).await;
            }
            RetryDecision::Exhausted { message, attempts } => {
                tracing::warn!(message_id = %id, attempts, "delivery failed, giving up");
                self.emit(DeliveryEvent::DeliveryFailed { message, attempts });
            }
            RetryDecision::NotPending => {}
        }
    }

    /// Hand one attempt to the transport.
    ///
    /// A transport error is transient: the entry stays in the ledger and its
    /// deadline stays armed.
    pub(super) async fn transmit(&self, message: &Message, attempt: u32) {
        let frame = ClientFrame::SendMessage {
            message: message.clone(),
            attempt,
        };
        if let Err(e) = self.transport.send(&frame).await {
            tracing::warn!(message_id = %message.id, attempt, error = %e, "transmit failed, will retry");
        }
    }
}
