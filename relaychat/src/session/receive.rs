//! Receive path methods for [`DeliverySession`].
//!
//! Live pushes and replay batches pass through the same dedup filter, so a
//! message reaches the timeline once no matter how many times the relay
//! delivers it.

use relaychat_proto::frame::{Ack, ServerFrame};
use relaychat_proto::message::Message;

use crate::transport::Transport;

use super::{DeliveryEvent, DeliverySession, Origin};

impl<T: Transport> DeliverySession<T> {
    /// Dispatch one frame from the relay.
    pub async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::ReceiveMessage(message) => self.receive_message(message),
            ServerFrame::SyncMessages(batch) => self.sync_messages(batch),
            ServerFrame::UserCount(count) => {
                self.participants = Some(count);
                self.emit(DeliveryEvent::ParticipantCount(count));
            }
            ServerFrame::Ack(ack) => self.handle_ack(ack).await,
        }
    }

    /// Admit a live push, appending it if it is new.
    pub fn receive_message(&mut self, message: Message) {
        if !self.dedup.admit(&message.id) {
            tracing::debug!(message_id = %message.id, "duplicate live message dropped");
            return;
        }
        self.timeline.push(message.clone());
        self.emit(DeliveryEvent::Appended {
            message,
            origin: Origin::Live,
        });
    }

    /// Merge a replay batch after the current tail, in batch order.
    pub fn sync_messages(&mut self, batch: Vec<Message>) {
        let total = batch.len();
        let admitted: Vec<Message> = batch
            .into_iter()
            .filter(|m| self.dedup.admit(&m.id))
            .collect();
        let skipped = total - admitted.len();
        tracing::debug!(admitted = admitted.len(), skipped, "history synced");

        self.timeline.extend(admitted.iter().cloned());
        self.emit(DeliveryEvent::HistorySynced { admitted, skipped });
    }

    /// Apply an acknowledgment from the relay.
    ///
    /// A positive ack clears the entry whichever attempt it answers. A
    /// negative ack only counts for the attempt currently outstanding.
    pub async fn handle_ack(&mut self, ack: Ack) {
        let Ack {
            message_id,
            attempt,
            success,
            error,
        } = ack;

        if success {
            if self.ledger.clear(&message_id).is_some() {
                tracing::info!(message_id = %message_id, attempt, "message delivered");
                self.emit(DeliveryEvent::Delivered { message_id });
            } else {
                tracing::debug!(message_id = %message_id, attempt, "late ack ignored");
            }
            return;
        }

        let current = self
            .ledger
            .get(&message_id)
            .is_some_and(|entry| entry.retry_count() == attempt);
        if !current {
            tracing::debug!(message_id = %message_id, attempt, "stale nack ignored");
            return;
        }

        let reason = error.as_deref().unwrap_or("unspecified");
        tracing::warn!(message_id = %message_id, attempt, reason, "relay rejected message");
        if self.is_connected() {
            self.retry(&message_id).await;
        } else {
            self.ledger.park(&message_id);
        }
    }
}
