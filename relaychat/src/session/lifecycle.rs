//! Connection lifecycle methods for [`DeliverySession`].

use relaychat_proto::frame::ClientFrame;

use crate::connection::{LifecycleEvent, Transition};
use crate::transport::Transport;

use super::{DeliveryEvent, DeliverySession};

impl<T: Transport> DeliverySession<T> {
    /// Apply a transport lifecycle event.
    ///
    /// Entering `Connected` from any other state requests a history resync
    /// and flushes every pending entry. Events that leave the state
    /// unchanged have no effect.
    pub async fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        let Some(transition) = self.monitor.apply(event) else {
            tracing::debug!(?event, state = %self.monitor.state(), "lifecycle event without transition");
            return;
        };
        self.publish(transition);
        if transition.entered_connected() {
            self.resync().await;
            self.flush_pending().await;
        }
    }

    /// The transport will report nothing further.
    pub async fn handle_transport_closed(&mut self) {
        tracing::warn!("transport closed");
        self.handle_lifecycle(LifecycleEvent::Disconnect).await;
    }

    fn publish(&self, transition: Transition) {
        tracing::info!(from = %transition.from, to = %transition.to, "connection state changed");
        self.state_tx.send_replace(transition.to);
        self.emit(DeliveryEvent::ConnectionChanged(transition.to));
    }

    async fn resync(&self) {
        if let Err(e) = self.transport.send(&ClientFrame::RequestSync).await {
            tracing::warn!(error = %e, "failed to request history sync");
        }
    }

    /// Resend every pending entry under its current attempt with a fresh
    /// deadline. No retry budget is spent.
    async fn flush_pending(&mut self) {
        let in_flight = self.ledger.in_flight();
        if !in_flight.is_empty() {
            tracing::info!(pending = in_flight.len(), "flushing pending messages");
        }
        for (message, attempt) in in_flight {
            let deadline = self.scheduler.arm(&message.id, attempt);
            self.ledger.arm(&message.id, deadline);
            self.transmit(&message, attempt).await;
        }
    }
}
