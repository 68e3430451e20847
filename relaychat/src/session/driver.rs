//! The session event loop and the handle the boundary talks to.
//!
//! [`spawn_session`] moves a [`DeliverySession`] onto its own task. That task
//! is the only place session state is touched; everything else reaches it
//! through one of three queues:
//!
//! | Queue | Fed by |
//! |---|---|
//! | transport events | the transport (lifecycle changes and relay frames) |
//! | deadlines | per-entry timer tasks |
//! | commands | [`SessionHandle`] |
//!
//! The loop polls them in that order, so work already queued by the
//! transport is applied before a command that arrives in the same tick.

use relaychat_proto::message::Message;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::ConnectionState;
use crate::delivery::DeadlineElapsed;
use crate::identity::Identity;
use crate::transport::{Transport, TransportEvent};

use super::{DeliveryEvent, DeliverySession, SendError, SessionConfig, SessionSnapshot};

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<Message, SendError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

/// Client-side handle to a running session.
///
/// Dropping the handle stops the session the same way
/// [`shutdown`](Self::shutdown) does.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

/// Start a session on its own task.
///
/// `transport_events` is the receiver returned alongside `transport`.
/// Returns the handle and the receiver for [`DeliveryEvent`]s.
pub fn spawn_session<T>(
    identity: Identity,
    config: SessionConfig,
    transport: T,
    transport_events: mpsc::Receiver<TransportEvent>,
) -> (SessionHandle, mpsc::UnboundedReceiver<DeliveryEvent>)
where
    T: Transport + 'static,
{
    let (session, events, deadlines) = DeliverySession::new(identity, transport, config.retry);
    let state = session.subscribe_state();
    let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
    let task = tokio::spawn(run(session, commands_rx, transport_events, deadlines));
    let handle = SessionHandle {
        commands: commands_tx,
        state,
        task,
    };
    (handle, events)
}

async fn run<T: Transport>(
    mut session: DeliverySession<T>,
    mut commands: mpsc::Receiver<Command>,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    mut deadlines: mpsc::UnboundedReceiver<DeadlineElapsed>,
) {
    let participant = session.identity().participant().clone();
    tracing::info!(participant = %participant, "session started");
    let mut transport_open = true;

    loop {
        tokio::select! {
            biased;

            event = transport_events.recv(), if transport_open => match event {
                Some(TransportEvent::Lifecycle(lifecycle)) => session.handle_lifecycle(lifecycle).await,
                Some(TransportEvent::Frame(frame)) => session.handle_frame(frame).await,
                Some(TransportEvent::Closed) | None => {
                    transport_open = false;
                    session.handle_transport_closed().await;
                }
            },

            Some(elapsed) = deadlines.recv() => session.handle_deadline(elapsed).await,

            command = commands.recv() => match command {
                Some(Command::Send { text, reply }) => {
                    let result = session.submit(&text).await;
                    let _ = reply.send(result);
                }
                Some(Command::Snapshot { reply }) => {
                    let _ = reply.send(session.snapshot());
                }
                Some(Command::Shutdown) | None => break,
            },
        }
    }

    session.close();
    tracing::info!(participant = %participant, "session stopped");
}

impl SessionHandle {
    /// Submit `text` for delivery.
    ///
    /// Resolves once the message is in the ledger and on the wire, not when
    /// the relay acknowledges it; watch for [`DeliveryEvent::Delivered`] or
    /// [`DeliveryEvent::DeliveryFailed`].
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] while not connected,
    /// [`SendError::Validation`] for unacceptable text, and
    /// [`SendError::SessionClosed`] once the loop has stopped.
    pub async fn send(&self, text: impl Into<String>) -> Result<Message, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| SendError::SessionClosed)?;
        rx.await.map_err(|_| SendError::SessionClosed)?
    }

    /// Capture the session's current state.
    ///
    /// # Errors
    ///
    /// [`SendError::SessionClosed`] once the loop has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SendError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| SendError::SessionClosed)?;
        rx.await.map_err(|_| SendError::SessionClosed)
    }

    /// Current connectivity.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether sends are currently accepted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// A receiver that observes every connection state change.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// [`SendError::SessionClosed`] if the loop stops first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SendError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| SendError::SessionClosed)
    }

    /// Stop the session and wait for its loop to finish.
    ///
    /// Outstanding deadlines are cancelled; pending messages are dropped
    /// without a failure signal.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session task ended abnormally");
        }
    }
}
