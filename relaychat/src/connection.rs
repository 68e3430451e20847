//! Connection lifecycle state machine.
//!
//! ```text
//!                connect / reconnect
//!  Disconnected ─────────────────────▶ Connected
//!       ▲  │ reconnect_attempt             │
//!       │  ▼                               │ disconnect
//!  Reconnecting ──── reconnect ──────▶ Connected
//! ```
//!
//! Entering `Connected` from any other state is the trigger for a history
//! resync and a flush of the pending ledger; the monitor only reports the
//! transition, the session performs the side effects.

use std::fmt;

/// Connectivity of the session's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport connection.
    #[default]
    Disconnected,
    /// Transport connected; sends are accepted.
    Connected,
    /// Transport lost, a reconnection attempt is in progress.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Transport lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Initial connection established.
    Connect,
    /// Connection lost.
    Disconnect,
    /// A reconnection attempt started.
    ReconnectAttempt {
        /// 1-based attempt counter since the last loss.
        attempt: u32,
    },
    /// Reconnection succeeded.
    Reconnect,
}

/// A state change reported by [`ConnectionMonitor::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the event.
    pub from: ConnectionState,
    /// State after the event.
    pub to: ConnectionState,
}

impl Transition {
    /// Whether this transition entered `Connected` from another state.
    #[must_use]
    pub fn entered_connected(&self) -> bool {
        self.to == ConnectionState::Connected && self.from != ConnectionState::Connected
    }
}

/// Tracks the session's connection state.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    state: ConnectionState,
}

impl ConnectionMonitor {
    /// Starts in whatever state the transport reports at construction.
    #[must_use]
    pub const fn new(initial: ConnectionState) -> Self {
        Self { state: initial }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether sends are currently accepted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Applies a lifecycle event, returning the transition if the state
    /// changed.
    pub fn apply(&mut self, event: LifecycleEvent) -> Option<Transition> {
        let next = match event {
            LifecycleEvent::Connect | LifecycleEvent::Reconnect => ConnectionState::Connected,
            LifecycleEvent::Disconnect => ConnectionState::Disconnected,
            LifecycleEvent::ReconnectAttempt { .. } => ConnectionState::Reconnecting,
        };
        if next == self.state {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: next,
        };
        self.state = next;
        Some(transition)
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
