//! Frames exchanged between delivery agents and the relay.
//!
//! Every WebSocket binary message carries exactly one frame. Clients send
//! [`ClientFrame`]s; the relay answers and broadcasts with [`ServerFrame`]s.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId};

/// Frames sent from a delivery agent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Submit a message for broadcast.
    ///
    /// The relay must answer with a [`ServerFrame::Ack`] echoing
    /// `message.id` and `attempt`.
    SendMessage {
        /// The message being delivered. Retries carry an identical message.
        message: Message,
        /// Retry count this transmission was made under (0 for the original).
        attempt: u32,
    },

    /// Ask the relay to replay its history buffer.
    RequestSync,
}

/// Frames sent from the relay to delivery agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// A newly broadcast message.
    ReceiveMessage(Message),

    /// Replay batch, oldest first.
    SyncMessages(Vec<Message>),

    /// Number of currently connected participants. Advisory only.
    UserCount(u32),

    /// Answer to a [`ClientFrame::SendMessage`].
    Ack(Ack),
}

/// Per-attempt acknowledgment of a submitted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// The acknowledged message.
    pub message_id: MessageId,
    /// Attempt number echoed from the submitting frame.
    pub attempt: u32,
    /// Whether the relay accepted the message.
    pub success: bool,
    /// Rejection reason when `success` is false.
    pub error: Option<String>,
}

impl Ack {
    /// Builds a positive acknowledgment.
    #[must_use]
    pub const fn accepted(message_id: MessageId, attempt: u32) -> Self {
        Self {
            message_id,
            attempt,
            success: true,
            error: None,
        }
    }

    /// Builds a negative acknowledgment carrying a reason.
    pub fn rejected(message_id: MessageId, attempt: u32, reason: impl Into<String>) -> Self {
        Self {
            message_id,
            attempt,
            success: false,
            error: Some(reason.into()),
        }
    }
}
