//! Message types shared by the `RelayChat` delivery agent and relay.
//!
//! A [`Message`] is created once by the producing client, carries an id the
//! client chose, and is never mutated afterwards except for the timestamp the
//! relay stamps when it accepts the message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message text size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Opaque, globally unique message identifier.
///
/// Generated by the producing client from a UUID v7, so ids created later
/// sort after ids created earlier. Peers must treat the value as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a new time-ordered message identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-scoped opaque participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wraps an existing participant identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A chat message as it travels between clients and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Client-assigned identifier, unique for the lifetime of the chat.
    pub id: MessageId,
    /// Participant that produced the message.
    pub sender_id: ParticipantId,
    /// Message text.
    pub text: String,
    /// Set by the relay when it accepts the message; `None` until then.
    pub timestamp: Option<Timestamp>,
}

/// Error returned when a message fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message text is empty or whitespace only.
    #[error("message text is empty")]
    Empty,
    /// Message text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

impl Message {
    /// Creates an unstamped message with a freshly generated id.
    pub fn compose(sender_id: ParticipantId, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            sender_id,
            text: text.into(),
            timestamp: None,
        }
    }

    /// Returns a copy of this message carrying the given relay timestamp.
    #[must_use]
    pub fn stamped(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validates this message against `max_size` bytes of text.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the text is blank, or
    /// [`ValidationError::TooLarge`] if it exceeds `max_size`.
    pub fn validate_with_limit(&self, max_size: usize) -> Result<(), ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.text.len();
        if size > max_size {
            return Err(ValidationError::TooLarge {
                size,
                max: max_size,
            });
        }
        Ok(())
    }

    /// Validates this message against [`MAX_MESSAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// See [`Message::validate_with_limit`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_with_limit(MAX_MESSAGE_SIZE)
    }
}
