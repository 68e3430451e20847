//! Session-scoped participant identity and message construction.

use relaychat_proto::message::{Message, ParticipantId, ValidationError};
use uuid::Uuid;

/// Issues the participant identifier for one chat session and stamps it on
/// every message the session composes.
#[derive(Debug, Clone)]
pub struct Identity {
    participant: ParticipantId,
}

impl Identity {
    /// Generates a fresh random participant identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            participant: ParticipantId::new(Uuid::new_v4().to_string()),
        }
    }

    /// Uses a caller-supplied participant identifier.
    #[must_use]
    pub const fn with_participant(participant: ParticipantId) -> Self {
        Self { participant }
    }

    /// Returns the participant identifier.
    #[must_use]
    pub const fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Builds a new message from this participant with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the text is blank or too large.
    pub fn compose(&self, text: impl Into<String>) -> Result<Message, ValidationError> {
        let message = Message::compose(self.participant.clone(), text);
        message.validate()?;
        Ok(message)
    }
}
