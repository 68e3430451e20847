//! The visible, append-only message timeline.

use relaychat_proto::message::Message;

/// Messages admitted for display, in the order they were admitted.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    /// Creates an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one message at the tail.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends a batch at the tail, preserving its order.
    pub fn extend(&mut self, batch: impl IntoIterator<Item = Message>) {
        self.messages.extend(batch);
    }

    /// All messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing has been admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
