//! Duplicate suppression for inbound and locally composed messages.

use std::collections::HashSet;

use relaychat_proto::message::MessageId;

/// Set of message ids already admitted to the timeline.
///
/// Grows for the lifetime of the session and is never pruned. Live pushes,
/// replay batches, and local echoes all go through the same instance.
#[derive(Debug, Default)]
pub struct DedupFilter {
    seen: HashSet<MessageId>,
}

impl DedupFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` and returns `true` the first time it is seen; returns
    /// `false` on every later call with the same id.
    pub fn admit(&mut self, id: &MessageId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.clone())
    }

    /// Returns whether `id` has been admitted.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Number of ids admitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if nothing has been admitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
