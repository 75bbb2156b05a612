//! Ordered, deduplicated message log for the session.
//!
//! Single source of truth for all chat messages a session has seen. Only the
//! connection manager's receive path appends; consumers read snapshots.

use std::sync::{Arc, RwLock};

use chatwire_shared::Message;

/// The cache shared between the manager (writer) and consumers (readers).
pub type SharedMessageCache = Arc<RwLock<MessageCache>>;

/// Append-only log of messages in arrival order, with unique ids.
#[derive(Debug, Default)]
pub struct MessageCache {
    messages: Vec<Message>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, preserving arrival order.
    ///
    /// Returns false without mutating anything if a message with the same id
    /// is already cached. This guards against duplicate delivery during
    /// reconnect races.
    pub fn append(&mut self, msg: Message) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        self.messages.push(msg);
        true
    }

    /// Full ordered copy of the log. Consumers never mutate the cache.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Empty the cache. Used only on explicit session reset (logout), never
    /// as a side effect of reconnection.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
