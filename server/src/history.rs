use parking_lot::Mutex;
use portal_protocol::{now_millis, Identity, Message, Role};
use std::collections::VecDeque;

/// Largest page returned by [`History::before`].
pub const MAX_PAGE: usize = 200;

/// Bounded, insertion-ordered message history kept by the server.
pub struct History {
    messages: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a message, evicting the oldest one when full.
    pub fn append(&self, message: Message) {
        let mut guard = self.messages.lock();
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(message);
    }

    /// Everything retained, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().iter().cloned().collect()
    }

    /// Up to `limit` messages strictly older than `before` (or the newest
    /// messages when `before` is absent or unknown), oldest first.
    pub fn before(&self, before: Option<&str>, limit: usize) -> Vec<Message> {
        let limit = limit.min(MAX_PAGE);
        let guard = self.messages.lock();
        let end = before
            .and_then(|id| guard.iter().position(|m| m.id == id))
            .unwrap_or(guard.len());
        let start = end.saturating_sub(limit);
        guard.range(start..end).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

/// The identity that posts server generated messages.
pub fn system_identity() -> Identity {
    Identity {
        id: "system".into(),
        username: "System".into(),
        avatar: None,
        role: Role::Admin,
    }
}

/// Build the message posted when the server starts.
pub fn welcome_message(text: &str) -> Message {
    Message {
        id: "welcome".into(),
        content: text.into(),
        sender: system_identity(),
        timestamp: now_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> Message {
        Message {
            id: id.into(),
            content: id.into(),
            sender: Identity::new("u1", "ann"),
            timestamp: 0,
        }
    }

    fn ids(msgs: &[Message]) -> Vec<&str> {
        msgs.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let history = History::new(3);
        for id in ["a", "b", "c", "d"] {
            history.append(msg(id));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(ids(&history.snapshot()), vec!["b", "c", "d"]);
    }

    #[test]
    fn pagination_order() {
        let history = History::new(10);
        for id in ["m1", "m2", "m3", "m4", "m5"] {
            history.append(msg(id));
        }
        let newest = history.before(None, 2);
        assert_eq!(ids(&newest), vec!["m4", "m5"]);
        let older = history.before(Some("m4"), 2);
        assert_eq!(ids(&older), vec!["m2", "m3"]);
        let oldest = history.before(Some("m2"), 2);
        assert_eq!(ids(&oldest), vec!["m1"]);
        assert!(history.before(Some("m1"), 2).is_empty());
    }
}
