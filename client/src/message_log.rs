use portal_protocol::Message;
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 500;

/// Append-only, insertion ordered chat buffer holding at most `capacity`
/// messages; the oldest are evicted first.
#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: VecDeque<Message>,
    capacity: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn append(&mut self, message: Message) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// Replace the whole log with a snapshot, keeping its newest messages.
    pub fn replace(&mut self, messages: Vec<Message>) {
        let skip = messages.len().saturating_sub(self.capacity);
        self.entries = messages.into_iter().skip(skip).collect();
    }

    /// Insert older history (oldest first) in front of the log. Only free
    /// capacity is filled; returns how many messages were inserted.
    pub fn prepend_older(&mut self, older: Vec<Message>) -> usize {
        let free = self.capacity - self.entries.len();
        let take = older.len().min(free);
        let skip = older.len() - take;
        for message in older.into_iter().skip(skip).rev() {
            self.entries.push_front(message);
        }
        take
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn oldest_id(&self) -> Option<&str> {
        self.entries.front().map(|m| m.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
