use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct TypingTracker {
    last: Mutex<HashMap<String, Instant>>,
    debounce: Duration,
}

impl TypingTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
            debounce,
        }
    }

    /// Register a typing action. Returns true if the event should be broadcast.
    pub fn typing(&self, user_id: &str) -> bool {
        let mut guard = self.last.lock();
        let now = Instant::now();
        let should = match guard.get(user_id) {
            Some(&prev) => now.duration_since(prev) >= self.debounce,
            None => true,
        };
        if should {
            guard.insert(user_id.to_string(), now);
        }
        should
    }

    /// Forget a user so their next typing event is broadcast immediately.
    pub fn clear(&self, user_id: &str) {
        self.last.lock().remove(user_id);
    }
}
