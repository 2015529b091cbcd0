use parking_lot::Mutex;
use portal_protocol::{
    now_millis,
    simulate::{simulate_tick, SimulationRates},
    Identity, PresenceEntry, Status,
};
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;

struct Slot {
    entry: PresenceEntry,
    generation: u64,
    heartbeat: Instant,
    /// Demo members are never swept and are the only entries the simulator touches.
    demo: bool,
}

/// Outcome of a heartbeat or status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    Unknown,
    Unchanged,
    Changed,
}

/// Single authoritative presence store shared by every connected client.
pub struct PresenceRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    debounce: Duration,
    timeout: Duration,
}

impl PresenceRegistry {
    pub fn new(debounce: Duration, timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            debounce,
            timeout,
        }
    }

    /// Register a user. Returns true if the user transitioned to online.
    pub fn connect(&self, identity: Identity) -> bool {
        let mut guard = self.slots.lock();
        let now = Instant::now();
        match guard.get_mut(&identity.id) {
            Some(slot) => {
                let was_offline = slot.entry.status == Status::Offline;
                slot.generation += 1;
                slot.heartbeat = now;
                slot.entry.identity = identity;
                slot.entry.last_seen = now_millis();
                if was_offline {
                    slot.entry.status = Status::Online;
                }
                was_offline
            }
            None => {
                guard.insert(
                    identity.id.clone(),
                    Slot {
                        entry: PresenceEntry::online(identity),
                        generation: 0,
                        heartbeat: now,
                        demo: false,
                    },
                );
                true
            }
        }
    }

    /// Deregister a user. Returns true if the user is gone after the debounce,
    /// i.e. no `connect` happened in the meantime.
    pub async fn disconnect(&self, user_id: &str) -> bool {
        let generation = match self.slots.lock().get(user_id) {
            Some(slot) if !slot.demo => slot.generation,
            _ => return false,
        };
        sleep(self.debounce).await;
        let mut guard = self.slots.lock();
        match guard.get(user_id) {
            Some(slot) if slot.generation == generation => {
                guard.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Record a heartbeat, optionally changing the displayed status.
    pub fn touch(&self, user_id: &str, status: Option<Status>) -> Touch {
        let mut guard = self.slots.lock();
        let Some(slot) = guard.get_mut(user_id) else {
            return Touch::Unknown;
        };
        slot.heartbeat = Instant::now();
        slot.entry.last_seen = now_millis();
        match status {
            Some(s) if s != slot.entry.status => {
                slot.entry.status = s;
                Touch::Changed
            }
            _ => Touch::Unchanged,
        }
    }

    /// Drop users whose last heartbeat is older than the timeout.
    pub fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.slots.lock().retain(|id, slot| {
            let keep = slot.demo || now.duration_since(slot.heartbeat) < self.timeout;
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        expired
    }

    /// Add pinned demo members. Existing entries are left untouched.
    pub fn seed_demo(&self, members: impl IntoIterator<Item = Identity>) {
        let mut guard = self.slots.lock();
        for identity in members {
            guard.entry(identity.id.clone()).or_insert_with(|| Slot {
                entry: PresenceEntry::online(identity),
                generation: 0,
                heartbeat: Instant::now(),
                demo: true,
            });
        }
    }

    /// Run one simulation tick over the demo members.
    pub fn simulate<R: Rng + ?Sized>(&self, rates: SimulationRates, rng: &mut R) -> bool {
        let mut guard = self.slots.lock();
        let demo = guard
            .values_mut()
            .filter(|s| s.demo)
            .map(|s| &mut s.entry);
        simulate_tick(demo, rates, rng, now_millis())
    }

    /// Current presence of everyone, ordered by username.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let guard = self.slots.lock();
        let mut out: Vec<PresenceEntry> = guard.values().map(|s| s.entry.clone()).collect();
        out.sort_by(|a, b| {
            a.identity
                .username
                .cmp(&b.identity.username)
                .then_with(|| a.identity.id.cmp(&b.identity.id))
        });
        out
    }
}
