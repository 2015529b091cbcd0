use crate::{PresenceEntry, Status};
use rand::Rng;

/// Per-tick probabilities for the demo presence simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationRates {
    /// Chance that an entry flips between online and offline.
    pub flip: f64,
    /// Chance that a connected entry starts or stops typing.
    pub typing: f64,
}

impl Default for SimulationRates {
    fn default() -> Self {
        Self {
            flip: 0.1,
            typing: 0.15,
        }
    }
}

/// Advance the demo simulation by one tick. Returns true if any entry changed.
pub fn simulate_tick<'a, R, I>(entries: I, rates: SimulationRates, rng: &mut R, now: i64) -> bool
where
    R: Rng + ?Sized,
    I: IntoIterator<Item = &'a mut PresenceEntry>,
{
    let flip = probability(rates.flip);
    let typing = probability(rates.typing);
    let mut changed = false;
    for entry in entries {
        let before = entry.status;
        if rng.gen_bool(flip) {
            entry.status = if entry.status == Status::Offline {
                Status::Online
            } else {
                Status::Offline
            };
        }
        if entry.status != Status::Offline && rng.gen_bool(typing) {
            entry.status = if entry.status == Status::Typing {
                Status::Online
            } else {
                Status::Typing
            };
        }
        if entry.status != before {
            entry.last_seen = now;
            changed = true;
        }
    }
    changed
}

// NaN and infinities count as "never".
fn probability(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
