use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Correlation id of an in-flight RPC query.
pub type SlotId = i64;

pub const DEFAULT_SLOT_CEILING: SlotId = 1_000_000_000;

/// Monotonic range `[begin, end)` of issued slot ids.
///
/// The start of the range is randomised so ids from a restarted process are
/// unlikely to collide with late answers addressed to the previous one.
#[derive(Debug)]
pub struct SlotSpace {
    begin: SlotId,
    end: SlotId,
    ceiling: SlotId,
    rng: StdRng,
}

impl SlotSpace {
    pub fn new(ceiling: SlotId) -> Self {
        Self::with_rng(ceiling, StdRng::from_os_rng())
    }

    pub fn with_seed(ceiling: SlotId, seed: u64) -> Self {
        Self::with_rng(ceiling, StdRng::seed_from_u64(seed))
    }

    fn with_rng(ceiling: SlotId, rng: StdRng) -> Self {
        let mut slots = Self {
            begin: 0,
            end: 0,
            ceiling: ceiling.max(4),
            rng,
        };
        slots.reseed();
        slots
    }

    pub fn begin(&self) -> SlotId {
        self.begin
    }

    pub fn end(&self) -> SlotId {
        self.end
    }

    pub fn ceiling(&self) -> SlotId {
        self.ceiling
    }

    /// Issues the next id, or `None` once the ceiling has been reached.
    pub fn create(&mut self) -> Option<SlotId> {
        if self.end >= self.ceiling {
            return None;
        }
        let slot = self.end;
        self.end += 1;
        Some(slot)
    }

    pub fn is_valid(&self, slot: SlotId) -> bool {
        self.begin <= slot && slot < self.end
    }

    /// Invalidates every issued id. Past the middle of the space the range
    /// restarts from a fresh random point.
    pub fn clear(&mut self) {
        self.begin = self.end;
        if self.begin > self.ceiling / 2 {
            self.reseed();
            debug!(begin = self.begin, "slot id space reseeded");
        }
    }

    fn reseed(&mut self) {
        let start = self.rng.random_range(1..=self.ceiling / 4);
        self.begin = start;
        self.end = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_increasing_and_valid() {
        let mut slots = SlotSpace::with_seed(1000, 7);
        let ids: Vec<SlotId> = (0..10).map(|_| slots.create().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
        assert!(ids.iter().all(|id| slots.is_valid(*id)));
        assert!(ids[0] >= 1 && ids[0] <= 250);
    }

    #[test]
    fn test_clear_invalidates() {
        let mut slots = SlotSpace::with_seed(1000, 7);
        let ids: Vec<SlotId> = (0..5).map(|_| slots.create().unwrap()).collect();
        slots.clear();
        assert!(ids.iter().all(|id| !slots.is_valid(*id)));
        let next = slots.create().unwrap();
        assert_eq!(next, ids[4] + 1);
    }

    #[test]
    fn test_exhaustion_and_reseed() {
        let mut slots = SlotSpace::with_seed(100, 3);
        while slots.create().is_some() {}
        assert_eq!(slots.end(), 100);
        assert!(slots.create().is_none());

        slots.clear();
        assert!(slots.begin() >= 1 && slots.begin() <= 25);
        assert!(slots.create().is_some());
    }
}
