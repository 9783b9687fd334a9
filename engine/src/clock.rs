//! Write clock for stamping record timestamps.
//!
//! Incremental sync asks peers for everything newer than the highest
//! `updated_at` seen locally, so timestamps issued by one node must never go
//! backwards or repeat, even if the wall clock does.

use crate::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// How far ahead of the local wall clock a peer's timestamp may be.
pub const MAX_CLOCK_SKEW_MS: Timestamp = 24 * 60 * 60 * 1000;

/// A millisecond clock that never returns the same value twice.
///
/// Ordering rules:
/// 1. The wall clock wins when it is ahead of the last issued value
/// 2. Otherwise the last issued value plus one is returned
#[derive(Debug, Default)]
pub struct WriteClock {
    last: AtomicU64,
}

impl WriteClock {
    /// Create a clock that has issued nothing yet.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Create a clock that continues after `last`.
    pub fn starting_after(last: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Issue the next timestamp.
    pub fn now(&self) -> Timestamp {
        self.tick_from(wall_clock_millis())
    }

    /// Make sure later timestamps are issued after `seen`.
    /// Used when applying records received from peers.
    pub fn observe(&self, seen: Timestamp) {
        self.last.fetch_max(seen, Ordering::SeqCst);
    }

    /// The last timestamp issued or observed.
    pub fn last(&self) -> Timestamp {
        self.last.load(Ordering::SeqCst)
    }

    fn tick_from(&self, wall: Timestamp) -> Timestamp {
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(current.saturating_add(1));
            match self
                .last
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Whether a peer's timestamp is close enough to the wall clock to observe.
pub fn is_plausible(ts: Timestamp) -> bool {
    ts <= wall_clock_millis().saturating_add(MAX_CLOCK_SKEW_MS)
}

/// Milliseconds since the Unix epoch.
pub fn wall_clock_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clock_starts_at_zero() {
        let clock = WriteClock::new();
        assert_eq!(clock.last(), 0);
    }

    #[test]
    fn follows_wall_clock_when_ahead() {
        let clock = WriteClock::starting_after(10);
        assert_eq!(clock.tick_from(1000), 1000);
        assert_eq!(clock.last(), 1000);
    }

    #[test]
    fn never_repeats_when_wall_clock_stalls() {
        let clock = WriteClock::new();
        assert_eq!(clock.tick_from(500), 500);
        assert_eq!(clock.tick_from(500), 501);
        assert_eq!(clock.tick_from(499), 502);
    }

    #[test]
    fn observe_moves_clock_forward_only() {
        let clock = WriteClock::starting_after(100);
        clock.observe(50);
        assert_eq!(clock.last(), 100);
        clock.observe(2000);
        assert_eq!(clock.last(), 2000);
        assert_eq!(clock.tick_from(1500), 2001);
    }

    #[test]
    fn tick_saturates_at_max() {
        let clock = WriteClock::starting_after(Timestamp::MAX);
        assert_eq!(clock.tick_from(0), Timestamp::MAX);
    }

    #[test]
    fn plausibility_bound() {
        let now = wall_clock_millis();
        assert!(is_plausible(now));
        assert!(is_plausible(now + 60_000));
        assert!(!is_plausible(now + MAX_CLOCK_SKEW_MS + 60_000));
        assert!(!is_plausible(Timestamp::MAX));
    }

    #[test]
    fn now_is_strictly_increasing() {
        let clock = WriteClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }
}
