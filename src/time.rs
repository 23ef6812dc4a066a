//! `NetworkTimeProvider` collaborator (SPEC_FULL.md §6): current UTC time as
//! milliseconds since the Unix epoch, wrapped behind a trait so header
//! validation's max-time-drift rule (SPEC_FULL.md §4.4 rule 4) can be
//! exercised against a fixed clock in tests instead of real wall time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait NetworkTimeProvider: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl NetworkTimeProvider for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_millis() as u64
    }
}

/// A settable clock for deterministic tests of time-drift rules.
#[derive(Clone)]
pub struct FixedClock(Arc<AtomicU64>);

impl FixedClock {
    pub fn new(now_ms: u64) -> Self {
        FixedClock(Arc::new(AtomicU64::new(now_ms)))
    }

    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.0.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl NetworkTimeProvider for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1500);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn system_clock_is_plausible() {
        let now = SystemClock.now_ms();
        assert!(now > 1_700_000_000_000); // sometime after 2023
    }
}
