//! Monotonic time source, injected into every timed loop so the timing
//! contracts can run deterministically under test.

use std::thread;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Milliseconds since the clock's origin.
    fn now_ms(&self) -> u64;

    /// Blocks the calling thread for at least `ms`.
    fn sleep_ms(&self, ms: u64);
}

/// Instant-backed clock with its origin at construction. One instance is
/// created at boot and shared, so `now_ms` doubles as elapsed-since-boot.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Manual clock for tests. `sleep_ms` advances time instead of blocking, so
/// a 4-second receive window runs in microseconds.
#[cfg(test)]
pub(crate) struct FakeClock {
    now: std::cell::Cell<u64>,
}

#[cfg(test)]
impl FakeClock {
    pub(crate) fn new(start_ms: u64) -> Self {
        Self {
            now: std::cell::Cell::new(start_ms),
        }
    }

    pub(crate) fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}
