//! Monotonic time source for the polling loops.
//!
//! Grace-period and trailing-silence decisions only ever compare elapsed durations read
//! from a [`Clock`], never wall-clock timestamps.

use std::time::{Duration, Instant};

/// Monotonic elapsed time since an arbitrary, fixed origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration` of this clock's time.
    fn sleep(&self, duration: Duration);
}

/// Clock backed by `std::time::Instant`.
#[derive(Debug, Clone)]
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
