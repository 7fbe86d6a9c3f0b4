//! A controllable clock for deterministic time-dependent tests.

use chrono::{DateTime, Utc};
use marketplace_core::Clock;
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock whose reading can be advanced explicitly, instead of tracking
/// wall-clock time.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    /// Start the clock at `time`.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(time.timestamp_millis()),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        self.millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, time: DateTime<Utc>) {
        self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        #[allow(clippy::unwrap_used)]
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap()
    }
}

/// A clock fixed at a convenient, arbitrary point in time, for tests that
/// don't care what "now" is as long as it's stable.
#[must_use]
pub fn test_clock() -> FixedClock {
    #[allow(clippy::unwrap_used)]
    FixedClock::new("2024-01-01T00:00:00Z".parse().unwrap())
}
