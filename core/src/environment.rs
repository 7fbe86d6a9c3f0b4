//! Ambient dependencies reducers are allowed to read but never mutate
//! directly.

use chrono::{DateTime, Utc};

/// A source of wall-clock time, abstracted so tests can inject a fixed or
/// controllable clock instead of the system clock.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
