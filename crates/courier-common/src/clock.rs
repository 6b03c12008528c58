//! Wall-clock abstraction.

use chrono::{DateTime, Utc};

/// Source of the current UTC instant.
///
/// Injectable so store behaviour that depends on time, like timeout leases,
/// can be exercised with deterministic time travel.
pub trait Clock: Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven [`Clock`] for tests.
#[cfg(any(test, feature = "test"))]
#[derive(Debug)]
pub struct ManualClock(parking_lot::Mutex<DateTime<Utc>>);

#[cfg(any(test, feature = "test"))]
impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(parking_lot::Mutex::new(start))
    }

    /// Move the clock forward by `step`.
    pub fn advance(&self, step: chrono::Duration) {
        let mut now = self.0.lock();
        *now += step;
    }
}

#[cfg(any(test, feature = "test"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
