//! Time sources for rate limiting strategies.
//!
//! Strategies never read the system time directly. They ask a [`Clock`], which
//! lets tests (and integrators that replay traffic) drive time by hand.

use std::fmt::Debug;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// A source of the current wall-clock time.
pub trait Clock: Debug + Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a clock frozen at the Unix epoch.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Create a clock frozen `secs` seconds after the Unix epoch.
    pub fn at_secs(secs: f64) -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH + delta_from_secs(secs))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += delta_from_secs(by.as_secs_f64());
    }

    /// Jump to `secs` seconds after the Unix epoch. Jumping backwards is allowed.
    pub fn set_secs(&self, secs: f64) {
        *self.now.lock() = DateTime::<Utc>::UNIX_EPOCH + delta_from_secs(secs);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_epoch()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Convert fractional seconds to a `TimeDelta` with microsecond resolution.
pub(crate) fn delta_from_secs(secs: f64) -> TimeDelta {
    TimeDelta::microseconds((secs * 1_000_000.0).round() as i64)
}

/// `at` shifted forward by `secs`, or `None` if the result is unrepresentable.
pub(crate) fn offset(at: DateTime<Utc>, secs: f64) -> Option<DateTime<Utc>> {
    at.checked_add_signed(delta_from_secs(secs))
}

/// Seconds elapsed from `earlier` to `later`, clamped at zero so that a clock
/// stepping backwards never produces negative elapsed time.
pub(crate) fn secs_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let micros = (later - earlier).num_microseconds().unwrap_or(i64::MAX);
    micros.max(0) as f64 / 1_000_000.0
}

/// Seconds since the Unix epoch as a float.
pub(crate) fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}
