//! Fixed window rate limiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::{secs_between, Clock, SystemClock};
use super::decision::{Decision, FIXED_WINDOW};
use super::strategy::{validate, RateLimitStrategy};
use crate::error::{Result, TollgateError};

/// Requests counted against one epoch-aligned window.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    window_start: DateTime<Utc>,
}

/// A counter per key that resets at every window boundary.
///
/// Time is cut into windows of length `window` aligned to the Unix epoch. This
/// needs constant memory per key, but a caller can spend `limit` just before a
/// boundary and `limit` again just after it, up to twice the limit in a short
/// span.
#[derive(Debug)]
pub struct FixedWindow {
    counters: Mutex<HashMap<String, WindowCounter>>,
    clock: Arc<dyn Clock>,
}

impl FixedWindow {
    /// Create a fixed window limiter on the system clock.
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the current count for `key`, if it has a counter.
    pub fn current_count(&self, key: &str) -> Option<u64> {
        self.counters.lock().get(key).map(|c| c.count)
    }

    /// Number of keys currently holding a counter.
    pub fn key_count(&self) -> usize {
        self.counters.lock().len()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.lock().clear();
    }
}

impl Default for FixedWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Start of the epoch-aligned window containing `now`.
fn window_start(now: DateTime<Utc>, window: TimeDelta) -> Result<DateTime<Utc>> {
    let window_us = window
        .num_microseconds()
        .ok_or_else(|| TollgateError::invalid("window is too large"))?;
    let into_window = now.timestamp_micros().rem_euclid(window_us);
    now.checked_sub_signed(TimeDelta::microseconds(into_window))
        .ok_or_else(|| TollgateError::invalid("window start is out of range"))
}

impl RateLimitStrategy for FixedWindow {
    fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        let window_delta = validate(limit, window)?;

        trace!(key = %key, limit, window = ?window, "Checking fixed window");

        let now = self.clock.now();
        let current_start = window_start(now, window_delta)?;
        let reset_time = current_start.checked_add_signed(window_delta);

        let mut counters = self.counters.lock();
        let counter = counters.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, window_start = %current_start, "Creating new window counter");
            WindowCounter {
                count: 0,
                window_start: current_start,
            }
        });

        if counter.window_start != current_start {
            trace!(key = %key, window_start = %current_start, "Window rolled over");
            counter.count = 0;
            counter.window_start = current_start;
        }

        if counter.count < limit {
            counter.count += 1;
            return Ok(Decision::allow(
                limit - counter.count,
                reset_time,
                FIXED_WINDOW,
            ));
        }

        let retry_after = reset_time.map_or(window.as_secs_f64(), |reset| secs_between(now, reset));
        debug!(
            key = %key,
            count = counter.count,
            limit,
            "Fixed window limit exceeded"
        );

        Ok(Decision::deny(
            Duration::from_secs_f64(retry_after),
            reset_time,
            FIXED_WINDOW,
        ))
    }

    fn reset(&self, key: &str) {
        if self.counters.lock().remove(key).is_some() {
            debug!(key = %key, "Reset window counter");
        }
    }
}
