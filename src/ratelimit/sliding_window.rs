//! Sliding window (timestamp log) rate limiting.
//!
//! Every granted action is logged with its timestamp. A check first trims the
//! entries that have aged out of the trailing window, then grants the action if
//! fewer than `limit` entries remain. This enforces "at most `limit` actions in
//! any trailing `window`" exactly, at the cost of O(limit) memory per key.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::{secs_between, Clock, SystemClock};
use super::decision::{Decision, SLIDING_WINDOW};
use super::strategy::{validate, RateLimitStrategy};
use crate::error::{Result, TollgateError};

/// Default cap on timestamps retained per key.
pub const DEFAULT_MAX_ENTRIES_PER_KEY: usize = 10_000;

/// Added to every retry hint so a retry never lands exactly on the boundary.
const RETRY_BUFFER: Duration = Duration::from_millis(1);

/// Exact trailing-window limiter keyed by caller identity.
#[derive(Debug)]
pub struct SlidingWindow {
    max_entries_per_key: usize,
    logs: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    /// Create a sliding window with the default per-key entry cap.
    pub fn new() -> Self {
        Self {
            max_entries_per_key: DEFAULT_MAX_ENTRIES_PER_KEY,
            logs: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a sliding window retaining at most `max_entries_per_key`
    /// timestamps per key. Oldest entries are evicted first.
    ///
    /// # Errors
    ///
    /// Fails if the cap is zero.
    pub fn with_max_entries_per_key(max_entries_per_key: usize) -> Result<Self> {
        if max_entries_per_key == 0 {
            return Err(TollgateError::invalid("max_entries_per_key must be positive"));
        }
        Ok(Self {
            max_entries_per_key,
            ..Self::new()
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configured per-key entry cap.
    pub fn max_entries_per_key(&self) -> usize {
        self.max_entries_per_key
    }

    /// Number of timestamps currently logged for `key`.
    pub fn entry_count(&self, key: &str) -> usize {
        self.logs.lock().get(key).map_or(0, VecDeque::len)
    }

    /// Number of keys currently holding a log.
    pub fn key_count(&self) -> usize {
        self.logs.lock().len()
    }

    /// Drop every log.
    pub fn clear(&self) {
        self.logs.lock().clear();
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStrategy for SlidingWindow {
    fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        let window_delta = validate(limit, window)?;

        trace!(key = %key, limit, window = ?window, "Checking sliding window");

        let now = self.clock.now();
        let cutoff = now.checked_sub_signed(window_delta);
        let mut logs = self.logs.lock();
        let log = logs.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, "Creating new sliding window log");
            VecDeque::new()
        });

        // Entries are appended in time order, so expired ones form a prefix.
        if let Some(cutoff) = cutoff {
            while log.front().is_some_and(|&t| t <= cutoff) {
                log.pop_front();
            }
        }

        let count = log.len() as u64;
        if count < limit {
            log.push_back(now);
            if log.len() > self.max_entries_per_key {
                log.pop_front();
            }
            return Ok(Decision::allow(
                limit - count - 1,
                now.checked_add_signed(window_delta),
                SLIDING_WINDOW,
            ));
        }

        // `limit >= 1` and `count >= limit`, so the log is not empty.
        let oldest = log.front().copied().unwrap_or(now);
        let reset_time = oldest.checked_add_signed(window_delta);
        let wait = reset_time.map_or(window.as_secs_f64(), |reset| secs_between(now, reset));
        let retry_after = Duration::from_secs_f64(wait) + RETRY_BUFFER;

        debug!(
            key = %key,
            count,
            limit,
            retry_after_secs = retry_after.as_secs_f64(),
            "Sliding window limit exceeded"
        );

        Ok(Decision::deny(retry_after, reset_time, SLIDING_WINDOW))
    }

    fn reset(&self, key: &str) {
        if self.logs.lock().remove(key).is_some() {
            debug!(key = %key, "Reset sliding window log");
        }
    }
}
