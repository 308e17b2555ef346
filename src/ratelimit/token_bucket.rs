//! Token bucket rate limiting.
//!
//! Each key owns a bucket holding up to `floor(limit * capacity_multiplier)`
//! tokens. The bucket refills continuously at `limit / window` tokens per
//! second and every granted action spends one token, so bursts are bounded by
//! the capacity while the sustained rate converges on `limit` per `window`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::{offset, secs_between, Clock, SystemClock};
use super::decision::{Decision, TOKEN_BUCKET};
use super::strategy::{validate, RateLimitStrategy};
use crate::error::{Result, TollgateError};

/// Default ratio of bucket capacity to `limit`.
pub const DEFAULT_CAPACITY_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_update: DateTime<Utc>,
}

/// Continuous-refill token bucket keyed by caller identity.
#[derive(Debug)]
pub struct TokenBucket {
    capacity_multiplier: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a token bucket with the default capacity multiplier.
    pub fn new() -> Self {
        Self {
            capacity_multiplier: DEFAULT_CAPACITY_MULTIPLIER,
            buckets: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a token bucket whose capacity is `limit * capacity_multiplier`.
    ///
    /// # Errors
    ///
    /// Fails if the multiplier is not a positive finite number.
    pub fn with_capacity_multiplier(capacity_multiplier: f64) -> Result<Self> {
        if !capacity_multiplier.is_finite() || capacity_multiplier <= 0.0 {
            return Err(TollgateError::invalid(format!(
                "capacity multiplier must be positive and finite, got {capacity_multiplier}"
            )));
        }
        Ok(Self {
            capacity_multiplier,
            ..Self::new()
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configured capacity multiplier.
    pub fn capacity_multiplier(&self) -> f64 {
        self.capacity_multiplier
    }

    /// Number of keys currently holding a bucket.
    pub fn key_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.buckets.lock().clear();
    }

    /// Whole tokens a bucket holds for `limit`.
    fn capacity(&self, limit: u64) -> Result<f64> {
        let capacity = (limit as f64 * self.capacity_multiplier).floor();
        if capacity < 1.0 {
            return Err(TollgateError::invalid(format!(
                "bucket capacity for limit {limit} rounds to zero"
            )));
        }
        Ok(capacity)
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStrategy for TokenBucket {
    fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        validate(limit, window)?;
        let capacity = self.capacity(limit)?;
        let window_secs = window.as_secs_f64();
        let rate = limit as f64 / window_secs;

        trace!(key = %key, limit, window = ?window, "Checking token bucket");

        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, capacity, "Creating new token bucket");
            Bucket {
                tokens: capacity,
                last_update: now,
            }
        });

        // Multiply before dividing so whole windows refill exactly `limit` tokens.
        let elapsed = secs_between(bucket.last_update, now);
        bucket.tokens = (bucket.tokens + elapsed * limit as f64 / window_secs).min(capacity);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let reset_time = offset(now, (capacity - bucket.tokens) / rate);
            Ok(Decision::allow(
                bucket.tokens.floor() as u64,
                reset_time,
                TOKEN_BUCKET,
            ))
        } else {
            let retry_after = ((1.0 - bucket.tokens) / rate).max(0.0);
            let reset_time = offset(now, (capacity - bucket.tokens) / rate);
            debug!(
                key = %key,
                tokens = bucket.tokens,
                retry_after_secs = retry_after,
                "Token bucket exhausted"
            );
            Ok(Decision::deny(
                Duration::from_secs_f64(retry_after),
                reset_time,
                TOKEN_BUCKET,
            ))
        }
    }

    fn validate_args(&self, limit: u64, window: Duration) -> Result<()> {
        validate(limit, window)?;
        self.capacity(limit).map(|_| ())
    }

    fn reset(&self, key: &str) {
        if self.buckets.lock().remove(key).is_some() {
            debug!(key = %key, "Reset token bucket");
        }
    }
}
