//! The contract every rate limiting algorithm implements.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use super::decision::Decision;
use crate::error::{Result, TollgateError};

/// A rate limiting algorithm with per-key state.
///
/// Implementations own their state exclusively and must be safe to call
/// concurrently for the same or different keys. State for a key is created
/// lazily on the first check and lives until [`reset`](Self::reset) is called;
/// nothing expires idle keys in the background.
pub trait RateLimitStrategy: Debug + Send + Sync {
    /// Decide whether one more action for `key` fits into `limit` actions per
    /// `window`, consuming quota if it does.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::InvalidConfiguration`] when `limit` is zero or
    /// `window` is zero, before any state is touched.
    fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision>;

    /// Check that `(limit, window)` is usable without touching any state.
    ///
    /// [`check_limit`](Self::check_limit) fails with the same error whenever
    /// this does. Combinators call it on every member before any member
    /// records the action.
    fn validate_args(&self, limit: u64, window: Duration) -> Result<()> {
        validate(limit, window).map(|_| ())
    }

    /// Forget all state for `key`. Unknown keys are ignored.
    fn reset(&self, key: &str);
}

impl<S: RateLimitStrategy + ?Sized> RateLimitStrategy for Arc<S> {
    fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        (**self).check_limit(key, limit, window)
    }

    fn validate_args(&self, limit: u64, window: Duration) -> Result<()> {
        (**self).validate_args(limit, window)
    }

    fn reset(&self, key: &str) {
        (**self).reset(key)
    }
}

impl<S: RateLimitStrategy + ?Sized> RateLimitStrategy for Box<S> {
    fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        (**self).check_limit(key, limit, window)
    }

    fn validate_args(&self, limit: u64, window: Duration) -> Result<()> {
        (**self).validate_args(limit, window)
    }

    fn reset(&self, key: &str) {
        (**self).reset(key)
    }
}

/// Reject unusable `(limit, window)` pairs and return the window as a
/// `TimeDelta` for timestamp arithmetic.
pub(crate) fn validate(limit: u64, window: Duration) -> Result<TimeDelta> {
    if limit == 0 {
        return Err(TollgateError::invalid("limit must be positive"));
    }
    if window.is_zero() {
        return Err(TollgateError::invalid("window must be positive"));
    }
    let delta = TimeDelta::from_std(window)
        .map_err(|_| TollgateError::invalid(format!("window {window:?} is too large")))?;
    if delta.num_microseconds().map_or(true, |us| us == 0) {
        return Err(TollgateError::invalid(format!(
            "window {window:?} must be at least one microsecond and representable"
        )));
    }
    Ok(delta)
}
