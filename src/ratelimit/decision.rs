//! The outcome of a single rate limit check.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::clock::epoch_secs;

/// Tag for decisions produced by [`TokenBucket`](super::TokenBucket).
pub const TOKEN_BUCKET: &str = "token_bucket";
/// Tag for decisions produced by [`SlidingWindow`](super::SlidingWindow).
pub const SLIDING_WINDOW: &str = "sliding_window";
/// Tag for decisions produced by [`FixedWindow`](super::FixedWindow).
pub const FIXED_WINDOW: &str = "fixed_window";
/// Tag for allowed decisions produced by [`Composite`](super::Composite).
pub const COMPOSITE: &str = "composite";

/// An immutable rate limit decision.
///
/// Constructed only through [`Decision::allow`] and [`Decision::deny`], which
/// keep the invariants: a denied decision has `remaining == 0`, and an allowed
/// decision never carries a `retry_after`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    allowed: bool,
    remaining: u64,
    #[serde(serialize_with = "serialize_reset_time")]
    reset_time: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_retry_after")]
    retry_after: Option<Duration>,
    limit_type: String,
}

impl Decision {
    /// An allowed decision.
    pub fn allow(
        remaining: u64,
        reset_time: Option<DateTime<Utc>>,
        limit_type: impl Into<String>,
    ) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time,
            retry_after: None,
            limit_type: limit_type.into(),
        }
    }

    /// A denied decision.
    pub fn deny(
        retry_after: Duration,
        reset_time: Option<DateTime<Utc>>,
        limit_type: impl Into<String>,
    ) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time,
            retry_after: Some(retry_after),
            limit_type: limit_type.into(),
        }
    }

    /// Whether the action may proceed.
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Quota left after this decision.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// When the quota fully replenishes, if known.
    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.reset_time
    }

    /// Minimum wait before retrying. Only present on denials.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Which algorithm produced this decision.
    pub fn limit_type(&self) -> &str {
        &self.limit_type
    }

    /// The same decision, re-tagged.
    pub(crate) fn with_limit_type(mut self, limit_type: impl Into<String>) -> Self {
        self.limit_type = limit_type.into();
        self
    }

    /// Flatten into a string-keyed map for embedding in a response envelope.
    ///
    /// `reset_time` is epoch seconds and `retry_after` is seconds, both as
    /// floats; absent values serialize as `null`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::with_capacity(5);
        map.insert("allowed".into(), Value::Bool(self.allowed));
        map.insert("remaining".into(), Value::from(self.remaining));
        map.insert(
            "reset_time".into(),
            self.reset_time
                .map(|t| Value::from(epoch_secs(t)))
                .unwrap_or(Value::Null),
        );
        map.insert(
            "retry_after".into(),
            self.retry_after
                .map(|d| Value::from(d.as_secs_f64()))
                .unwrap_or(Value::Null),
        );
        map.insert("limit_type".into(), Value::String(self.limit_type.clone()));
        map
    }
}

fn serialize_reset_time<S: Serializer>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(t) => serializer.serialize_some(&epoch_secs(*t)),
        None => serializer.serialize_none(),
    }
}

fn serialize_retry_after<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}
