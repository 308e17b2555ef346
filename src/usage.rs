//! Usage signals exchanged with the far end of a request.
//!
//! The request layer may embed a [`Decision`] in a response's metadata under
//! [`RESULT_FIELD`], and callers may ask for different limits by sending
//! `{"requests": n, "window": secs}` under [`LIMITS_FIELD`]. The engine itself
//! has no network surface; these helpers only read and write JSON maps.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::ratelimit::Decision;

macro_rules! core_path {
    () => {
        "github.com/a2aproject/a2a-samples/extensions/ratelimiter/v1"
    };
}

/// URI advertising rate limit support.
pub const EXTENSION_URI: &str = concat!("https://", core_path!());

/// Metadata field carrying requested limits.
pub const LIMITS_FIELD: &str = concat!(core_path!(), "/limits");

/// Metadata field carrying a serialized decision.
pub const RESULT_FIELD: &str = concat!(core_path!(), "/result");

/// Limits a caller asked for. Missing values fall back to the configured rule.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LimitOverrides {
    pub requests: Option<u64>,
    pub window: Option<Duration>,
}

impl LimitOverrides {
    /// Apply the overrides on top of a `(limit, window)` pair.
    pub fn apply(&self, limit: u64, window: Duration) -> (u64, Duration) {
        (self.requests.unwrap_or(limit), self.window.unwrap_or(window))
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_none() && self.window.is_none()
    }
}

/// Store `decision` in `metadata` under [`RESULT_FIELD`].
pub fn attach_usage(metadata: &mut Map<String, Value>, decision: &Decision) {
    metadata.insert(RESULT_FIELD.to_string(), Value::Object(decision.to_map()));
}

/// Read limit overrides from `metadata`.
///
/// Only positive values are honored; `requests` must be an integer and
/// `window` a number of seconds. Anything else is ignored.
pub fn limit_overrides(metadata: &Map<String, Value>) -> LimitOverrides {
    let Some(limits) = metadata.get(LIMITS_FIELD).and_then(Value::as_object) else {
        return LimitOverrides::default();
    };

    let requests = limits
        .get("requests")
        .and_then(Value::as_u64)
        .filter(|&n| n > 0);
    let window = limits
        .get("window")
        .and_then(Value::as_f64)
        .filter(|&secs| secs.is_finite() && secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());

    let overrides = LimitOverrides { requests, window };
    if overrides.is_empty() && !limits.is_empty() {
        debug!(field = LIMITS_FIELD, "Ignoring malformed limit overrides");
    }
    overrides
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn metadata(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_fields_share_core_path() {
        assert_eq!(
            EXTENSION_URI,
            "https://github.com/a2aproject/a2a-samples/extensions/ratelimiter/v1"
        );
        assert_eq!(LIMITS_FIELD, format!("{}/limits", core_path!()));
        assert_eq!(RESULT_FIELD, format!("{}/result", core_path!()));
    }

    #[test]
    fn test_attach_usage() {
        let mut meta = Map::new();
        meta.insert("other".into(), json!(1));
        let decision = Decision::deny(Duration::from_secs(2), None, "fixed_window");

        attach_usage(&mut meta, &decision);

        assert_eq!(meta["other"], json!(1));
        assert_eq!(
            meta[RESULT_FIELD],
            json!({
                "allowed": false,
                "remaining": 0,
                "reset_time": null,
                "retry_after": 2.0,
                "limit_type": "fixed_window",
            })
        );
    }

    #[test]
    fn test_limit_overrides_read() {
        let meta = metadata(json!({ LIMITS_FIELD: { "requests": 5, "window": 30 } }));
        let overrides = limit_overrides(&meta);
        assert_eq!(overrides.requests, Some(5));
        assert_eq!(overrides.window, Some(Duration::from_secs(30)));
        assert_eq!(overrides.apply(100, Duration::from_secs(60)), (5, Duration::from_secs(30)));
    }

    #[test]
    fn test_limit_overrides_partial() {
        let meta = metadata(json!({ LIMITS_FIELD: { "window": 0.5 } }));
        let overrides = limit_overrides(&meta);
        assert_eq!(
            overrides.apply(100, Duration::from_secs(60)),
            (100, Duration::from_millis(500))
        );
    }

    #[test]
    fn test_limit_overrides_ignore_bad_values() {
        let meta = metadata(json!({ LIMITS_FIELD: { "requests": -1, "window": "soon" } }));
        assert!(limit_overrides(&meta).is_empty());

        let meta = metadata(json!({ LIMITS_FIELD: { "requests": 0, "window": 0 } }));
        assert!(limit_overrides(&meta).is_empty());

        let meta = metadata(json!({ LIMITS_FIELD: "not an object" }));
        assert!(limit_overrides(&meta).is_empty());

        assert!(limit_overrides(&Map::new()).is_empty());
    }
}
