//! Layered policies built from several strategies.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::decision::{Decision, COMPOSITE};
use super::strategy::{validate, RateLimitStrategy};
use crate::error::{Result, TollgateError};

/// Requires every member strategy to allow an action.
///
/// Arguments are validated against every member before any member runs, so
/// a rejection leaves all member state untouched. Members are then consulted
/// in insertion order with the same `(key, limit, window)`. The first denial is returned immediately, re-tagged as
/// `composite_<type>`; members after it are not invoked for that call, while
/// members before it have already consumed quota. When every member allows,
/// the result carries the smallest `remaining` among them.
///
/// There is no lock across members: each one serializes its own per-key
/// state, so a `reset` racing a check on the same key may be observed as
/// partially applied.
#[derive(Debug, Default, Clone)]
pub struct Composite {
    members: Vec<(String, Arc<dyn RateLimitStrategy>)>,
}

impl Composite {
    /// Create an empty composite. At least one member must be added before
    /// it can answer checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named member, or replace the member already using `name` while
    /// keeping its position.
    pub fn with(mut self, name: impl Into<String>, strategy: Arc<dyn RateLimitStrategy>) -> Self {
        self.push(name, strategy);
        self
    }

    /// In-place form of [`with`](Self::with).
    pub fn push(&mut self, name: impl Into<String>, strategy: Arc<dyn RateLimitStrategy>) {
        let name = name.into();
        match self.members.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = strategy,
            None => self.members.push((name, strategy)),
        }
    }

    /// Member names in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _)| name.as_str())
    }

    /// Look up a member by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn RateLimitStrategy>> {
        self.members
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, strategy)| strategy)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the composite has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl RateLimitStrategy for Composite {
    fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        self.validate_args(limit, window)?;

        trace!(key = %key, limit, window = ?window, members = self.members.len(), "Checking composite");

        let mut remaining = u64::MAX;
        let mut reset_time = None;
        for (name, strategy) in &self.members {
            let decision = strategy.check_limit(key, limit, window)?;
            if !decision.allowed() {
                debug!(key = %key, member = %name, limit_type = decision.limit_type(), "Composite member denied");
                let tag = format!("{COMPOSITE}_{}", decision.limit_type());
                return Ok(decision.with_limit_type(tag));
            }
            remaining = remaining.min(decision.remaining());
            reset_time = reset_time.max(decision.reset_time());
        }

        Ok(Decision::allow(remaining, reset_time, COMPOSITE))
    }

    fn validate_args(&self, limit: u64, window: Duration) -> Result<()> {
        validate(limit, window)?;
        if self.members.is_empty() {
            return Err(TollgateError::invalid("composite strategy has no members"));
        }
        for (name, strategy) in &self.members {
            strategy.validate_args(limit, window).inspect_err(|e| {
                debug!(member = %name, error = %e, "Composite member rejected arguments");
            })?;
        }
        Ok(())
    }

    fn reset(&self, key: &str) {
        for (_, strategy) in &self.members {
            strategy.reset(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ratelimit::clock::{epoch_secs, ManualClock};
    use crate::ratelimit::{FixedWindow, SlidingWindow, TokenBucket};

    /// Counts calls before forwarding to the wrapped strategy.
    #[derive(Debug)]
    struct Counting<S> {
        inner: S,
        checks: AtomicUsize,
        resets: AtomicUsize,
    }

    impl<S> Counting<S> {
        fn new(inner: S) -> Self {
            Self {
                inner,
                checks: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
            }
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    impl<S: RateLimitStrategy> RateLimitStrategy for Counting<S> {
        fn check_limit(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.inner.check_limit(key, limit, window)
        }

        fn reset(&self, key: &str) {
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.inner.reset(key)
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_secs(500.0))
    }

    #[test]
    fn test_short_circuits_on_first_denial() {
        let clock = clock();
        let burst = TokenBucket::with_capacity_multiplier(1.0)
            .unwrap()
            .with_clock(clock.clone());
        let sustained = Arc::new(Counting::new(SlidingWindow::new().with_clock(clock)));
        let composite = Composite::new()
            .with("burst", Arc::new(burst))
            .with("sustained", sustained.clone());
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(composite.check_limit("k", 3, window).unwrap().allowed());
        }
        assert_eq!(sustained.checks(), 3);

        let denied = composite.check_limit("k", 3, window).unwrap();
        assert!(!denied.allowed());
        assert_eq!(denied.limit_type(), "composite_token_bucket");
        assert!(denied.retry_after().is_some());
        assert_eq!(sustained.checks(), 3, "sustained must not be consulted after a denial");
    }

    #[test]
    fn test_members_before_denial_consume_quota() {
        let clock = clock();
        let first = Arc::new(SlidingWindow::new().with_clock(clock.clone()));
        let second = Arc::new(FixedWindow::new().with_clock(clock));
        // Pre-spend the second member's quota for this window.
        second.check_limit("k", 1, Duration::from_secs(60)).unwrap();

        let composite = Composite::new()
            .with("first", first.clone())
            .with("second", second);

        let denied = composite.check_limit("k", 1, Duration::from_secs(60)).unwrap();
        assert_eq!(denied.limit_type(), "composite_fixed_window");
        assert_eq!(first.entry_count("k"), 1);
    }

    #[test]
    fn test_allowed_reports_minimum_remaining() {
        let clock = clock();
        let composite = Composite::new()
            .with("burst", Arc::new(TokenBucket::new().with_clock(clock.clone())))
            .with("sustained", Arc::new(SlidingWindow::new().with_clock(clock)));

        let decision = composite.check_limit("k", 5, Duration::from_secs(10)).unwrap();
        assert!(decision.allowed());
        assert_eq!(decision.limit_type(), COMPOSITE);
        // Token bucket has 9 of 10 left, the sliding window 4 of 5.
        assert_eq!(decision.remaining(), 4);
        assert!(decision.retry_after().is_none());
    }

    #[test]
    fn test_allowed_reports_latest_reset_time() {
        let clock = clock();
        let composite = Composite::new()
            .with("fixed", Arc::new(FixedWindow::new().with_clock(clock.clone())))
            .with("sliding", Arc::new(SlidingWindow::new().with_clock(clock)));

        let decision = composite.check_limit("k", 5, Duration::from_secs(60)).unwrap();
        // Fixed window resets at 540, the sliding log at 560.
        assert_eq!(epoch_secs(decision.reset_time().unwrap()), 560.0);
    }

    #[test]
    fn test_reset_reaches_every_member() {
        let clock = clock();
        let a = Arc::new(Counting::new(FixedWindow::new().with_clock(clock.clone())));
        let b = Arc::new(Counting::new(TokenBucket::new().with_clock(clock)));
        let composite = Composite::new().with("a", a.clone()).with("b", b.clone());
        let window = Duration::from_secs(60);

        while composite.check_limit("k", 2, window).unwrap().allowed() {}
        composite.reset("k");

        assert_eq!(a.resets.load(Ordering::SeqCst), 1);
        assert_eq!(b.resets.load(Ordering::SeqCst), 1);
        let decision = composite.check_limit("k", 2, window).unwrap();
        assert!(decision.allowed());
        assert_eq!(decision.remaining(), 1);
    }

    #[test]
    fn test_same_name_replaces_in_place() {
        let composite = Composite::new()
            .with("a", Arc::new(FixedWindow::new()))
            .with("b", Arc::new(SlidingWindow::new()))
            .with("a", Arc::new(TokenBucket::new()));

        assert_eq!(composite.names().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(composite.len(), 2);
        assert!(composite.get("a").is_some());
        assert!(composite.get("c").is_none());
    }

    #[test]
    fn test_empty_composite_rejected() {
        let composite = Composite::new();
        assert!(composite.is_empty());
        assert!(matches!(
            composite.check_limit("k", 1, Duration::from_secs(1)),
            Err(TollgateError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_invalid_arguments_rejected_before_any_member_runs() {
        let counting = Arc::new(Counting::new(FixedWindow::new()));
        let composite = Composite::new().with("only", counting.clone());

        assert!(composite.check_limit("k", 0, Duration::from_secs(1)).is_err());
        assert_eq!(counting.checks(), 0);
    }

    #[test]
    fn test_member_rejection_leaves_earlier_members_untouched() {
        let clock = clock();
        let sustained = Arc::new(SlidingWindow::new().with_clock(clock.clone()));
        let burst = TokenBucket::with_capacity_multiplier(0.5)
            .unwrap()
            .with_clock(clock);
        let composite = Composite::new()
            .with("sustained", sustained.clone())
            .with("burst", Arc::new(burst));

        for _ in 0..3 {
            assert!(matches!(
                composite.check_limit("k", 1, Duration::from_secs(60)),
                Err(TollgateError::InvalidConfiguration(_))
            ));
        }
        assert_eq!(sustained.entry_count("k"), 0);
        assert_eq!(sustained.key_count(), 0);
    }

    #[test]
    fn test_nested_composite_validates_every_level() {
        let inner = Composite::new().with(
            "burst",
            Arc::new(TokenBucket::with_capacity_multiplier(0.5).unwrap()),
        );
        let first = Arc::new(Counting::new(FixedWindow::new()));
        let outer = Composite::new()
            .with("first", first.clone())
            .with("inner", Arc::new(inner));

        assert!(outer.validate_args(1, Duration::from_secs(1)).is_err());
        assert!(outer.check_limit("k", 1, Duration::from_secs(1)).is_err());
        assert_eq!(first.checks(), 0);
        assert!(outer.validate_args(4, Duration::from_secs(1)).is_ok());
    }
}
