//! Applying rules through a strategy.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::decision::Decision;
use super::key::CallerIdentity;
use super::rules::RateLimitRules;
use super::strategy::RateLimitStrategy;
use crate::error::{Result, TollgateError};
use crate::usage;

/// A strategy paired with the rules that pick its `(limit, window)`.
///
/// This is the front door for request-handling code: it resolves limits from
/// tiers or caller overrides, asks the strategy, and optionally turns a denial
/// into [`TollgateError::RateLimited`].
#[derive(Debug, Clone)]
pub struct Enforcer {
    strategy: Arc<dyn RateLimitStrategy>,
    rules: RateLimitRules,
}

impl Enforcer {
    /// Create an enforcer over `strategy` using `rules`.
    pub fn new(strategy: Arc<dyn RateLimitStrategy>, rules: RateLimitRules) -> Self {
        Self { strategy, rules }
    }

    /// The underlying strategy.
    pub fn strategy(&self) -> &Arc<dyn RateLimitStrategy> {
        &self.strategy
    }

    /// The rules in use.
    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }

    /// Check `key` against the rule for `tier` (or the default rule).
    pub fn check(&self, key: &str, tier: Option<&str>) -> Result<Decision> {
        let rule = self.rules.find_limit(tier);
        trace!(key = %key, tier = ?tier, limit = rule.limit(), "Resolved rule");
        self.check_with(key, rule.limit(), rule.window())
    }

    /// Check `key` with explicit values.
    pub fn check_with(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        self.strategy.check_limit(key, limit, window)
    }

    /// Like [`check`](Self::check), but a denial becomes an error.
    ///
    /// # Errors
    ///
    /// [`TollgateError::RateLimited`] carrying the denying decision, or any
    /// configuration error from the strategy.
    pub fn enforce(&self, key: &str, tier: Option<&str>) -> Result<Decision> {
        Self::require_allowed(key, self.check(key, tier)?)
    }

    /// Enforce using limits requested in `metadata`, filling gaps from the
    /// default rule.
    pub fn enforce_with_overrides(
        &self,
        key: &str,
        metadata: &Map<String, Value>,
    ) -> Result<Decision> {
        let rule = self.rules.find_limit(None);
        let (limit, window) = usage::limit_overrides(metadata).apply(rule.limit(), rule.window());
        Self::require_allowed(key, self.check_with(key, limit, window)?)
    }

    /// Check whoever `identity` resolves to against the rule for `tier`.
    pub fn check_caller(&self, identity: &CallerIdentity, tier: Option<&str>) -> Result<Decision> {
        self.check(&identity.client_key().to_string_key(), tier)
    }

    /// Forget all state for `key`.
    pub fn reset(&self, key: &str) {
        self.strategy.reset(key);
    }

    fn require_allowed(key: &str, decision: Decision) -> Result<Decision> {
        if decision.allowed() {
            Ok(decision)
        } else {
            debug!(key = %key, limit_type = decision.limit_type(), "Enforcing denial");
            Err(TollgateError::RateLimited(decision))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::{LimitRule, TimeUnit};
    use crate::ratelimit::FixedWindow;
    use crate::usage::LIMITS_FIELD;

    fn enforcer() -> Enforcer {
        let clock = Arc::new(ManualClock::at_secs(30.0));
        let rules = RateLimitRules::new()
            .with_default(LimitRule::per(3, TimeUnit::Minute))
            .with_tier("free", LimitRule::per(1, TimeUnit::Minute))
            .with_tier("premium", LimitRule::per(5, TimeUnit::Minute));
        Enforcer::new(Arc::new(FixedWindow::new().with_clock(clock)), rules)
    }

    #[test]
    fn test_check_uses_tier_rule() {
        let enforcer = enforcer();
        let decision = enforcer.check("user:premium", Some("premium")).unwrap();
        assert_eq!(decision.remaining(), 4);

        let decision = enforcer.check("user:anon", None).unwrap();
        assert_eq!(decision.remaining(), 2);
    }

    #[test]
    fn test_enforce_turns_denial_into_error() {
        let enforcer = enforcer();
        assert!(enforcer.enforce("user:free", Some("free")).is_ok());

        match enforcer.enforce("user:free", Some("free")) {
            Err(TollgateError::RateLimited(decision)) => {
                assert!(!decision.allowed());
                assert_eq!(decision.retry_after(), Some(Duration::from_secs(30)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_enforce_propagates_invalid_configuration() {
        let enforcer = enforcer();
        let mut meta = Map::new();
        meta.insert(LIMITS_FIELD.into(), json!({ "requests": 0 }));
        // A zero override is ignored, so the default rule applies.
        assert!(enforcer.enforce_with_overrides("k", &meta).is_ok());

        let err = enforcer.check_with("k", 0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TollgateError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_enforce_with_overrides() {
        let enforcer = enforcer();
        let mut meta = Map::new();
        meta.insert(LIMITS_FIELD.into(), json!({ "requests": 2 }));

        assert_eq!(enforcer.enforce_with_overrides("k", &meta).unwrap().remaining(), 1);
        assert_eq!(enforcer.enforce_with_overrides("k", &meta).unwrap().remaining(), 0);
        assert!(matches!(
            enforcer.enforce_with_overrides("k", &meta),
            Err(TollgateError::RateLimited(_))
        ));
    }

    #[test]
    fn test_check_caller_charges_resolved_key() {
        let enforcer = enforcer();
        let identity = CallerIdentity {
            remote_addr: Some("10.1.1.1".into()),
            ..Default::default()
        };

        enforcer.check_caller(&identity, Some("free")).unwrap();
        assert!(!enforcer.check("ip:10.1.1.1", Some("free")).unwrap().allowed());
        assert!(enforcer.check("ip:10.9.9.9", Some("free")).unwrap().allowed());
    }

    #[test]
    fn test_reset_clears_key() {
        let enforcer = enforcer();
        enforcer.enforce("k", Some("free")).unwrap();
        assert!(enforcer.enforce("k", Some("free")).is_err());

        enforcer.reset("k");
        assert!(enforcer.enforce("k", Some("free")).is_ok());
    }
}
