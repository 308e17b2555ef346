//! Rate limit rules configuration and lookup.
//!
//! Rules map caller tiers (e.g. `free`, `premium`) to a limit and window, with
//! a default rule for callers whose tier is unknown or unset.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TollgateError};

/// Requests allowed per window by the default rule.
pub const DEFAULT_REQUESTS: u64 = 100;

/// A complete set of limit rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// Rule for callers without a matching tier
    #[serde(default)]
    pub default: LimitRule,
    /// Map of tier name to rule
    #[serde(default)]
    pub tiers: HashMap<String, LimitRule>,
}

/// A rate limit rule specifying the limit and time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Number of requests allowed per window
    pub requests_per_unit: u64,
    /// The time unit
    pub unit: TimeUnit,
    /// How many units make up one window
    #[serde(default = "default_unit_multiplier")]
    pub unit_multiplier: u32,
    /// Optional name/description for this limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_unit_multiplier() -> u32 {
    1
}

impl Default for LimitRule {
    fn default() -> Self {
        Self::per(DEFAULT_REQUESTS, TimeUnit::Minute)
    }
}

/// Time unit for rate limit windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl LimitRule {
    /// `requests` per one `unit`.
    pub fn per(requests: u64, unit: TimeUnit) -> Self {
        Self {
            requests_per_unit: requests,
            unit,
            unit_multiplier: 1,
            name: None,
        }
    }

    /// Stretch the window to `multiplier` units.
    pub fn times(mut self, multiplier: u32) -> Self {
        self.unit_multiplier = multiplier;
        self
    }

    /// Attach a name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The limit passed to strategies.
    pub fn limit(&self) -> u64 {
        self.requests_per_unit
    }

    /// The window passed to strategies.
    pub fn window(&self) -> Duration {
        self.unit.duration() * self.unit_multiplier
    }

    fn validate(&self, label: &str) -> Result<()> {
        if self.requests_per_unit == 0 {
            return Err(TollgateError::Config(format!(
                "rule {label}: requests_per_unit must be positive"
            )));
        }
        if self.unit_multiplier == 0 {
            return Err(TollgateError::Config(format!(
                "rule {label}: unit_multiplier must be positive"
            )));
        }
        Ok(())
    }
}

impl RateLimitRules {
    /// Create rules holding only the default rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default rule.
    pub fn with_default(mut self, rule: LimitRule) -> Self {
        self.default = rule;
        self
    }

    /// Add or replace a tier.
    pub fn with_tier(mut self, tier: impl Into<String>, rule: LimitRule) -> Self {
        self.tiers.insert(tier.into(), rule);
        self
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check every rule is usable by a strategy.
    pub fn validate(&self) -> Result<()> {
        self.default.validate("default")?;
        for (tier, rule) in &self.tiers {
            rule.validate(tier)?;
        }
        Ok(())
    }

    /// Find the rule for a tier, falling back to the default rule.
    pub fn find_limit(&self, tier: Option<&str>) -> &LimitRule {
        match tier {
            Some(name) => self.tiers.get(name).unwrap_or_else(|| {
                debug!(tier = %name, "Unknown tier, using default rule");
                &self.default
            }),
            None => &self.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule() {
        let rules = RateLimitRules::new();
        let rule = rules.find_limit(None);
        assert_eq!(rule.limit(), 100);
        assert_eq!(rule.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_tiered_rules() {
        let yaml = r#"
default:
  requests_per_unit: 5
  unit: second
tiers:
  free:
    requests_per_unit: 10
    unit: minute
  premium:
    requests_per_unit: 100
    unit: minute
  enterprise:
    requests_per_unit: 1000
    unit: minute
    name: enterprise plan
"#;
        let rules = RateLimitRules::from_yaml(yaml).unwrap();
        assert_eq!(rules.tiers.len(), 3);
        assert_eq!(rules.find_limit(Some("premium")).limit(), 100);
        assert_eq!(
            rules.find_limit(Some("enterprise")).name.as_deref(),
            Some("enterprise plan")
        );
        assert_eq!(rules.find_limit(None).window(), Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_tier_falls_back_to_default() {
        let rules = RateLimitRules::new().with_tier("free", LimitRule::per(10, TimeUnit::Minute));
        assert_eq!(rules.find_limit(Some("platinum")), &rules.default);
    }

    #[test]
    fn test_unit_multiplier_stretches_window() {
        let yaml = r#"
default:
  requests_per_unit: 3
  unit: second
  unit_multiplier: 10
"#;
        let rules = RateLimitRules::from_yaml(yaml).unwrap();
        assert_eq!(rules.default.window(), Duration::from_secs(10));
        assert_eq!(LimitRule::per(1, TimeUnit::Hour).times(2).window(), Duration::from_secs(7200));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let rules = RateLimitRules::from_yaml("tiers: {}").unwrap();
        assert_eq!(rules.default, LimitRule::default());
    }

    #[test]
    fn test_zero_requests_rejected() {
        let yaml = r#"
tiers:
  broken:
    requests_per_unit: 0
    unit: second
"#;
        let err = RateLimitRules::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_zero_multiplier_rejected() {
        let rules = RateLimitRules::new().with_default(LimitRule::per(1, TimeUnit::Second).times(0));
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_unknown_unit_rejected() {
        let yaml = r#"
default:
  requests_per_unit: 1
  unit: fortnight
"#;
        assert!(matches!(
            RateLimitRules::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_time_unit_duration() {
        assert_eq!(TimeUnit::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeUnit::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Day.duration(), Duration::from_secs(86400));
    }
}
