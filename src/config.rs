//! Configuration management for Tollgate.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{
    Clock, Composite, Enforcer, FixedWindow, RateLimitRules, RateLimitStrategy, SlidingWindow,
    SystemClock, TokenBucket, DEFAULT_CAPACITY_MULTIPLIER, DEFAULT_MAX_ENTRIES_PER_KEY,
};

/// Main configuration for a Tollgate engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Which strategy to build
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Limit rules applied by the enforcer
    #[serde(default)]
    pub rules: RateLimitRules,
}

/// Strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    TokenBucket {
        #[serde(default = "default_capacity_multiplier")]
        capacity_multiplier: f64,
    },
    SlidingWindow {
        #[serde(default = "default_max_entries_per_key")]
        max_entries_per_key: usize,
    },
    FixedWindow,
    Composite {
        /// Members in evaluation order
        members: Vec<MemberConfig>,
    },
}

/// A named member of a composite strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub name: String,
    pub strategy: StrategyConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::TokenBucket {
            capacity_multiplier: default_capacity_multiplier(),
        }
    }
}

fn default_capacity_multiplier() -> f64 {
    DEFAULT_CAPACITY_MULTIPLIER
}

fn default_max_entries_per_key() -> usize {
    DEFAULT_MAX_ENTRIES_PER_KEY
}

impl StrategyConfig {
    /// Build the strategy on the system clock.
    pub fn build(&self) -> Result<Arc<dyn RateLimitStrategy>> {
        self.build_with_clock(Arc::new(SystemClock))
    }

    /// Build the strategy, sharing `clock` with every member.
    pub fn build_with_clock(&self, clock: Arc<dyn Clock>) -> Result<Arc<dyn RateLimitStrategy>> {
        let strategy: Arc<dyn RateLimitStrategy> = match self {
            StrategyConfig::TokenBucket {
                capacity_multiplier,
            } => Arc::new(
                TokenBucket::with_capacity_multiplier(*capacity_multiplier)?.with_clock(clock),
            ),
            StrategyConfig::SlidingWindow {
                max_entries_per_key,
            } => Arc::new(
                SlidingWindow::with_max_entries_per_key(*max_entries_per_key)?.with_clock(clock),
            ),
            StrategyConfig::FixedWindow => Arc::new(FixedWindow::new().with_clock(clock)),
            StrategyConfig::Composite { members } => {
                if members.is_empty() {
                    return Err(TollgateError::Config(
                        "composite strategy needs at least one member".into(),
                    ));
                }
                let mut seen = HashSet::new();
                let mut composite = Composite::new();
                for member in members {
                    if !seen.insert(member.name.as_str()) {
                        return Err(TollgateError::Config(format!(
                            "duplicate composite member {:?}",
                            member.name
                        )));
                    }
                    composite.push(
                        member.name.clone(),
                        member.strategy.build_with_clock(clock.clone())?,
                    );
                }
                Arc::new(composite)
            }
        };
        Ok(strategy)
    }
}

impl TollgateConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.rules.validate()?;
        Ok(config)
    }

    /// Build an enforcer on the system clock.
    pub fn build_enforcer(&self) -> Result<Enforcer> {
        self.build_enforcer_with_clock(Arc::new(SystemClock))
    }

    /// Build an enforcer whose strategies read time from `clock`.
    pub fn build_enforcer_with_clock(&self, clock: Arc<dyn Clock>) -> Result<Enforcer> {
        let strategy = self.strategy.build_with_clock(clock)?;
        info!(strategy = ?self.strategy, tiers = self.rules.tiers.len(), "Built rate limit enforcer");
        Ok(Enforcer::new(strategy, self.rules.clone()))
    }
}
