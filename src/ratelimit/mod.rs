//! Rate limiting strategies and the state they keep per key.

mod clock;
mod composite;
mod decision;
mod enforcer;
mod fixed_window;
mod key;
mod rules;
mod sliding_window;
mod strategy;
mod token_bucket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use composite::Composite;
pub use decision::{Decision, COMPOSITE, FIXED_WINDOW, SLIDING_WINDOW, TOKEN_BUCKET};
pub use enforcer::Enforcer;
pub use fixed_window::FixedWindow;
pub use key::{CallerIdentity, ClientKey};
pub use rules::{LimitRule, RateLimitRules, TimeUnit, DEFAULT_REQUESTS};
pub use sliding_window::{SlidingWindow, DEFAULT_MAX_ENTRIES_PER_KEY};
pub use strategy::RateLimitStrategy;
pub use token_bucket::{TokenBucket, DEFAULT_CAPACITY_MULTIPLIER};
