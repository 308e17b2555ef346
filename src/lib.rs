//! Tollgate - In-process Rate Limiting Engine
//!
//! This crate implements interchangeable rate limiting strategies (token
//! bucket, sliding window, fixed window, and a composite of several) that
//! decide, per caller key, whether the next action fits its quota and report
//! what remains and when it resets.
//!
//! All state lives in memory inside the strategy that owns it. Keys are
//! created on first use and are only removed by an explicit `reset`, so an
//! integrator serving an unbounded set of callers should reset or rebuild
//! idle limiters periodically.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod usage;

pub use error::{Result, TollgateError};
pub use ratelimit::{
    Composite, Decision, Enforcer, FixedWindow, RateLimitStrategy, SlidingWindow, TokenBucket,
};
