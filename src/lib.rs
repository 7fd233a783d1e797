//! Dualrate - Sliding-Window Request and Token Rate Limiter
//!
//! This crate throttles calls to a capacity-constrained external service that
//! enforces both a requests-per-window and a tokens-per-window quota. Callers
//! invoke [`RateLimiter::acquire`] before each call and
//! [`RateLimiter::report_usage`] once the call's real token cost is known; the
//! limiter blocks the calling thread whenever either quota would be exceeded.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use crate::config::{DualrateConfig, LimiterConfig, SimulationConfig};
pub use crate::error::{DualrateError, Result};
pub use crate::ratelimit::{Clock, ManualClock, RateLimiter, SystemClock, UsageStats};
