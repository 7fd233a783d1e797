//! Rate limiting logic and state management.

mod clock;
mod limiter;
mod stats;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::RateLimiter;
pub use stats::UsageStats;
pub use window::WAIT_BUFFER_SECS;
