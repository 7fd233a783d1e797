//! Time sources for the limiter.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A source of timestamps and a way to wait.
///
/// Timestamps are seconds as `f64` and must never decrease between calls.
pub trait Clock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> f64;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Monotonic wall clock measured from the moment it was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when told to.
///
/// `sleep` returns immediately after advancing the clock by the requested
/// duration, and every requested duration is recorded so callers can inspect
/// how long the limiter asked to wait.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: f64,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Create a clock starting at `start` seconds.
    pub fn new(start: f64) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move the clock forward by `secs`. Negative values are ignored.
    pub fn advance(&self, secs: f64) {
        if secs > 0.0 {
            self.state.lock().now += secs;
        }
    }

    /// Every duration passed to [`Clock::sleep`] so far, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Sum of all recorded sleeps.
    pub fn total_slept(&self) -> Duration {
        self.state.lock().sleeps.iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.state.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.now += duration.as_secs_f64();
        state.sleeps.push(duration);
    }
}
