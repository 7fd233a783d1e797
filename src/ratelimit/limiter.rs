//! Core rate limiter implementation.

use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::config::LimiterConfig;
use crate::error::Result;

use super::clock::{Clock, SystemClock};
use super::stats::UsageStats;
use super::window::{with_buffer, UsageWindow};

/// A blocking limiter for a request quota and a token quota sharing one
/// sliding window.
///
/// Call [`acquire`](Self::acquire) before each throttled call and
/// [`report_usage`](Self::report_usage) once its token cost is known. All
/// operations are serialized behind one lock, and that lock stays held while
/// a caller sleeps: admission is strictly ordered, and every recorded request
/// is visible to the next caller's decision.
///
/// This struct is thread-safe and can be shared across threads in an `Arc`.
pub struct RateLimiter<C: Clock = SystemClock> {
    config: LimiterConfig,
    clock: C,
    window: Mutex<UsageWindow>,
}

impl RateLimiter<SystemClock> {
    /// Create a limiter driven by the system clock.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::new())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter driven by `clock`.
    pub fn with_clock(config: LimiterConfig, clock: C) -> Result<Self> {
        config.validate()?;

        debug!(
            rpm_limit = ?config.rpm_limit,
            tpm_limit = ?config.tpm_limit,
            window_seconds = config.window_seconds,
            "Creating rate limiter"
        );

        Ok(Self {
            window: Mutex::new(UsageWindow::new(&config)),
            config,
            clock,
        })
    }

    /// Block until one more request fits under the request limit, then
    /// record it.
    ///
    /// Token usage is not considered here since the cost of the upcoming call
    /// is unknown; see [`acquire_with_estimate`](Self::acquire_with_estimate).
    pub fn acquire(&self) {
        let mut window = self.window.lock();
        let now = self.clock.now();
        window.trim_expired(now);

        let wait = with_buffer(window.request_wait(now));
        if wait > 0.0 {
            info!(
                wait_secs = wait,
                current = window.request_count(),
                limit = ?self.config.rpm_limit,
                "Waiting to respect RPM limit"
            );
            self.clock.sleep(wait_duration(wait));
        }

        self.admit(&mut window);
    }

    /// Block until one more request costing `estimated_tokens` fits under
    /// both limits, then record it.
    ///
    /// The estimate only shapes the wait; nothing is reserved, and the real
    /// cost must still be passed to [`report_usage`](Self::report_usage).
    pub fn acquire_with_estimate(&self, estimated_tokens: u64) {
        let mut window = self.window.lock();
        let now = self.clock.now();
        window.trim_expired(now);

        let wait = window.compute_wait_time(now, estimated_tokens);
        if wait > 0.0 {
            info!(
                wait_secs = wait,
                requests = window.request_count(),
                rpm_limit = ?self.config.rpm_limit,
                tokens = window.token_sum(),
                estimated_tokens,
                tpm_limit = ?self.config.tpm_limit,
                "Waiting to respect RPM/TPM limits"
            );
            self.clock.sleep(wait_duration(wait));
        }

        self.admit(&mut window);
    }

    /// Record the token cost of a finished call, blocking until the window's
    /// token sum is back within the token limit.
    ///
    /// This is the only place token backpressure is applied: the wait delays
    /// the caller's next cycle rather than the call that overshot.
    pub fn report_usage(&self, actual_tokens: u64) {
        let mut window = self.window.lock();
        let now = self.clock.now();
        window.trim_expired(now);
        window.record_tokens(now, actual_tokens);

        debug!(
            tokens = actual_tokens,
            window_tokens = window.token_sum(),
            "Recorded token usage"
        );

        let wait = with_buffer(window.token_wait(now, 0));
        if wait > 0.0 {
            info!(
                wait_secs = wait,
                current = window.token_sum(),
                limit = ?self.config.tpm_limit,
                "TPM limit exceeded, waiting"
            );
            self.clock.sleep(wait_duration(wait));
        }
    }

    /// The delay [`acquire_with_estimate`](Self::acquire_with_estimate) would
    /// take right now, without waiting or recording anything.
    pub fn wait_time(&self, estimated_tokens: u64) -> Duration {
        let mut window = self.window.lock();
        let now = self.clock.now();
        window.trim_expired(now);
        wait_duration(window.compute_wait_time(now, estimated_tokens))
    }

    /// Snapshot of the usage inside the current window.
    pub fn current_stats(&self) -> UsageStats {
        let mut window = self.window.lock();
        let (request_count, token_sum) = window.current_usage(self.clock.now());
        UsageStats::new(
            request_count,
            self.config.rpm_limit,
            token_sum,
            self.config.tpm_limit,
        )
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn window_seconds(&self) -> f64 {
        self.config.window_seconds
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn admit(&self, window: &mut UsageWindow) {
        let now = self.clock.now();
        window.trim_expired(now);
        window.record_request(now);

        trace!(
            requests = window.request_count(),
            limit = ?self.config.rpm_limit,
            "Request admitted"
        );
    }
}

/// Saturates instead of panicking on waits beyond what `Duration` holds.
fn wait_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DualrateError;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Instant;

    const EPS: f64 = 1e-6;

    fn manual_limiter(
        rpm: Option<u64>,
        tpm: Option<u64>,
        window: f64,
    ) -> RateLimiter<ManualClock> {
        let config = LimiterConfig {
            rpm_limit: rpm,
            tpm_limit: tpm,
            window_seconds: window,
        };
        RateLimiter::with_clock(config, ManualClock::new(1000.0)).unwrap()
    }

    fn secs(durations: &[Duration]) -> Vec<f64> {
        durations.iter().map(Duration::as_secs_f64).collect()
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(LimiterConfig::new()).unwrap();
        let stats = limiter.current_stats();
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.token_sum, 0);
        assert_eq!(limiter.window_seconds(), 60.0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = RateLimiter::new(LimiterConfig::new().with_rpm_limit(0)).err();
        assert!(matches!(err, Some(DualrateError::InvalidArgument(_))));

        let err = RateLimiter::new(LimiterConfig::new().with_window_seconds(0.0)).err();
        assert!(matches!(err, Some(DualrateError::InvalidArgument(_))));
    }

    #[test]
    fn test_concrete_scenario() {
        let limiter = manual_limiter(Some(2), Some(100), 1.0);
        let clock = limiter.clock();

        limiter.acquire();
        limiter.acquire();
        assert!(clock.sleeps().is_empty());

        // Third request waits for the first to leave the window
        limiter.acquire();
        let sleeps = secs(&clock.sleeps());
        assert_eq!(sleeps.len(), 1);
        assert!((sleeps[0] - 1.1).abs() < EPS);

        // The two earlier requests have expired, the third is recorded
        assert_eq!(limiter.current_stats().request_count, 1);

        limiter.report_usage(60);
        assert_eq!(clock.sleeps().len(), 1);

        // 60 + 60 > 100: wait for the first 60 to expire
        limiter.report_usage(60);
        let sleeps = secs(&clock.sleeps());
        assert_eq!(sleeps.len(), 2);
        assert!((sleeps[1] - 1.1).abs() < EPS);

        let stats = limiter.current_stats();
        assert_eq!(stats.token_sum, 0);
        assert_eq!(stats.request_count, 0);
    }

    #[test]
    fn test_rpm_wait_measured_from_oldest_request() {
        let limiter = manual_limiter(Some(3), None, 10.0);
        let clock = limiter.clock();

        limiter.acquire();
        clock.advance(2.0);
        limiter.acquire();
        clock.advance(2.0);
        limiter.acquire();
        clock.advance(1.0);

        // Oldest at 1000.0 leaves the window at 1010.0, now is 1005.0
        assert!((limiter.wait_time(0).as_secs_f64() - 5.1).abs() < EPS);

        limiter.acquire();
        assert!((clock.sleeps()[0].as_secs_f64() - 5.1).abs() < EPS);
        assert_eq!(limiter.current_stats().request_count, 3);
    }

    #[test]
    fn test_acquire_ignores_reported_tokens() {
        let limiter = manual_limiter(None, Some(10), 60.0);

        for _ in 0..50 {
            limiter.acquire();
        }
        assert!(limiter.clock().sleeps().is_empty());
        assert_eq!(limiter.current_stats().request_count, 50);
    }

    #[test]
    fn test_report_usage_within_limit_does_not_wait() {
        let limiter = manual_limiter(None, Some(100), 60.0);

        limiter.report_usage(40);
        limiter.report_usage(60);
        assert!(limiter.clock().sleeps().is_empty());

        let stats = limiter.current_stats();
        assert_eq!(stats.token_sum, 100);
        assert_eq!(stats.tpm_utilization, 100.0);
    }

    #[test]
    fn test_report_usage_waits_until_sum_is_within_limit() {
        let limiter = manual_limiter(None, Some(100), 10.0);
        let clock = limiter.clock();

        limiter.report_usage(30);
        clock.advance(1.0);
        limiter.report_usage(30);
        clock.advance(1.0);
        limiter.report_usage(30);
        clock.advance(1.0);

        // 90 + 50 = 140, the first two entries must expire
        limiter.report_usage(50);
        let wait = clock.sleeps()[0].as_secs_f64();
        assert!((wait - 8.1).abs() < EPS);

        let stats = limiter.current_stats();
        assert_eq!(stats.token_sum, 80);
        assert!(stats.token_sum <= 100);
    }

    #[test]
    fn test_acquire_with_estimate() {
        let limiter = manual_limiter(Some(10), Some(100), 10.0);
        let clock = limiter.clock();

        limiter.report_usage(80);
        clock.advance(1.0);

        assert_eq!(limiter.wait_time(20), Duration::ZERO);
        assert!((limiter.wait_time(30).as_secs_f64() - 9.1).abs() < EPS);

        limiter.acquire_with_estimate(30);
        assert!((clock.sleeps()[0].as_secs_f64() - 9.1).abs() < EPS);

        let stats = limiter.current_stats();
        assert_eq!(stats.request_count, 1);
        assert_eq!(stats.token_sum, 0);
    }

    #[test]
    fn test_unset_limits_never_block() {
        let limiter = manual_limiter(None, None, 1.0);

        for _ in 0..100 {
            limiter.acquire();
            limiter.acquire_with_estimate(1_000_000);
            limiter.report_usage(1_000_000);
        }
        assert!(limiter.clock().sleeps().is_empty());

        let stats = limiter.current_stats();
        assert_eq!(stats.request_count, 200);
        assert_eq!(stats.rpm_utilization, 0.0);
        assert_eq!(stats.tpm_utilization, 0.0);
    }

    #[test]
    fn test_stats_are_stable_without_activity() {
        let limiter = manual_limiter(Some(5), Some(500), 60.0);
        limiter.acquire();
        limiter.report_usage(120);

        let first = limiter.current_stats();
        let second = limiter.current_stats();
        assert_eq!(first, second);
        assert_eq!(first.rpm_utilization, 20.0);
        assert_eq!(first.tpm_utilization, 24.0);
    }

    #[test]
    fn test_stats_decay_with_window() {
        let limiter = manual_limiter(Some(5), Some(500), 60.0);
        limiter.acquire();
        limiter.report_usage(120);

        limiter.clock().advance(59.9);
        assert_eq!(limiter.current_stats().request_count, 1);

        limiter.clock().advance(0.2);
        let stats = limiter.current_stats();
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.token_sum, 0);
    }

    #[test]
    fn test_limiters_are_isolated() {
        let a = manual_limiter(Some(1), None, 60.0);
        let b = manual_limiter(Some(1), None, 60.0);

        a.acquire();
        b.acquire();

        assert_eq!(a.current_stats().request_count, 1);
        assert_eq!(b.current_stats().request_count, 1);
        assert!(a.clock().sleeps().is_empty());
        assert!(b.clock().sleeps().is_empty());
    }

    #[test]
    fn test_concurrent_acquire_respects_rpm() {
        let limiter = Arc::new(
            RateLimiter::new(
                LimiterConfig::new()
                    .with_rpm_limit(3)
                    .with_window_seconds(0.3),
            )
            .unwrap(),
        );
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..2 {
                        limiter.acquire();
                        assert!(limiter.current_stats().request_count <= 3);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // 8 requests at 3 per 0.3s need at least two full windows
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[test]
    fn test_request_on_window_edge_still_waits() {
        let limiter = manual_limiter(Some(1), None, 8.0);
        let clock = limiter.clock();

        limiter.acquire();
        clock.advance(8.0);
        limiter.acquire();

        let sleeps = secs(&clock.sleeps());
        assert_eq!(sleeps.len(), 1);
        assert!((sleeps[0] - 0.1).abs() < EPS);
        assert_eq!(limiter.current_stats().request_count, 1);
    }

    #[test]
    fn test_tokens_on_window_edge_still_wait() {
        let limiter = manual_limiter(None, Some(100), 8.0);
        let clock = limiter.clock();

        limiter.report_usage(60);
        clock.advance(8.0);
        limiter.report_usage(60);

        let sleeps = secs(&clock.sleeps());
        assert_eq!(sleeps.len(), 1);
        assert!((sleeps[0] - 0.1).abs() < EPS);
        assert_eq!(limiter.current_stats().token_sum, 60);
    }

    #[test]
    fn test_window_beyond_duration_range_is_rejected() {
        let config = LimiterConfig::new()
            .with_rpm_limit(1)
            .with_window_seconds(1e30);
        let err = RateLimiter::new(config).err();
        assert!(matches!(err, Some(DualrateError::InvalidArgument(_))));
    }

    #[test]
    fn test_wait_duration_saturates() {
        assert_eq!(wait_duration(1e30), Duration::MAX);
        assert_eq!(wait_duration(0.0), Duration::ZERO);
        assert!((wait_duration(1.5).as_secs_f64() - 1.5).abs() < EPS);
    }
}
