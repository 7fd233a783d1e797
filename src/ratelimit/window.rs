//! Sliding-window usage logs.
//!
//! Requests and token usage are kept as two time-ordered logs. Entries are
//! appended at the tail with the current timestamp and expire from the head,
//! so a head-trim is all that is needed to keep the window current.

use std::collections::VecDeque;

use crate::config::LimiterConfig;

/// Margin added to every positive wait to absorb clock and measurement skew.
pub const WAIT_BUFFER_SECS: f64 = 0.1;

/// The request and token logs for one limiter.
#[derive(Debug)]
pub(crate) struct UsageWindow {
    window_seconds: f64,
    rpm_limit: Option<u64>,
    tpm_limit: Option<u64>,
    /// Timestamps of admitted requests
    requests: VecDeque<f64>,
    /// (timestamp, tokens) per reported usage event
    tokens: VecDeque<(f64, u64)>,
    /// Running sum of the token column of `tokens`
    token_sum: u64,
}

impl UsageWindow {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            window_seconds: config.window_seconds,
            rpm_limit: config.rpm_limit,
            tpm_limit: config.tpm_limit,
            requests: VecDeque::new(),
            tokens: VecDeque::new(),
            token_sum: 0,
        }
    }

    /// Drop every entry strictly older than `now - window_seconds`.
    ///
    /// Entries exactly at the cutoff are kept.
    pub fn trim_expired(&mut self, now: f64) {
        let cutoff = now - self.window_seconds;

        while self.requests.front().is_some_and(|&ts| ts < cutoff) {
            self.requests.pop_front();
        }

        while let Some(&(ts, tokens)) = self.tokens.front() {
            if ts >= cutoff {
                break;
            }
            self.tokens.pop_front();
            self.token_sum = self.token_sum.saturating_sub(tokens);
        }
    }

    /// Request count and token sum inside the window ending at `now`.
    pub fn current_usage(&mut self, now: f64) -> (usize, u64) {
        self.trim_expired(now);
        (self.requests.len(), self.token_sum)
    }

    pub fn record_request(&mut self, now: f64) {
        debug_assert!(self.requests.back().map_or(true, |&last| last <= now));
        self.requests.push_back(now);
    }

    pub fn record_tokens(&mut self, now: f64, tokens: u64) {
        debug_assert!(self.tokens.back().map_or(true, |&(last, _)| last <= now));
        self.tokens.push_back((now, tokens));
        self.token_sum = self.token_sum.saturating_add(tokens);
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn token_sum(&self) -> u64 {
        self.token_sum
    }

    /// Seconds until one more request fits under the request limit, or
    /// `None` when the limit is not reached.
    ///
    /// Unbuffered and possibly zero. Reads the logs as they are, so callers
    /// trim first.
    pub fn request_wait(&self, now: f64) -> Option<f64> {
        match (self.rpm_limit, self.requests.front()) {
            (Some(limit), Some(&oldest)) if self.requests.len() as u64 >= limit => {
                Some(oldest + self.window_seconds - now)
            }
            _ => None,
        }
    }

    /// Seconds until `estimated_tokens` more fit under the token limit, or
    /// `None` when they already fit.
    ///
    /// Walks the token log from the oldest entry until the entries expiring
    /// first free at least the deficit. When even the whole log cannot cover
    /// it, the wait runs until the newest entry expires. Unbuffered.
    pub fn token_wait(&self, now: f64, estimated_tokens: u64) -> Option<f64> {
        let limit = self.tpm_limit?;

        let projected = self.token_sum.saturating_add(estimated_tokens);
        if projected <= limit {
            return None;
        }

        let deficit = projected - limit;
        let expires_from = match self.freed_by(deficit) {
            Some(ts) => ts,
            None => self.tokens.back().map(|&(ts, _)| ts)?,
        };

        Some(expires_from + self.window_seconds - now)
    }

    /// Minimal delay after which a request costing `estimated_tokens` would be
    /// admitted on both dimensions, including the safety buffer.
    pub fn compute_wait_time(&self, now: f64, estimated_tokens: u64) -> f64 {
        let wait = match (
            self.request_wait(now),
            self.token_wait(now, estimated_tokens),
        ) {
            (Some(requests), Some(tokens)) => Some(requests.max(tokens)),
            (requests, tokens) => requests.or(tokens),
        };
        with_buffer(wait)
    }

    /// Timestamp of the entry whose expiry brings the freed total to `deficit`.
    fn freed_by(&self, deficit: u64) -> Option<f64> {
        let mut freed: u64 = 0;
        for &(ts, tokens) in &self.tokens {
            freed = freed.saturating_add(tokens);
            if freed >= deficit {
                return Some(ts);
            }
        }
        None
    }
}

/// Floor a blocking wait at zero and add [`WAIT_BUFFER_SECS`].
///
/// A limit that is hit always waits at least the buffer: an entry sitting
/// exactly on the cutoff is still inside the window.
pub(crate) fn with_buffer(wait: Option<f64>) -> f64 {
    match wait {
        Some(wait) => wait.max(0.0) + WAIT_BUFFER_SECS,
        None => 0.0,
    }
}
