//! Point-in-time usage snapshot.

use serde::Serialize;
use std::fmt;

/// Usage inside the current window, taken right after a trim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    /// Requests recorded in the window
    pub request_count: usize,
    pub rpm_limit: Option<u64>,
    /// Tokens reported in the window
    pub token_sum: u64,
    pub tpm_limit: Option<u64>,
    /// `request_count / rpm_limit * 100`, or 0 without a limit
    pub rpm_utilization: f64,
    /// `token_sum / tpm_limit * 100`, or 0 without a limit
    pub tpm_utilization: f64,
}

impl UsageStats {
    pub(crate) fn new(
        request_count: usize,
        rpm_limit: Option<u64>,
        token_sum: u64,
        tpm_limit: Option<u64>,
    ) -> Self {
        Self {
            request_count,
            rpm_limit,
            token_sum,
            tpm_limit,
            rpm_utilization: utilization(request_count as u64, rpm_limit),
            tpm_utilization: utilization(token_sum, tpm_limit),
        }
    }
}

fn utilization(used: u64, limit: Option<u64>) -> f64 {
    match limit {
        Some(limit) if limit > 0 => used as f64 / limit as f64 * 100.0,
        _ => 0.0,
    }
}

impl fmt::Display for UsageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn limit_str(limit: Option<u64>) -> String {
            limit.map_or_else(|| "unlimited".to_string(), |l| l.to_string())
        }

        write!(
            f,
            "requests {}/{} ({:.1}%), tokens {}/{} ({:.1}%)",
            self.request_count,
            limit_str(self.rpm_limit),
            self.rpm_utilization,
            self.token_sum,
            limit_str(self.tpm_limit),
            self.tpm_utilization,
        )
    }
}
