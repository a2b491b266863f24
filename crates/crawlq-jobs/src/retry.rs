//! Backoff policy for failed jobs.

use crawlq_config::{BackoffKind, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule attached to every job.
///
/// Serialized as `{"type": "exponential", "baseDelay": 1000, "maxDelay": 60000}`
/// so records written by one process can be read by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Fixed or exponential.
    #[serde(rename = "type")]
    pub kind: BackoffKind,

    /// Base delay in milliseconds.
    #[serde(rename = "baseDelay")]
    pub base_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds.
    #[serde(rename = "maxDelay")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(1000, 60_000)
    }
}

impl BackoffPolicy {
    /// Same delay before every retry.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
        }
    }

    /// Doubling delay starting at `base_delay_ms`, capped at `max_delay_ms`.
    pub fn exponential(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before the retry that follows `failed_attempts` failures.
    ///
    /// Exponential: `base * 2^(failed_attempts - 1)`, so the first retry
    /// waits exactly `base`. Always capped at `max_delay_ms`.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let delay_ms = match self.kind {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let factor = 2u64.checked_pow(failed_attempts - 1).unwrap_or(u64::MAX);
                self.base_delay_ms.saturating_mul(factor)
            }
        };

        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            kind: config.backoff,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles() {
        let policy = BackoffPolicy::exponential(1000, 60_000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_exponential_is_capped() {
        let policy = BackoffPolicy::exponential(1000, 5000);
        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
        // Large attempt counts must not overflow.
        assert_eq!(policy.delay_for(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = BackoffPolicy::fixed(250);
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(7), Duration::from_millis(250));
    }

    #[test]
    fn test_no_failures_no_delay() {
        assert_eq!(BackoffPolicy::default().delay_for(0), Duration::ZERO);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(BackoffPolicy::exponential(500, 8000)).unwrap();
        assert_eq!(json["type"], "exponential");
        assert_eq!(json["baseDelay"], 500);
        assert_eq!(json["maxDelay"], 8000);
    }

    #[test]
    fn test_from_retry_config() {
        let config = RetryConfig {
            backoff: BackoffKind::Fixed,
            base_delay_ms: 42,
            ..RetryConfig::default()
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.kind, BackoffKind::Fixed);
        assert_eq!(policy.base_delay_ms, 42);
    }
}
