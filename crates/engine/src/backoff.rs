//! Retry delay policy for failed part attempts.

use std::time::Duration;

use chunklift_model::UploadConfig;

/// Exponent is capped so the delay stops growing after ten retries.
const MAX_EXPONENT: u32 = 10;

/// Computes the delay before a part's next attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            base_delay: config.retry_delay,
            exponential: config.exponential_backoff,
        }
    }

    /// Delay before re-dispatching a part whose `retry_count` is the given
    /// value: `base * 2^min(retry_count, 10)` when exponential, else the
    /// fixed base delay.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 2u32.saturating_pow(retry_count.min(MAX_EXPONENT));
        self.base_delay.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_table() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            exponential: true,
        };
        let expected = [
            (0, 1),
            (1, 2),
            (2, 4),
            (3, 8),
            (10, 1024),
            (11, 1024), // capped
            (40, 1024),
        ];
        for (retry_count, secs) in expected {
            assert_eq!(
                policy.delay_for_retry(retry_count),
                Duration::from_secs(secs),
                "retry_count {retry_count}"
            );
        }
    }

    #[test]
    fn fixed_delay_ignores_attempt() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(500),
            exponential: false,
        };
        for retry_count in [0, 1, 5, 100] {
            assert_eq!(
                policy.delay_for_retry(retry_count),
                Duration::from_millis(500)
            );
        }
    }
}
