use std::time::Duration;

use crate::core::config::Config;

/// Transient-failure budget and timing for one logical send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient failures tolerated before giving up, counting the first attempt.
    pub max_transient_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for each single network attempt (login or chat).
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_transient_attempts: config.max_transient_attempts(),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Exponential backoff before the retry that follows the `failures`-th
    /// transient failure (1-based): base, 2x base, 4x base, capped at `max_delay`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(30);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_transient_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_doubles_per_failure() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn default_policy_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_transient_attempts, 3);
        assert_eq!(policy.backoff(0), policy.base_delay);
    }
}
