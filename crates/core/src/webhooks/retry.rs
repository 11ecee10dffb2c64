use chrono::{DateTime, Duration, Utc};
use orgsync_domain::{RetryBackoff, WebhookConfig};

/// Delay schedule for failed webhook deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    pub fn from_config(config: &WebhookConfig) -> Self {
        let base = Duration::seconds(i64::try_from(config.retry_delay_secs).unwrap_or(i64::MAX / 1000));
        match config.retry_backoff {
            RetryBackoff::Fixed => Self::Fixed(base),
            RetryBackoff::Exponential => Self::Exponential {
                base,
                max: Duration::seconds(
                    i64::try_from(config.max_retry_delay_secs).unwrap_or(i64::MAX / 1000),
                ),
            },
        }
    }

    /// Delay before attempt number `attempt + 1`, where `attempt` is the new
    /// retry count (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => {
                let factor = 1_i32.checked_shl(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                base.checked_mul(factor).map_or(max, |delay| delay.min(max))
            }
        }
    }

    pub fn next_retry_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WebhookConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_fixed_thirty_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy, RetryPolicy::Fixed(Duration::seconds(30)));
        assert_eq!(policy.delay(1), policy.delay(4));
    }

    #[test]
    fn exponential_policy_doubles_and_caps() {
        let policy = RetryPolicy::Exponential { base: Duration::seconds(30), max: Duration::seconds(100) };
        assert_eq!(policy.delay(1), Duration::seconds(30));
        assert_eq!(policy.delay(2), Duration::seconds(60));
        assert_eq!(policy.delay(3), Duration::seconds(100));
        assert_eq!(policy.delay(40), Duration::seconds(100));
    }
}
