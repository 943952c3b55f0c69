//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff: `base_delay * multiplier^(attempt - 1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    pub multiplier: f64,

    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-indexed; 0 is treated as 1).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next_delay(1), Duration::from_secs(1));
        assert_eq!(policy.next_delay(2), Duration::from_secs(2));
        assert_eq!(policy.next_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(30), Duration::from_secs(60));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate();
        assert_eq!(policy.next_delay(1), Duration::ZERO);
        assert_eq!(policy.next_delay(5), Duration::ZERO);
    }
}
