use std::time::Duration;

use rand::Rng;

/// Exponential backoff applied when a retryable failure sends a job back to
/// `queued`.
///
/// `delay_for(attempt) = min(base_delay * 2^attempt, max_delay) + U[0, max_jitter)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60 * 60),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_jitter,
        }
    }

    /// Backoff without jitter, never above `max_delay`.
    pub fn backoff_for(&self, attempt: i32) -> Duration {
        let exponent = attempt.clamp(0, 31) as u32;
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: i32) -> Duration {
        self.backoff_for(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(16));
    }

    #[test]
    fn backoff_is_capped_and_overflow_safe() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(12), Duration::from_secs(3600));
        assert_eq!(policy.backoff_for(i32::MAX), Duration::from_secs(3600));
        assert_eq!(policy.backoff_for(-3), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_below_bound() {
        let policy = RetryPolicy::default();
        for attempt in 0..20 {
            let delay = policy.delay_for(attempt);
            let backoff = policy.backoff_for(attempt);
            assert!(delay >= backoff);
            assert!(delay < backoff + Duration::from_secs(1));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            Duration::ZERO,
        );
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }
}
