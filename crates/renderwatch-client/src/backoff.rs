use std::time::Duration;

/// Exponential backoff between reconnect attempts:
/// `delay(attempt) = min(base * 2^(attempt-1), max)`, 1-indexed, so the
/// first retry waits `base`. Pure and deterministic.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1, "attempt is 1-indexed");
        let exponent = attempt.saturating_sub(1).min(63);
        let base_ms = self.base.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        Duration::from_millis(delay_ms).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_uses_base_delay() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(30));
        assert_eq!(policy.delay(1), Duration::from_millis(100));
    }

    #[test]
    fn doubles_per_attempt() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(30));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn capped_at_max() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(5));
        // 1s * 2^9 = 512s, capped at 5s
        assert_eq!(policy.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn monotonic_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(30));
        for attempt in 1..20 {
            assert!(
                policy.delay(attempt) <= policy.delay(attempt + 1),
                "not monotonic at attempt {attempt}"
            );
            assert!(policy.delay(attempt) <= Duration::from_secs(30));
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(30));
        assert_eq!(policy.delay(5), policy.delay(5));
    }
}
