use std::time::Duration;

/// Reconnect backoff for transport implementations.
///
/// The session never sleeps between attempts itself; a transport consults
/// this policy after each failed attempt and reports the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            max_attempts: None,
        }
    }

    /// Give up after `attempts` consecutive failures.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Delay before attempt `attempt` (zero-based), or `None` once exhausted.
    ///
    /// A server-provided hint wins when it is longer than the computed delay.
    pub fn delay_for_attempt(&self, attempt: u32, hint_ms: Option<u64>) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let multiplier = 1_u64 << attempt.min(20);
        let calculated = self.base_delay_ms.saturating_mul(multiplier);
        let bounded = calculated
            .max(hint_ms.unwrap_or(0))
            .min(self.max_delay_ms);
        Some(Duration::from_millis(bounded))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(1_000, 60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_base_delay_and_doubles() {
        let policy = ReconnectPolicy::new(100, 10_000);
        assert_eq!(
            policy.delay_for_attempt(0, None),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            policy.delay_for_attempt(3, None),
            Some(Duration::from_millis(800))
        );
    }

    #[test]
    fn caps_delay_and_hint_at_max() {
        let policy = ReconnectPolicy::new(1_000, 4_000);
        assert_eq!(
            policy.delay_for_attempt(30, None),
            Some(Duration::from_millis(4_000))
        );
        assert_eq!(
            policy.delay_for_attempt(0, Some(90_000)),
            Some(Duration::from_millis(4_000))
        );
        assert_eq!(
            policy.delay_for_attempt(0, Some(2_500)),
            Some(Duration::from_millis(2_500))
        );
    }

    #[test]
    fn stops_after_max_attempts() {
        let policy = ReconnectPolicy::new(10, 100).with_max_attempts(2);
        assert!(policy.delay_for_attempt(1, None).is_some());
        assert_eq!(policy.delay_for_attempt(2, None), None);
    }

    #[test]
    fn never_caps_below_base() {
        let policy = ReconnectPolicy::new(500, 100);
        assert_eq!(policy.max_delay_ms(), 500);
        assert_eq!(policy.base_delay_ms(), 500);
    }
}
