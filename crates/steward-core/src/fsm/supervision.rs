//! Restart Backoff
//!
//! A faulting actor is never stopped. Instead each consecutive fault doubles the
//! delay before the state returned by `reset` runs, up to a cap, so a dead store
//! cannot turn an actor into a hot loop.

use std::time::Duration;

/// Policy for delaying actors after a fault
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Delay after the first fault
    pub backoff: Duration,
    /// Maximum delay
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    pub fn new(backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            backoff,
            max_backoff,
        }
    }
}

/// Tracks consecutive faults for a single actor
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    consecutive: u32,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            consecutive: 0,
        }
    }

    /// Record a fault and return the delay to apply before resuming.
    pub fn record_fault(&mut self) -> Duration {
        self.consecutive = self.consecutive.saturating_add(1);
        let multiplier = 2u32.saturating_pow(self.consecutive - 1);
        self.policy
            .backoff
            .saturating_mul(multiplier)
            .min(self.policy.max_backoff)
    }

    /// Call after a successful tick
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

impl Default for RestartTracker {
    fn default() -> Self {
        Self::new(RestartPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff, Duration::from_millis(250));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_backoff() {
        let mut tracker = RestartTracker::new(RestartPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
        ));

        assert_eq!(tracker.record_fault(), Duration::from_millis(100));
        assert_eq!(tracker.record_fault(), Duration::from_millis(200));
        assert_eq!(tracker.record_fault(), Duration::from_millis(400));
        assert_eq!(tracker.consecutive(), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut tracker = RestartTracker::new(RestartPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(300),
        ));
        for _ in 0..40 {
            tracker.record_fault();
        }
        assert_eq!(tracker.record_fault(), Duration::from_millis(300));
    }

    #[test]
    fn test_reset() {
        let mut tracker = RestartTracker::default();

        tracker.record_fault();
        tracker.record_fault();
        assert!(tracker.consecutive() > 0);

        tracker.reset();
        assert_eq!(tracker.consecutive(), 0);
        assert_eq!(tracker.record_fault(), Duration::from_millis(250));
    }
}
