//! Retry policy with capped exponential backoff.
//!
//! Stateless: the orchestrator tracks attempts, this module answers whether
//! another attempt is allowed and how long to wait before it.

use std::time::Duration;

use waypoint_types::config::RetrySettings;
use waypoint_types::workflow::NodeSpec;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.multiplier,
        )
    }

    /// Whether a node may be attempted again after failing `attempt`.
    ///
    /// `attempt` is 1-based (first execution is attempt 1).
    pub fn should_retry(node: &NodeSpec, attempt: u32) -> bool {
        attempt < node.max_attempts()
    }

    /// Delay before retry number `retry` (1-based):
    /// `min(base * multiplier^(retry - 1), max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(max_retries: u32) -> NodeSpec {
        NodeSpec {
            id: "n".to_string(),
            handler: "passthrough".to_string(),
            max_retries,
            timeout_secs: None,
            estimated_cost: None,
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        assert!(!RetryPolicy::should_retry(&node(0), 1));
    }

    #[test]
    fn retries_until_attempts_exhausted() {
        let n = node(3);
        assert!(RetryPolicy::should_retry(&n, 1));
        assert!(RetryPolicy::should_retry(&n, 3));
        assert!(!RetryPolicy::should_retry(&n, 4));
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000), 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn multiplier_below_one_is_clamped() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 0.5);
        assert_eq!(policy.delay_for(3), Duration::from_millis(100));
    }
}
