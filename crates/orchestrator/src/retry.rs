//! Retry policy with capped exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times a failed attempt is retried and how long to back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt budget: a failed attempt is retried only while fewer than
    /// `max_retries` attempts have been made, so a task makes at most
    /// `max(max_retries, 1)` attempts.
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry (doubled for each later one).
    #[serde(
        default = "RetryConfig::default_base_delay",
        with = "crate::serde_millis",
        rename = "base_delay_ms"
    )]
    pub base_delay: Duration,
    #[serde(
        default = "RetryConfig::default_max_delay",
        with = "crate::serde_millis",
        rename = "max_delay_ms"
    )]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            base_delay: Self::default_base_delay(),
            max_delay: Self::default_max_delay(),
        }
    }
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        2
    }

    fn default_base_delay() -> Duration {
        Duration::from_millis(250)
    }

    fn default_max_delay() -> Duration {
        Duration::from_secs(2)
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Whether a task that has made `attempts` attempts may try again.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Delay before retry number `retry` (1-based): `min(base * 2^(retry-1), max)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(cfg.backoff(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff(3), Duration::from_millis(400));
        assert_eq!(cfg.backoff(4), Duration::from_millis(500));
        assert_eq!(cfg.backoff(60), Duration::from_millis(500));
    }

    #[test]
    fn backoff_is_monotonic() {
        let cfg = RetryConfig::default();
        let delays: Vec<_> = (1..20).map(|r| cfg.backoff(r)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn retry_budget() {
        let cfg = RetryConfig::default().with_max_retries(2);
        assert!(cfg.allows_retry(1));
        assert!(!cfg.allows_retry(2));
        assert!(!cfg.allows_retry(3));
        assert!(!RetryConfig::default().with_max_retries(1).allows_retry(1));
        assert!(!RetryConfig::default().with_max_retries(0).allows_retry(1));
    }

    #[test]
    fn serde_uses_millis() {
        let cfg: RetryConfig =
            serde_json::from_str(r#"{"max_retries": 1, "base_delay_ms": 50}"#).unwrap();
        assert_eq!(cfg.base_delay, Duration::from_millis(50));
        assert_eq!(cfg.max_delay, Duration::from_secs(2));
    }
}
