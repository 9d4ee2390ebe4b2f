use std::collections::BTreeMap;
use std::time::Duration;

use listing::SourceId;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryConfig;

/// Scheduling budget for one fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Tasks allowed `InFlight` at once.
    #[serde(default = "OrchestratorConfig::default_concurrency")]
    pub concurrency: usize,
    /// Budget for a single adapter call.
    #[serde(
        default = "OrchestratorConfig::default_task_timeout",
        with = "crate::serde_millis",
        rename = "task_timeout_ms"
    )]
    pub task_timeout: Duration,
    /// Budget for the whole fan-out, retries and backoff included.
    #[serde(
        default = "OrchestratorConfig::default_deadline",
        with = "crate::serde_millis",
        rename = "deadline_ms"
    )]
    pub deadline: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Applied to every source without an override.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub source_rate_limits: BTreeMap<SourceId, RateLimitConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::default_concurrency(),
            task_timeout: Self::default_task_timeout(),
            deadline: Self::default_deadline(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            source_rate_limits: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    fn default_concurrency() -> usize {
        4
    }

    fn default_task_timeout() -> Duration {
        Duration::from_secs(10)
    }

    fn default_deadline() -> Duration {
        Duration::from_secs(30)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_source_rate_limit(mut self, source: SourceId, limit: RateLimitConfig) -> Self {
        self.source_rate_limits.insert(source, limit);
        self
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.concurrency == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "task_timeout must be positive".into(),
            ));
        }
        if self.deadline.is_zero() {
            return Err(OrchestratorError::InvalidConfig(
                "deadline must be positive".into(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(OrchestratorError::InvalidConfig(
                "retry base_delay exceeds max_delay".into(),
            ));
        }
        self.rate_limit.validate()?;
        for (source, limit) in &self.source_rate_limits {
            limit.validate().map_err(|e| {
                OrchestratorError::InvalidConfig(format!("rate limit for {source}: {e}"))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.concurrency, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_budgets_are_rejected() {
        assert!(OrchestratorConfig::default()
            .with_concurrency(0)
            .validate()
            .is_err());
        assert!(OrchestratorConfig::default()
            .with_task_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(OrchestratorConfig::default()
            .with_deadline(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn bad_source_override_names_the_source() {
        let cfg = OrchestratorConfig::default().with_source_rate_limit(
            SourceId::cars_com(),
            RateLimitConfig::default().with_burst_size(0),
        );
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("cars_com"));
    }

    #[test]
    fn deserializes_millisecond_fields() {
        let cfg: OrchestratorConfig = serde_json::from_str(
            r#"{"concurrency": 2, "task_timeout_ms": 1500, "source_rate_limits": {"autotrader": {"burst_size": 1}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.task_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.deadline, Duration::from_secs(30));
        assert_eq!(cfg.source_rate_limits[&SourceId::autotrader()].burst_size, 1);
    }
}
