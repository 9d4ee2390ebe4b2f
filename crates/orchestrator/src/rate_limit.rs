//! Per-source token buckets.
//!
//! Waiting happens on the tokio clock, so a paused test runtime drives refills
//! without real sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use listing::SourceId;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained rate.
    #[serde(default = "RateLimitConfig::default_requests_per_second")]
    pub requests_per_second: f64,
    /// Tokens available at once.
    #[serde(default = "RateLimitConfig::default_burst_size")]
    pub burst_size: u32,
    /// Longest an attempt waits for a token; zero fails immediately.
    #[serde(
        default = "RateLimitConfig::default_max_wait",
        with = "crate::serde_millis",
        rename = "max_wait_ms"
    )]
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: Self::default_requests_per_second(),
            burst_size: Self::default_burst_size(),
            max_wait: Self::default_max_wait(),
        }
    }
}

impl RateLimitConfig {
    fn default_requests_per_second() -> f64 {
        2.0
    }

    fn default_burst_size() -> u32 {
        4
    }

    fn default_max_wait() -> Duration {
        Duration::from_secs(5)
    }

    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_burst_size(mut self, burst: u32) -> Self {
        self.burst_size = burst;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "requests_per_second must be positive, got {}",
                self.requests_per_second
            )));
        }
        if self.burst_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "burst_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket starting full.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
    total_requests: AtomicU64,
    total_waited: AtomicU64,
    total_rejected: AtomicU64,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.burst_size),
                last_refill: Instant::now(),
            }),
            total_requests: AtomicU64::new(0),
            total_waited: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Take a token if one is there, else report how long until one is.
    fn take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.config.requests_per_second)
            .min(f64::from(self.config.burst_size));

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }
        let seconds = (1.0 - state.tokens) / self.config.requests_per_second;
        let wait = if seconds.is_finite() {
            Duration::from_secs_f64(seconds)
        } else {
            self.config.max_wait
        };
        Err(wait.max(Duration::from_millis(1)))
    }

    pub fn try_acquire(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        match self.take() {
            Ok(()) => true,
            Err(_) => {
                self.total_rejected.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// Wait up to `max_wait` for a token. Returns false on timeout.
    pub async fn acquire(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let mut waited = false;
        loop {
            let wait = match self.take() {
                Ok(()) => {
                    if waited {
                        self.total_waited.fetch_add(1, Ordering::SeqCst);
                    }
                    return true;
                }
                Err(wait) => wait,
            };
            let elapsed = start.elapsed();
            if elapsed >= self.config.max_wait {
                self.total_rejected.fetch_add(1, Ordering::SeqCst);
                return false;
            }
            waited = true;
            tokio::time::sleep(wait.min(self.config.max_wait - elapsed)).await;
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let available_tokens = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tokens;
        RateLimitStats {
            available_tokens,
            total_requests: self.total_requests.load(Ordering::SeqCst),
            total_waited: self.total_waited.load(Ordering::SeqCst),
            total_rejected: self.total_rejected.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitStats {
    pub available_tokens: f64,
    pub total_requests: u64,
    pub total_waited: u64,
    pub total_rejected: u64,
}

/// One bucket per source, created on first use.
#[derive(Debug)]
pub struct RateLimiters {
    buckets: dashmap::DashMap<SourceId, Arc<TokenBucket>>,
    default_config: RateLimitConfig,
    overrides: std::collections::BTreeMap<SourceId, RateLimitConfig>,
}

impl RateLimiters {
    pub fn new(
        default_config: RateLimitConfig,
        overrides: std::collections::BTreeMap<SourceId, RateLimitConfig>,
    ) -> Self {
        Self {
            buckets: dashmap::DashMap::new(),
            default_config,
            overrides,
        }
    }

    pub fn bucket(&self, source: &SourceId) -> Arc<TokenBucket> {
        self.buckets
            .entry(source.clone())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(source)
                    .copied()
                    .unwrap_or(self.default_config);
                Arc::new(TokenBucket::new(config))
            })
            .clone()
    }

    pub fn stats(&self) -> Vec<(SourceId, RateLimitStats)> {
        let mut stats: Vec<_> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bucket_starts_full_then_rejects() {
        let bucket = TokenBucket::new(RateLimitConfig::default().with_burst_size(3));
        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
        let stats = bucket.stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        let bucket = TokenBucket::new(
            RateLimitConfig::default()
                .with_requests_per_second(10.0)
                .with_burst_size(1)
                .with_max_wait(Duration::from_secs(1)),
        );
        assert!(bucket.acquire().await);
        let before = Instant::now();
        assert!(bucket.acquire().await);
        assert!(before.elapsed() >= Duration::from_millis(99));
        assert_eq!(bucket.stats().total_waited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_gives_up_after_max_wait() {
        let bucket = TokenBucket::new(
            RateLimitConfig::default()
                .with_requests_per_second(0.1)
                .with_burst_size(1)
                .with_max_wait(Duration::from_millis(50)),
        );
        assert!(bucket.acquire().await);
        assert!(!bucket.acquire().await);
        assert_eq!(bucket.stats().total_rejected, 1);
    }

    #[test]
    fn validate_rejects_degenerate_limits() {
        assert!(RateLimitConfig::default().validate().is_ok());
        assert!(RateLimitConfig::default()
            .with_requests_per_second(0.0)
            .validate()
            .is_err());
        assert!(RateLimitConfig::default()
            .with_burst_size(0)
            .validate()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn limiters_share_and_override_buckets() {
        let strict = RateLimitConfig::default().with_burst_size(1);
        let limiters = RateLimiters::new(
            RateLimitConfig::default(),
            BTreeMap::from([(SourceId::cars_com(), strict)]),
        );
        let a = limiters.bucket(&SourceId::cars_com());
        let b = limiters.bucket(&SourceId::cars_com());
        assert!(a.try_acquire());
        assert!(!b.try_acquire());
        assert!(limiters.bucket(&SourceId::autotrader()).try_acquire());
        assert_eq!(limiters.stats().len(), 2);
    }
}
