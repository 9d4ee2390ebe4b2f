use std::fmt;
use std::time::Duration;

use listing::ListingRecord;
use serde::{Deserialize, Serialize};
use sources::SourceError;

use crate::task::TaskRef;

/// Why a task ended without listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    NetworkError,
    ParseError,
    RateLimited,
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::NetworkError | FailureKind::RateLimited
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::NetworkError => "network_error",
            FailureKind::ParseError => "parse_error",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SourceError> for FailureKind {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::Timeout(_) => FailureKind::Timeout,
            SourceError::Network(_) => FailureKind::NetworkError,
            SourceError::Parse(_) => FailureKind::ParseError,
            SourceError::RateLimited(_) => FailureKind::RateLimited,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScrapeOutcome {
    Success { listings: Vec<ListingRecord> },
    Failure { kind: FailureKind, message: String },
}

/// Terminal report for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub task: TaskRef,
    pub outcome: ScrapeOutcome,
    pub attempts: u32,
    #[serde(with = "crate::serde_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

impl ScrapeResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ScrapeOutcome::Success { .. })
    }

    /// Listings in source response order; empty on failure.
    pub fn listings(&self) -> &[ListingRecord] {
        match &self.outcome {
            ScrapeOutcome::Success { listings } => listings,
            ScrapeOutcome::Failure { .. } => &[],
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            ScrapeOutcome::Success { .. } => None,
            ScrapeOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        self.failure_kind().map_or("success", FailureKind::as_str)
    }
}

/// Everything `run` learned, in task id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeReport {
    pub results: Vec<ScrapeResult>,
    pub deadline_exceeded: bool,
    #[serde(with = "crate::serde_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

impl ScrapeReport {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            deadline_exceeded: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ScrapeResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScrapeResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn listing_count(&self) -> usize {
        self.results.iter().map(|r| r.listings().len()).sum()
    }

    /// True when tasks ran and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.succeeded().next().is_none()
    }
}
