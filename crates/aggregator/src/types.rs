use index::IndexHit;
use listing::ListingRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregatorError {
    #[error("invalid aggregator configuration: {0}")]
    InvalidConfig(String),
}

/// Ranking knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Weight of index similarity against scrape relevance, in `[0, 1]`.
    #[serde(default = "AggregatorConfig::default_alpha")]
    pub alpha: f32,
    /// Truncate the merged output to this many results.
    #[serde(default = "AggregatorConfig::default_max_results")]
    pub max_results: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            alpha: Self::default_alpha(),
            max_results: Self::default_max_results(),
        }
    }
}

impl AggregatorConfig {
    pub(crate) fn default_alpha() -> f32 {
        0.5
    }

    pub(crate) fn default_max_results() -> usize {
        100
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn validate(&self) -> Result<(), AggregatorError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(AggregatorError::InvalidConfig(format!(
                "alpha must be between 0.0 and 1.0, got {}",
                self.alpha
            )));
        }
        if self.max_results == 0 {
            return Err(AggregatorError::InvalidConfig(
                "max_results must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// `alpha * s + (1 - alpha) * r`, a missing partial counting as zero.
    pub fn combine(&self, similarity: Option<f32>, relevance: Option<f32>) -> f32 {
        let s = similarity.unwrap_or(0.0);
        let r = relevance.unwrap_or(0.0);
        self.alpha * s + (1.0 - self.alpha) * r
    }
}

/// Which stream(s) a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Index,
    Scrape,
    Both,
}

impl Provenance {
    pub fn union(self, other: Provenance) -> Provenance {
        if self == other {
            self
        } else {
            Provenance::Both
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Index => "index",
            Provenance::Scrape => "scrape",
            Provenance::Both => "both",
        }
    }
}

/// One merged, scored listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub listing: ListingRecord,
    pub score: f32,
    /// Index similarity, if the index contributed.
    pub similarity: Option<f32>,
    /// Scrape relevance, if a source contributed.
    pub relevance: Option<f32>,
    pub provenance: Provenance,
}

impl RankedResult {
    pub fn canonical_id(&self) -> &str {
        self.listing.canonical_id()
    }
}

/// Pre-scored input on the index side of a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub listing: ListingRecord,
    pub similarity: Option<f32>,
    pub relevance: Option<f32>,
    pub provenance: Provenance,
}

impl From<IndexHit> for Candidate {
    fn from(hit: IndexHit) -> Self {
        Self {
            listing: hit.listing,
            similarity: Some(hit.similarity.clamp(0.0, 1.0)),
            relevance: None,
            provenance: Provenance::Index,
        }
    }
}

impl From<RankedResult> for Candidate {
    fn from(result: RankedResult) -> Self {
        Self {
            listing: result.listing,
            similarity: result.similarity,
            relevance: result.relevance,
            provenance: result.provenance,
        }
    }
}
