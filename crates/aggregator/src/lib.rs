//! Merge of embedding-index hits and live scrape results.
//!
//! Both streams are keyed by canonical id. When a listing appears in both,
//! the scraped record supplies the presentation fields (price, mileage,
//! location, title, url, attributes) and the index supplies the embedding and
//! similarity. Each result is scored as `alpha * similarity + (1 - alpha) *
//! relevance` and the output is totally ordered: score descending, priced
//! before unpriced, then canonical id ascending.
//!
//! Merging is idempotent on deduplicated input: feeding a merged list back in
//! as the index side with no scrape results reproduces it.

mod relevance;
mod types;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use listing::{ListingRecord, VehicleAttributes};
use orchestrator::ScrapeResult;
use tracing::{debug, warn};

pub use crate::relevance::{attribute_agreement, relevance};
pub use crate::types::{AggregatorConfig, AggregatorError, Candidate, Provenance, RankedResult};

/// Scores and merges result streams against the recognized attributes.
#[derive(Debug, Clone)]
pub struct Aggregator {
    config: AggregatorConfig,
    reference: VehicleAttributes,
}

/// Best scrape observation of one canonical id.
struct Scraped {
    listing: ListingRecord,
    relevance: f32,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self, AggregatorError> {
        config.validate()?;
        Ok(Self {
            config,
            reference: VehicleAttributes::default(),
        })
    }

    /// Attributes scrape relevance is measured against.
    pub fn with_reference(mut self, reference: VehicleAttributes) -> Self {
        self.reference = reference.normalized();
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn merge<I, C>(&self, index_hits: I, scrape_results: &[ScrapeResult]) -> Vec<RankedResult>
    where
        I: IntoIterator<Item = C>,
        C: Into<Candidate>,
    {
        let indexed = self.collect_index(index_hits);
        let scraped = self.collect_scrape(scrape_results);
        let (index_count, scrape_count) = (indexed.len(), scraped.len());

        let mut merged: BTreeMap<String, Candidate> = indexed;
        for (id, scrape) in scraped {
            match merged.remove(&id) {
                Some(candidate) => {
                    let relevance = max_opt(candidate.relevance, Some(scrape.relevance));
                    merged.insert(
                        id,
                        Candidate {
                            listing: candidate.listing.reconciled_with(&scrape.listing),
                            similarity: candidate.similarity,
                            relevance,
                            provenance: candidate.provenance.union(Provenance::Scrape),
                        },
                    );
                }
                None => {
                    merged.insert(
                        id,
                        Candidate {
                            listing: scrape.listing,
                            similarity: None,
                            relevance: Some(scrape.relevance),
                            provenance: Provenance::Scrape,
                        },
                    );
                }
            }
        }

        let mut results: Vec<RankedResult> = merged
            .into_values()
            .map(|candidate| RankedResult {
                score: self.config.combine(candidate.similarity, candidate.relevance),
                listing: candidate.listing,
                similarity: candidate.similarity,
                relevance: candidate.relevance,
                provenance: candidate.provenance,
            })
            .collect();
        results.sort_by(rank_order);
        results.truncate(self.config.max_results);

        debug!(
            index_candidates = index_count,
            scrape_candidates = scrape_count,
            merged = results.len(),
            "aggregated results"
        );
        results
    }

    fn collect_index<I, C>(&self, index_hits: I) -> BTreeMap<String, Candidate>
    where
        I: IntoIterator<Item = C>,
        C: Into<Candidate>,
    {
        let mut out: BTreeMap<String, Candidate> = BTreeMap::new();
        for candidate in index_hits.into_iter().map(Into::into) {
            let id = candidate.listing.canonical_id().to_string();
            if id.is_empty() {
                warn!(source = %candidate.listing.source(), "dropping index candidate without canonical id");
                continue;
            }
            match out.get(&id) {
                Some(existing)
                    if existing.similarity.unwrap_or(0.0)
                        >= candidate.similarity.unwrap_or(0.0) => {}
                _ => {
                    out.insert(id, candidate);
                }
            }
        }
        out
    }

    fn collect_scrape(&self, scrape_results: &[ScrapeResult]) -> BTreeMap<String, Scraped> {
        let mut out: BTreeMap<String, Scraped> = BTreeMap::new();
        for result in scrape_results {
            for (position, listing) in result.listings().iter().enumerate() {
                let id = listing.canonical_id();
                if id.is_empty() {
                    warn!(source = %listing.source(), "dropping scraped listing without canonical id");
                    continue;
                }
                let score = relevance(&self.reference, listing.attributes(), position);
                match out.get_mut(id) {
                    Some(existing) => {
                        if listing.observed_at() > existing.listing.observed_at() {
                            existing.listing = listing.clone();
                        }
                        existing.relevance = existing.relevance.max(score);
                    }
                    None => {
                        out.insert(
                            id.to_string(),
                            Scraped {
                                listing: listing.clone(),
                                relevance: score,
                            },
                        );
                    }
                }
            }
        }
        out
    }
}

fn max_opt(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Score desc, priced first, canonical id asc.
fn rank_order(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.listing.price().is_some().cmp(&a.listing.price().is_some()))
        .then_with(|| a.canonical_id().cmp(b.canonical_id()))
}
