//! Workspace umbrella crate for carfinder.
//!
//! Given one vehicle photograph, carfinder returns ranked marketplace
//! listings for the vehicle it shows. This crate stitches the workspace
//! together behind [`VehicleSearch`]:
//!
//! 1. the upload is checked against an [`ImagePolicy`] (size, magic bytes),
//! 2. a [`VehicleRecognizer`] turns it into attributes plus an embedding,
//! 3. the embedding is looked up in the [`EmbeddingIndex`] on the blocking
//!    pool while the attributes drive a rate-limited scrape fan-out,
//! 4. the two streams are deduplicated and ranked by the [`Aggregator`].
//!
//! Component failures (a source timing out, an unavailable index) become
//! [`Diagnostic`] entries on the response; only input, recognition and
//! configuration problems, or a total lack of data, fail the request.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use carfinder::{CarfinderConfig, HttpRecognizer, ImageUpload, SourceOverrides, VehicleSearch};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CarfinderConfig::from_file("carfinder.yaml")?;
//! let recognizer = Arc::new(HttpRecognizer::new(&config.recognizer)?);
//! let search = VehicleSearch::from_config(&config, recognizer)?;
//!
//! let photo = std::fs::read("civic.jpg")?;
//! let response = search
//!     .search(ImageUpload::new(photo), &SourceOverrides::default())
//!     .await?;
//! for result in &response.listings {
//!     println!("{:.3} {}", result.score, result.listing.title());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod pipeline;
mod recognizer;
mod upload;

use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

pub use aggregator::{Aggregator, AggregatorConfig, Provenance, RankedResult};
pub use index::{EmbeddingIndex, IndexConfig, IndexError, IndexHit, Metric};
pub use listing::{EmbeddingVector, ListingRecord, Price, SourceId, VehicleAttributes};
pub use orchestrator::{FailureKind, OrchestratorConfig, ScrapeReport};
pub use query::{SearchQuery, SynthesizerConfig};

pub use crate::config::{CarfinderConfig, ConfigLoadError};
pub use crate::pipeline::{
    Component, Diagnostic, IndexStatus, QuerySummary, SearchError, SearchResponse,
    SourceOverrides, VehicleSearch, VehicleSearchBuilder,
};
pub use crate::recognizer::{
    HttpRecognizer, Recognition, RecognitionError, RecognizerConfig, StaticRecognizer,
    VehicleRecognizer,
};
pub use crate::upload::{FormatsInfo, ImageFormat, ImagePolicy, ImageUpload, InputError};

/// Metrics observer for pipeline stages.
pub trait PipelineMetrics: Send + Sync {
    fn record_validation(&self, latency: Duration, result: Result<(), InputError>);
    fn record_recognition(&self, latency: Duration, result: Result<(), RecognitionError>);
    fn record_index_search(&self, latency: Duration, result: Result<(), IndexError>);
    fn record_scrape(&self, latency: Duration, report: &ScrapeReport);
    fn record_merge(&self, latency: Duration, results: usize);
}

/// Install or clear the global pipeline metrics recorder.
pub fn set_pipeline_metrics(recorder: Option<Arc<dyn PipelineMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn PipelineMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn PipelineMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn PipelineMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

pub(crate) struct MetricsSpan {
    recorder: Arc<dyn PipelineMetrics>,
    start: Instant,
}

impl MetricsSpan {
    pub(crate) fn start() -> Option<Self> {
        metrics_recorder().map(|recorder| Self {
            recorder,
            start: Instant::now(),
        })
    }

    pub(crate) fn record_validation(self, result: Result<(), InputError>) {
        self.recorder
            .record_validation(self.start.elapsed(), result);
    }

    pub(crate) fn record_recognition(self, result: Result<(), RecognitionError>) {
        self.recorder
            .record_recognition(self.start.elapsed(), result);
    }

    pub(crate) fn record_index_search(self, result: Result<(), IndexError>) {
        self.recorder
            .record_index_search(self.start.elapsed(), result);
    }

    pub(crate) fn record_scrape(self, report: &ScrapeReport) {
        self.recorder.record_scrape(self.start.elapsed(), report);
    }

    pub(crate) fn record_merge(self, results: usize) {
        self.recorder.record_merge(self.start.elapsed(), results);
    }
}
