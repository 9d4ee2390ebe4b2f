use std::collections::BTreeSet;
use std::sync::Arc;

use aggregator::{Aggregator, AggregatorConfig, RankedResult};
use index::{EmbeddingIndex, IndexConfig, IndexError, IndexHit, Metric};
use listing::{EmbeddingVector, SourceId, VehicleAttributes};
use orchestrator::{Orchestrator, OrchestratorConfig, ScrapeReport, ScrapeResult};
use query::{synthesize, QueryError, SearchQuery, SynthesizerConfig};
use serde::{Deserialize, Serialize};
use sources::AdapterRegistry;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CarfinderConfig;
use crate::recognizer::{Recognition, RecognitionError, VehicleRecognizer};
use crate::upload::{ImagePolicy, ImageUpload, InputError};
use crate::MetricsSpan;

/// Request-level failures. Anything a single source or the index can get
/// wrong is reported as a [`Diagnostic`] instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SearchError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),
    #[error("recognition failed: {0}")]
    RecognitionFailure(#[from] RecognitionError),
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("embedding index unavailable: {0}")]
    IndexUnavailable(String),
    #[error("no listings found and {} component(s) failed", .diagnostics.len())]
    NoResults { diagnostics: Vec<Diagnostic> },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Part of the pipeline a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Index,
    Query,
    Source,
}

/// A component failure absorbed into a successful (or `NoResults`) response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub component: Component,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceId>,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl Diagnostic {
    fn index_unavailable(err: &IndexError) -> Self {
        Self {
            component: Component::Index,
            source: None,
            kind: "index_unavailable".into(),
            message: err.to_string(),
            attempts: None,
        }
    }

    fn no_attributes() -> Self {
        Self {
            component: Component::Query,
            source: None,
            kind: "invalid_attributes".into(),
            message: QueryError::InvalidAttributes.to_string(),
            attempts: None,
        }
    }

    fn from_scrape(result: &ScrapeResult) -> Option<Self> {
        let kind = result.failure_kind()?;
        let message = match &result.outcome {
            orchestrator::ScrapeOutcome::Failure { message, .. } => message.clone(),
            orchestrator::ScrapeOutcome::Success { .. } => String::new(),
        };
        Some(Self {
            component: Component::Source,
            source: Some(result.task.source.clone()),
            kind: kind.as_str().to_string(),
            message,
            attempts: Some(result.attempts),
        })
    }
}

/// Per-request source switches layered over the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOverrides {
    #[serde(default)]
    pub enable: BTreeSet<SourceId>,
    #[serde(default)]
    pub disable: BTreeSet<SourceId>,
}

impl SourceOverrides {
    /// Parse comma-separated source id lists, e.g. `enable=cars_com,autotrader`.
    pub fn parse(enable: Option<&str>, disable: Option<&str>) -> Result<Self, InputError> {
        Ok(Self {
            enable: parse_source_list(enable)?,
            disable: parse_source_list(disable)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.enable.is_empty() && self.disable.is_empty()
    }

    /// `(defaults ∪ enable) − disable − disabled`.
    ///
    /// `disabled` holds sources switched off by configuration; no request
    /// can turn them back on.
    pub fn apply(
        &self,
        defaults: &BTreeSet<SourceId>,
        disabled: &BTreeSet<SourceId>,
    ) -> BTreeSet<SourceId> {
        defaults
            .iter()
            .chain(self.enable.iter())
            .filter(|source| !self.disable.contains(*source) && !disabled.contains(*source))
            .cloned()
            .collect()
    }
}

fn parse_source_list(raw: Option<&str>) -> Result<BTreeSet<SourceId>, InputError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| SourceId::new(s).map_err(|e| InputError::InvalidSource(e.to_string())))
        .collect()
}

/// What the request was understood as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    /// e.g. `2019 Honda Civic`
    pub summary: String,
    pub attributes: VehicleAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub queries: Vec<SearchQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: QuerySummary,
    pub listings: Vec<RankedResult>,
    pub total_results: usize,
    /// Hits the embedding index contributed before merging.
    pub index_hits: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Sources with at least one successful task.
    pub sources_used: Vec<SourceId>,
    pub processing_time_ms: u64,
    pub deadline_exceeded: bool,
}

/// Readiness view of the embedding index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub available: bool,
    pub listings: usize,
    pub dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

enum IndexState {
    Ready(Arc<EmbeddingIndex>),
    Unavailable(IndexError),
}

/// The end-to-end search operation.
pub struct VehicleSearch {
    recognizer: Arc<dyn VehicleRecognizer>,
    index: IndexState,
    dimension: usize,
    orchestrator: Orchestrator,
    synthesizer: SynthesizerConfig,
    aggregator: Aggregator,
    policy: ImagePolicy,
    index_k: usize,
    allow_scrape_only: bool,
    disabled: BTreeSet<SourceId>,
}

/// Assembles a [`VehicleSearch`] from already-built parts.
pub struct VehicleSearchBuilder {
    recognizer: Arc<dyn VehicleRecognizer>,
    registry: AdapterRegistry,
    index: Option<IndexState>,
    dimension: Option<usize>,
    orchestrator: OrchestratorConfig,
    enabled: Option<BTreeSet<SourceId>>,
    disabled: BTreeSet<SourceId>,
    synthesizer: SynthesizerConfig,
    aggregator: AggregatorConfig,
    policy: ImagePolicy,
    index_k: usize,
    allow_scrape_only: bool,
}

impl VehicleSearchBuilder {
    pub fn with_index(mut self, index: Arc<EmbeddingIndex>) -> Self {
        self.index = Some(IndexState::Ready(index));
        self
    }

    /// Mark the index as unavailable, e.g. after a failed open.
    pub fn with_unavailable_index(mut self, err: IndexError) -> Self {
        self.index = Some(IndexState::Unavailable(err));
        self
    }

    /// Expected embedding dimension; must agree with the index when both are set.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    /// Sources queried when a request carries no overrides. Defaults to
    /// every registered source.
    pub fn with_enabled_sources(mut self, enabled: BTreeSet<SourceId>) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sources switched off by configuration. They never produce a scrape
    /// task, whatever the enabled set or a request's overrides say.
    pub fn with_disabled_sources(mut self, disabled: BTreeSet<SourceId>) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_synthesizer_config(mut self, config: SynthesizerConfig) -> Self {
        self.synthesizer = config;
        self
    }

    pub fn with_aggregator_config(mut self, config: AggregatorConfig) -> Self {
        self.aggregator = config;
        self
    }

    pub fn with_image_policy(mut self, policy: ImagePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_index_k(mut self, k: usize) -> Self {
        self.index_k = k;
        self
    }

    pub fn allow_scrape_only(mut self, allow: bool) -> Self {
        self.allow_scrape_only = allow;
        self
    }

    pub fn build(self) -> Result<VehicleSearch, SearchError> {
        let invalid = |msg: String| SearchError::InvalidConfig(msg);

        let index = self.index.unwrap_or_else(|| {
            IndexState::Unavailable(IndexError::Unavailable(
                "no embedding index configured".into(),
            ))
        });
        let dimension = match (&index, self.dimension) {
            (IndexState::Ready(index), Some(expected)) if index.dimension() != expected => {
                return Err(invalid(format!(
                    "index dimension {} does not match configured dimension {expected}",
                    index.dimension()
                )));
            }
            (IndexState::Ready(index), _) => index.dimension(),
            (IndexState::Unavailable(_), Some(expected)) => expected,
            (IndexState::Unavailable(_), None) => IndexConfig::default().dimension,
        };
        if dimension == 0 {
            return Err(invalid("embedding dimension must be greater than zero".into()));
        }
        if self.index_k == 0 {
            return Err(invalid("index k must be at least 1".into()));
        }
        if self.policy.max_image_bytes == 0 {
            return Err(invalid("max_image_bytes must be greater than zero".into()));
        }
        if self.policy.supported_formats.is_empty() {
            return Err(invalid("at least one image format must be supported".into()));
        }
        self.synthesizer
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        let aggregator = Aggregator::new(self.aggregator).map_err(|e| invalid(e.to_string()))?;

        let disabled = self.disabled;
        let enabled = self
            .enabled
            .unwrap_or_else(|| self.registry.sources().cloned().collect())
            .into_iter()
            .filter(|source| !disabled.contains(source))
            .collect();
        let orchestrator = Orchestrator::new(self.orchestrator, self.registry, enabled)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(VehicleSearch {
            recognizer: self.recognizer,
            index,
            dimension,
            orchestrator,
            synthesizer: self.synthesizer,
            aggregator,
            policy: self.policy,
            index_k: self.index_k,
            allow_scrape_only: self.allow_scrape_only,
            disabled,
        })
    }
}

const DEFAULT_INDEX_K: usize = 20;

impl VehicleSearch {
    pub fn builder(
        recognizer: Arc<dyn VehicleRecognizer>,
        registry: AdapterRegistry,
    ) -> VehicleSearchBuilder {
        VehicleSearchBuilder {
            recognizer,
            registry,
            index: None,
            dimension: None,
            orchestrator: OrchestratorConfig::default(),
            enabled: None,
            disabled: BTreeSet::new(),
            synthesizer: SynthesizerConfig::default(),
            aggregator: AggregatorConfig::default(),
            policy: ImagePolicy::default(),
            index_k: DEFAULT_INDEX_K,
            allow_scrape_only: true,
        }
    }

    /// Build every component from a loaded configuration, including HTTP
    /// adapters for the configured marketplaces.
    pub fn from_config(
        config: &CarfinderConfig,
        recognizer: Arc<dyn VehicleRecognizer>,
    ) -> Result<Self, SearchError> {
        let registry = config
            .sources
            .build_registry()
            .map_err(|e| SearchError::InvalidConfig(e.to_string()))?;
        Self::from_config_with_registry(config, recognizer, registry)
    }

    /// Like [`from_config`](Self::from_config) over a caller-built registry.
    ///
    /// With a store configured the index is opened from it; an unopenable
    /// store is tolerated only when `allow_scrape_only` is set. Without a
    /// store an empty in-memory index is created.
    pub fn from_config_with_registry(
        config: &CarfinderConfig,
        recognizer: Arc<dyn VehicleRecognizer>,
        registry: AdapterRegistry,
    ) -> Result<Self, SearchError> {
        let builder = Self::builder(recognizer, registry)
            .with_dimension(config.index.dimension)
            .with_orchestrator_config(config.scrape.clone())
            .with_enabled_sources(config.sources.enabled_sources())
            .with_disabled_sources(config.sources.disabled_sources())
            .with_synthesizer_config(config.query.clone())
            .with_aggregator_config(config.ranking)
            .with_image_policy(config.image.clone())
            .with_index_k(config.index.k)
            .allow_scrape_only(config.index.allow_scrape_only);

        let index_config = config.index.to_index_config();
        let opened = if index_config.store.is_some() {
            EmbeddingIndex::open(index_config)
        } else {
            EmbeddingIndex::build(index_config, Vec::new())
        };
        let builder = match opened {
            Ok(index) => builder.with_index(Arc::new(index)),
            Err(err @ IndexError::Unavailable(_)) if config.index.allow_scrape_only => {
                warn!(error = %err, "embedding index unavailable; serving live results only");
                builder.with_unavailable_index(err)
            }
            Err(IndexError::Unavailable(reason)) => {
                return Err(SearchError::IndexUnavailable(reason))
            }
            Err(err) => return Err(SearchError::InvalidConfig(err.to_string())),
        };
        builder.build()
    }

    pub fn policy(&self) -> &ImagePolicy {
        &self.policy
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn allows_scrape_only(&self) -> bool {
        self.allow_scrape_only
    }

    /// Sources queried when a request has no overrides.
    pub fn default_sources(&self) -> &BTreeSet<SourceId> {
        self.orchestrator.enabled_sources()
    }

    /// Sources switched off by configuration.
    pub fn disabled_sources(&self) -> &BTreeSet<SourceId> {
        &self.disabled
    }

    /// Every source with a registered adapter.
    pub fn known_sources(&self) -> BTreeSet<SourceId> {
        self.orchestrator.registry().sources().cloned().collect()
    }

    pub fn index(&self) -> Option<&Arc<EmbeddingIndex>> {
        match &self.index {
            IndexState::Ready(index) => Some(index),
            IndexState::Unavailable(_) => None,
        }
    }

    pub fn index_status(&self) -> IndexStatus {
        match &self.index {
            IndexState::Ready(index) => IndexStatus {
                available: true,
                listings: index.len(),
                dimension: index.dimension(),
                metric: Some(index.metric()),
                version: Some(index.version()),
                reason: None,
            },
            IndexState::Unavailable(err) => IndexStatus {
                available: false,
                listings: 0,
                dimension: self.dimension,
                metric: None,
                version: None,
                reason: Some(err.to_string()),
            },
        }
    }

    /// Photo in, ranked listings out.
    pub async fn search(
        &self,
        upload: ImageUpload,
        overrides: &SourceOverrides,
    ) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let recognition = self.recognize(upload).await?;
        self.run(
            recognition.attributes,
            Some(recognition.embedding),
            Some(recognition.confidence),
            overrides,
            started,
        )
        .await
    }

    /// Validate an upload and run the recognizer on it, without searching.
    pub async fn recognize(&self, upload: ImageUpload) -> Result<Recognition, SearchError> {
        let mut validation_metrics = MetricsSpan::start();
        let format = match self.policy.validate(&upload) {
            Ok(format) => {
                if let Some(span) = validation_metrics.take() {
                    span.record_validation(Ok(()));
                }
                format
            }
            Err(err) => {
                if let Some(span) = validation_metrics.take() {
                    span.record_validation(Err(err.clone()));
                }
                debug!(error = %err, bytes = upload.len(), "rejected upload");
                return Err(err.into());
            }
        };
        let upload = upload.with_declared_format(format);

        let mut recognition_metrics = MetricsSpan::start();
        match self.recognizer.infer(&upload).await {
            Ok(recognition) => {
                if let Some(span) = recognition_metrics.take() {
                    span.record_recognition(Ok(()));
                }
                Ok(recognition)
            }
            Err(err) => {
                if let Some(span) = recognition_metrics.take() {
                    span.record_recognition(Err(err.clone()));
                }
                warn!(error = %err, "recognition failed");
                Err(err.into())
            }
        }
    }

    /// Search from already-recognized attributes, with an optional embedding
    /// for the index lookup.
    pub async fn search_attributes(
        &self,
        attributes: VehicleAttributes,
        embedding: Option<EmbeddingVector>,
        overrides: &SourceOverrides,
    ) -> Result<SearchResponse, SearchError> {
        self.run(attributes, embedding, None, overrides, Instant::now())
            .await
    }

    async fn run(
        &self,
        attributes: VehicleAttributes,
        embedding: Option<EmbeddingVector>,
        confidence: Option<f32>,
        overrides: &SourceOverrides,
        started: Instant,
    ) -> Result<SearchResponse, SearchError> {
        if let Some(embedding) = &embedding {
            if embedding.dimension() != self.dimension {
                return Err(SearchError::DimensionMismatch {
                    expected: self.dimension,
                    got: embedding.dimension(),
                });
            }
            if let IndexState::Unavailable(err) = &self.index {
                if !self.allow_scrape_only {
                    return Err(SearchError::IndexUnavailable(err.to_string()));
                }
            }
        }

        let attributes = attributes.normalized();
        let enabled = overrides.apply(self.orchestrator.enabled_sources(), &self.disabled);
        for source in overrides.enable.intersection(&self.disabled) {
            debug!(source = %source, "ignoring enable override for source disabled by configuration");
        }
        let mut diagnostics = Vec::new();
        let mut component_failed = false;

        let queries = match synthesize(&attributes, &enabled, &self.synthesizer) {
            Ok(queries) => queries,
            Err(QueryError::InvalidAttributes) => {
                component_failed = true;
                diagnostics.push(Diagnostic::no_attributes());
                Vec::new()
            }
            Err(err) => return Err(SearchError::InvalidConfig(err.to_string())),
        };

        let scraper = self.orchestrator.with_enabled_sources(enabled);
        let (index_outcome, report) = tokio::join!(
            self.search_index(embedding),
            scrape(&scraper, &queries)
        );

        let hits = match index_outcome {
            Ok(hits) => hits.unwrap_or_default(),
            Err(IndexError::DimensionMismatch { expected, got }) => {
                return Err(SearchError::DimensionMismatch { expected, got })
            }
            Err(err) => {
                if !self.allow_scrape_only {
                    return Err(SearchError::IndexUnavailable(err.to_string()));
                }
                warn!(error = %err, "index search failed; continuing with live results");
                component_failed = true;
                diagnostics.push(Diagnostic::index_unavailable(&err));
                Vec::new()
            }
        };
        for failure in report.failed() {
            component_failed = true;
            diagnostics.extend(Diagnostic::from_scrape(failure));
        }

        let index_hits = hits.len();
        let scraped = report.listing_count();
        if index_hits == 0 && scraped == 0 && component_failed {
            warn!(
                failures = diagnostics.len(),
                vehicle = %attributes.summary(),
                "no results from any component"
            );
            return Err(SearchError::NoResults { diagnostics });
        }

        let mut merge_metrics = MetricsSpan::start();
        let listings = self
            .aggregator
            .clone()
            .with_reference(attributes.clone())
            .merge(hits, &report.results);
        if let Some(span) = merge_metrics.take() {
            span.record_merge(listings.len());
        }

        let sources_used: BTreeSet<SourceId> = report
            .succeeded()
            .map(|result| result.task.source.clone())
            .collect();
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            vehicle = %attributes.summary(),
            listings = listings.len(),
            index_hits,
            scraped,
            failures = diagnostics.len(),
            elapsed_ms = processing_time_ms,
            "search complete"
        );

        Ok(SearchResponse {
            query: QuerySummary {
                summary: attributes.summary(),
                attributes,
                confidence,
                queries,
            },
            total_results: listings.len(),
            listings,
            index_hits,
            diagnostics,
            sources_used: sources_used.into_iter().collect(),
            processing_time_ms,
            deadline_exceeded: report.deadline_exceeded,
        })
    }

    /// `Ok(None)` when there is nothing to look up.
    async fn search_index(
        &self,
        embedding: Option<EmbeddingVector>,
    ) -> Result<Option<Vec<IndexHit>>, IndexError> {
        let Some(embedding) = embedding else {
            return Ok(None);
        };
        let index = match &self.index {
            IndexState::Ready(index) => Arc::clone(index),
            IndexState::Unavailable(err) => return Err(err.clone()),
        };
        let k = self.index_k;

        let mut index_metrics = MetricsSpan::start();
        let result = match tokio::task::spawn_blocking(move || index.search(&embedding, k)).await {
            Ok(result) => result,
            Err(join) => Err(IndexError::Unavailable(format!(
                "index search task failed: {join}"
            ))),
        };
        if let Some(span) = index_metrics.take() {
            span.record_index_search(result.as_ref().map(|_| ()).map_err(Clone::clone));
        }
        result.map(Some)
    }
}

async fn scrape(orchestrator: &Orchestrator, queries: &[SearchQuery]) -> ScrapeReport {
    if queries.is_empty() {
        return ScrapeReport::empty();
    }
    let mut scrape_metrics = MetricsSpan::start();
    let report = orchestrator.run(queries).await;
    if let Some(span) = scrape_metrics.take() {
        span.record_scrape(&report);
    }
    report
}
