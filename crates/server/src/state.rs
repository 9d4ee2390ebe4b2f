use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use carfinder::{CarfinderConfig, HttpRecognizer, VehicleSearch};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Search pipeline (shared across requests)
    pub search: Arc<VehicleSearch>,

    /// Renders `/metrics`; `None` when no recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl ServerState {
    /// Build the search pipeline from `config.pipeline_config`, with the
    /// HTTP recognizer and the configured marketplace adapters.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let mut pipeline = match &config.pipeline_config {
            Some(path) => CarfinderConfig::from_file(path)
                .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?,
            None => CarfinderConfig::default(),
        };
        pipeline
            .apply_env_overrides()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let recognizer = HttpRecognizer::new(&pipeline.recognizer)
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let search = VehicleSearch::from_config(&pipeline, Arc::new(recognizer))?;

        tracing::info!(
            pipeline = pipeline.name.as_deref().unwrap_or("carfinder"),
            recognizer = %pipeline.recognizer.endpoint,
            sources = search.default_sources().len(),
            index_available = search.index().is_some(),
            "search pipeline ready"
        );
        Ok(Self::with_search(config, search))
    }

    /// Wrap an already-built pipeline.
    pub fn with_search(config: ServerConfig, search: VehicleSearch) -> Self {
        Self {
            config: Arc::new(config),
            search: Arc::new(search),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
