//! YAML configuration file support for carfinder.
//!
//! Every component is configured from one YAML document. Sections are
//! optional and fall back to their defaults.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "carfinder-prod"
//!
//! image:
//!   max_image_bytes: 10485760
//!   supported_formats: ["jpeg", "png", "bmp"]
//!
//! recognizer:
//!   endpoint: "http://127.0.0.1:8500/v1/recognize"
//!   timeout_secs: 30
//!
//! index:
//!   dimension: 512
//!   metric: "cosine"
//!   k: 20
//!   allow_scrape_only: true
//!   store:
//!     backend: "redb"
//!     path: "/var/lib/carfinder/listings.redb"
//!   ann:
//!     m: 16
//!     ef_search: 64
//!
//! scrape:
//!   concurrency: 4
//!   task_timeout_ms: 10000
//!   deadline_ms: 30000
//!   retry:
//!     max_retries: 2
//!     base_delay_ms: 250
//!     max_delay_ms: 2000
//!   rate_limit:
//!     requests_per_second: 2.0
//!     burst_size: 4
//!
//! sources:
//!   autotrader:
//!     enabled: true
//!   cars_com:
//!     enabled: false
//!
//! ranking:
//!   alpha: 0.5
//!   max_results: 100
//!
//! env_overrides:
//!   recognizer.endpoint: "CARFINDER_RECOGNIZER_URL"
//!   index.store_path: "CARFINDER_INDEX_PATH"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use aggregator::AggregatorConfig;
use index::{AnnConfig, CompressionCodec, CompressionConfig, IndexConfig, Metric, StoreConfig};
use orchestrator::OrchestratorConfig;
use query::SynthesizerConfig;
use serde::{Deserialize, Serialize};
use sources::SourcesConfig;
use thiserror::Error;

use crate::recognizer::RecognizerConfig;
use crate::upload::ImagePolicy;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("unknown env override key: {0}")]
    UnknownOverride(String),
}

/// Top-level configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CarfinderConfig {
    /// Configuration format version
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Upload limits
    #[serde(default)]
    pub image: ImagePolicy,

    #[serde(default)]
    pub recognizer: RecognizerConfig,

    /// Embedding index and listing store
    #[serde(default)]
    pub index: IndexYamlConfig,

    /// Scrape fan-out budget
    #[serde(default)]
    pub scrape: OrchestratorConfig,

    /// Marketplace adapters and enable flags
    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub query: SynthesizerConfig,

    #[serde(default)]
    pub ranking: AggregatorConfig,

    /// Option path -> environment variable consulted by
    /// [`CarfinderConfig::apply_env_overrides`].
    #[serde(default)]
    pub env_overrides: HashMap<String, String>,
}

impl Default for CarfinderConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            image: ImagePolicy::default(),
            recognizer: RecognizerConfig::default(),
            index: IndexYamlConfig::default(),
            scrape: OrchestratorConfig::default(),
            sources: SourcesConfig::default(),
            query: SynthesizerConfig::default(),
            ranking: AggregatorConfig::default(),
            env_overrides: HashMap::new(),
        }
    }
}

impl CarfinderConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: CarfinderConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigLoadError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        if self.image.max_image_bytes == 0 {
            return Err(ConfigLoadError::Validation(
                "image.max_image_bytes must be greater than zero".into(),
            ));
        }
        if self.image.supported_formats.is_empty() {
            return Err(ConfigLoadError::Validation(
                "image.supported_formats must not be empty".into(),
            ));
        }
        self.recognizer
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("recognizer: {e}")))?;
        self.index.validate()?;
        self.scrape
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("scrape: {e}")))?;
        if self.sources.fetcher.timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "sources.fetcher.timeout_secs must be greater than zero".into(),
            ));
        }
        self.query
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("query: {e}")))?;
        self.ranking
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("ranking: {e}")))?;
        Ok(())
    }

    /// Apply `env_overrides` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigLoadError> {
        self.apply_env_overrides_with(|name| std::env::var(name).ok())
    }

    /// Apply `env_overrides`, resolving variable names through `lookup`.
    ///
    /// Unset variables leave the option untouched. The result is validated.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides: Vec<(String, String)> = self
            .env_overrides
            .iter()
            .map(|(key, var)| (key.clone(), var.clone()))
            .collect();
        overrides.sort();
        for (key, var) in overrides {
            if let Some(value) = lookup(&var) {
                self.set_option(&key, value.trim())?;
            }
        }
        self.validate()
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<(), ConfigLoadError> {
        let parse_err = |what: &str| {
            ConfigLoadError::Validation(format!("override {key}: '{value}' is not a valid {what}"))
        };
        match key {
            "recognizer.endpoint" => self.recognizer.endpoint = value.to_string(),
            "index.store_path" => self.index.store = Some(StoreConfig::redb(value)),
            "index.dimension" => {
                self.index.dimension = value.parse().map_err(|_| parse_err("integer"))?
            }
            "scrape.concurrency" => {
                self.scrape.concurrency = value.parse().map_err(|_| parse_err("integer"))?
            }
            "scrape.deadline_ms" => {
                let millis: u64 = value.parse().map_err(|_| parse_err("integer"))?;
                self.scrape.deadline = std::time::Duration::from_millis(millis);
            }
            "ranking.alpha" => self.ranking.alpha = value.parse().map_err(|_| parse_err("number"))?,
            "ranking.max_results" => {
                self.ranking.max_results = value.parse().map_err(|_| parse_err("integer"))?
            }
            other => return Err(ConfigLoadError::UnknownOverride(other.to_string())),
        }
        Ok(())
    }
}

/// Embedding index section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexYamlConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub metric: Metric,

    /// Neighbors requested per search.
    #[serde(default = "default_k")]
    pub k: usize,

    /// Serve live results when the index cannot be used.
    #[serde(default = "true_value")]
    pub allow_scrape_only: bool,

    /// Listing store; absent means an in-memory index that starts empty.
    #[serde(default)]
    pub store: Option<StoreConfig>,

    #[serde(default)]
    pub ann: AnnYamlConfig,

    #[serde(default)]
    pub compression: CompressionConfig,
}

impl Default for IndexYamlConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            metric: Metric::default(),
            k: default_k(),
            allow_scrape_only: true,
            store: None,
            ann: AnnYamlConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl IndexYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.dimension == 0 {
            return Err(ConfigLoadError::Validation(
                "index.dimension must be greater than zero".into(),
            ));
        }
        if self.k == 0 {
            return Err(ConfigLoadError::Validation(
                "index.k must be at least 1".into(),
            ));
        }
        if self.ann.m == 0 || self.ann.ef_construction == 0 || self.ann.ef_search == 0 {
            return Err(ConfigLoadError::Validation(
                "index.ann m, ef_construction and ef_search must be positive".into(),
            ));
        }
        if self.compression.codec == CompressionCodec::Zstd
            && !(1..=22).contains(&self.compression.level)
        {
            return Err(ConfigLoadError::Validation(format!(
                "index.compression.level must be between 1 and 22, got {}",
                self.compression.level
            )));
        }
        if let Some(StoreConfig::Redb { path }) = &self.store {
            if path.trim().is_empty() {
                return Err(ConfigLoadError::Validation(
                    "index.store.path must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_index_config(&self) -> IndexConfig {
        let config = IndexConfig::new(self.dimension)
            .with_metric(self.metric)
            .with_ann(self.ann.to_ann_config())
            .with_compression(self.compression);
        match &self.store {
            Some(store) => config.with_store(store.clone()),
            None => config,
        }
    }
}

/// HNSW knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnYamlConfig {
    #[serde(default = "true_value")]
    pub enabled: bool,
    #[serde(default = "default_ann_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    #[serde(default = "default_min_vectors_for_ann")]
    pub min_vectors_for_ann: usize,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for AnnYamlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            m: default_ann_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            min_vectors_for_ann: default_min_vectors_for_ann(),
            max_pending: default_max_pending(),
        }
    }
}

impl AnnYamlConfig {
    pub fn to_ann_config(&self) -> AnnConfig {
        AnnConfig {
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            enabled: self.enabled,
            min_vectors_for_ann: self.min_vectors_for_ann,
            max_pending: self.max_pending,
        }
    }
}

fn true_value() -> bool {
    true
}
fn default_dimension() -> usize {
    IndexConfig::default().dimension
}
fn default_k() -> usize {
    20
}
fn default_ann_m() -> usize {
    AnnConfig::default().m
}
fn default_ef_construction() -> usize {
    AnnConfig::default().ef_construction
}
fn default_ef_search() -> usize {
    AnnConfig::default().ef_search
}
fn default_min_vectors_for_ann() -> usize {
    AnnConfig::default().min_vectors_for_ann
}
fn default_max_pending() -> usize {
    AnnConfig::default().max_pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use listing::SourceId;
    use tempfile::NamedTempFile;

    use crate::upload::ImageFormat;

    const FULL_YAML: &str = r#"
version: "1.0"
name: "test-config"
image:
  max_image_bytes: 5242880
  supported_formats: ["jpg", "png"]
index:
  dimension: 256
  metric: "l2"
  k: 5
  allow_scrape_only: false
  store:
    backend: "redb"
    path: "/tmp/listings.redb"
  ann:
    m: 32
    min_vectors_for_ann: 10
scrape:
  concurrency: 8
  task_timeout_ms: 5000
  deadline_ms: 20000
  retry:
    max_retries: 3
  source_rate_limits:
    cars_com:
      requests_per_second: 1.0
      burst_size: 2
sources:
  cars_com:
    enabled: false
ranking:
  alpha: 0.7
"#;

    #[test]
    fn test_load_valid_yaml() {
        let config = CarfinderConfig::from_yaml_str(FULL_YAML).unwrap();
        assert_eq!(config.name.as_deref(), Some("test-config"));
        assert_eq!(config.image.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(
            config.image.supported_formats,
            vec![ImageFormat::Jpeg, ImageFormat::Png]
        );
        assert_eq!(config.index.dimension, 256);
        assert_eq!(config.index.metric, Metric::L2);
        assert!(!config.index.allow_scrape_only);
        assert_eq!(config.index.ann.m, 32);
        assert_eq!(config.index.ann.ef_search, AnnConfig::default().ef_search);
        assert_eq!(config.scrape.concurrency, 8);
        assert_eq!(config.scrape.task_timeout, Duration::from_secs(5));
        assert_eq!(config.scrape.retry.max_retries, 3);
        assert!(config
            .scrape
            .source_rate_limits
            .contains_key(&SourceId::cars_com()));
        assert_eq!(
            config.sources.enabled_sources().into_iter().collect::<Vec<_>>(),
            vec![SourceId::autotrader()]
        );
        assert_eq!(config.ranking.alpha, 0.7);
        assert_eq!(config.ranking.max_results, 100);
    }

    #[test]
    fn test_index_config_conversion() {
        let config = CarfinderConfig::from_yaml_str(FULL_YAML).unwrap();
        let index = config.index.to_index_config();
        assert_eq!(index.dimension, 256);
        assert_eq!(index.metric, Metric::L2);
        assert_eq!(index.ann.m, 32);
        assert_eq!(index.ann.min_vectors_for_ann, 10);
        assert_eq!(index.store, Some(StoreConfig::redb("/tmp/listings.redb")));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "version: \"1\"\nranking:\n  max_results: 25").unwrap();

        let config = CarfinderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ranking.max_results, 25);
        assert_eq!(config.index.dimension, 512);
    }

    #[test]
    fn test_default_config() {
        let config = CarfinderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.index.k, 20);
        assert!(config.index.allow_scrape_only);
        assert!(config.index.store.is_none());
        assert_eq!(config.sources.enabled_sources().len(), 2);
    }

    #[test]
    fn test_unsupported_version() {
        let err = CarfinderConfig::from_yaml_str("version: \"2.0\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnsupportedVersion(v) if v == "2.0"));
    }

    #[test]
    fn test_section_validation() {
        let cases = [
            "version: \"1.0\"\nindex:\n  dimension: 0",
            "version: \"1.0\"\nindex:\n  k: 0",
            "version: \"1.0\"\nimage:\n  supported_formats: []",
            "version: \"1.0\"\nscrape:\n  concurrency: 0",
            "version: \"1.0\"\nranking:\n  alpha: 2.0",
            "version: \"1.0\"\nrecognizer:\n  endpoint: \"nope\"",
            "version: \"1.0\"\nquery:\n  min_year: 2030\n  max_year: 2000",
        ];
        for yaml in cases {
            let err = CarfinderConfig::from_yaml_str(yaml).unwrap_err();
            assert!(
                matches!(err, ConfigLoadError::Validation(_)),
                "expected validation error for {yaml:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CarfinderConfig::default();
        config
            .env_overrides
            .insert("scrape.concurrency".into(), "CF_CONCURRENCY".into());
        config
            .env_overrides
            .insert("index.store_path".into(), "CF_INDEX".into());
        config
            .env_overrides
            .insert("ranking.alpha".into(), "CF_UNSET".into());

        config
            .apply_env_overrides_with(|name| match name {
                "CF_CONCURRENCY" => Some("12".into()),
                "CF_INDEX" => Some("/data/listings.redb".into()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.scrape.concurrency, 12);
        assert_eq!(
            config.index.store,
            Some(StoreConfig::redb("/data/listings.redb"))
        );
        assert_eq!(config.ranking.alpha, 0.5);
    }

    #[test]
    fn test_bad_env_overrides() {
        let mut config = CarfinderConfig::default();
        config
            .env_overrides
            .insert("scrape.nonsense".into(), "CF_X".into());
        let err = config
            .apply_env_overrides_with(|_| Some("1".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnknownOverride(_)));

        let mut config = CarfinderConfig::default();
        config
            .env_overrides
            .insert("scrape.concurrency".into(), "CF_X".into());
        let err = config
            .apply_env_overrides_with(|_| Some("many".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Validation(_)));
    }

    #[test]
    fn test_full_yaml_roundtrip() {
        let config = CarfinderConfig::from_yaml_str(FULL_YAML).unwrap();
        let yaml = config.to_yaml_string().unwrap();
        let reparsed = CarfinderConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(reparsed.index, config.index);
        assert_eq!(reparsed.scrape, config.scrape);
        assert_eq!(reparsed.sources, config.sources);
    }
}
