//! # carfinder index
//!
//! Nearest-neighbor lookup over the embeddings of previously indexed
//! marketplace listings, plus the persistent store those listings live in.
//!
//! ## Core Features
//!
//! - **Fixed metric**: [`Metric::Cosine`] or [`Metric::L2`], chosen at build
//!   time. Distances are never negative; [`IndexHit::similarity`] maps them
//!   onto `[0, 1]`.
//! - **Approximate search**: an HNSW graph ([`AnnConfig`]) proposes
//!   candidates above a size threshold; candidates are re-scored exactly, so
//!   results are sorted by exact distance with ties broken by canonical id.
//!   Small indexes use an exact linear scan.
//! - **Snapshots**: [`EmbeddingIndex::search`] takes `&self` and runs against
//!   an immutable snapshot. Inserts build the next snapshot and swap it in;
//!   searches that already started keep the snapshot they began with.
//! - **Persistence**: listings are bincode-encoded, zstd-compressed and kept
//!   in a [`ListingStore`] (in-memory or redb).
//!
//! ## Example Usage
//!
//! ```
//! use index::{EmbeddingIndex, IndexConfig, Metric};
//! use listing::{EmbeddingVector, ListingRecord, SourceId};
//!
//! let config = IndexConfig::new(3).with_metric(Metric::Cosine);
//! let record = ListingRecord::builder(SourceId::cars_com(), "https://www.cars.com/v/1", "2019 Honda Civic")
//!     .build()
//!     .unwrap();
//! let vector = EmbeddingVector::new(vec![1.0, 0.0, 0.0]).unwrap();
//!
//! let index = EmbeddingIndex::build(config, vec![(vector.clone(), record)]).unwrap();
//! let hits = index.search(&vector, 5).unwrap();
//! assert_eq!(hits.len(), 1);
//! assert!(hits[0].distance < 1e-6);
//! ```

pub mod ann;
mod metric;
mod snapshot;
mod store;

use std::sync::{Arc, Mutex, RwLock};

use bincode::error::{DecodeError, EncodeError};
use listing::{EmbeddingVector, ListingRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use crate::ann::AnnConfig;
pub use crate::metric::Metric;
#[cfg(feature = "backend-redb")]
pub use crate::store::RedbStore;
pub use crate::store::{
    CompressionCodec, CompressionConfig, InMemoryStore, ListingStore, StoreConfig, StoredListing,
    STORE_SCHEMA_VERSION,
};

use crate::snapshot::Snapshot;
use crate::store::{decode_record, encode_record};

/// Config for building or opening an index.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Embedding dimension D; every vector must have exactly this length.
    pub dimension: usize,
    /// Distance metric.
    pub metric: Metric,
    /// ANN graph settings.
    pub ann: AnnConfig,
    /// Where listings are persisted. `None` keeps the index purely in memory.
    pub store: Option<StoreConfig>,
    /// Compression applied to stored records.
    pub compression: CompressionConfig,
}

impl IndexConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            metric: Metric::default(),
            ann: AnnConfig::default(),
            store: None,
            compression: CompressionConfig::default(),
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_ann(mut self, ann: AnnConfig) -> Self {
        self.ann = ann;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    fn validate(&self) -> Result<(), IndexError> {
        if self.dimension == 0 {
            return Err(IndexError::InvalidConfig(
                "dimension must be greater than zero".into(),
            ));
        }
        if self.ann.m == 0 || self.ann.ef_construction == 0 || self.ann.ef_search == 0 {
            return Err(IndexError::InvalidConfig(
                "ann m, ef_construction and ef_search must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::new(512)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("k must be at least 1")]
    InvalidK,
    #[error("index unavailable: {0}")]
    Unavailable(String),
    #[error("invalid index config: {0}")]
    InvalidConfig(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization encode error: {0}")]
    Encode(String),
    #[error("serialization decode error: {0}")]
    Decode(String),
    #[error("compression error: {0}")]
    Compression(String),
}

impl From<EncodeError> for IndexError {
    fn from(e: EncodeError) -> Self {
        IndexError::Encode(e.to_string())
    }
}

impl From<DecodeError> for IndexError {
    fn from(e: DecodeError) -> Self {
        IndexError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Compression(e.to_string())
    }
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    fn unavailable<E: std::fmt::Display>(err: E) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// One nearest-neighbor result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    /// The indexed listing, embedding attached.
    pub listing: ListingRecord,
    /// Exact distance under the index metric (lower = closer, never negative).
    pub distance: f32,
    /// Similarity in `[0, 1]` derived from `distance`.
    pub similarity: f32,
}

impl IndexHit {
    pub fn canonical_id(&self) -> &str {
        self.listing.canonical_id()
    }
}

/// Read-mostly embedding index with copy-on-write snapshots.
pub struct EmbeddingIndex {
    config: IndexConfig,
    current: RwLock<Arc<Snapshot>>,
    /// Serializes writers so concurrent inserts never drop each other.
    writer: Mutex<()>,
    store: Option<Box<dyn ListingStore>>,
}

impl EmbeddingIndex {
    /// Build an index from `(vector, record)` entries.
    ///
    /// A later entry with the same canonical id replaces an earlier one. When
    /// `config.store` is set the entries are also written to the store.
    pub fn build(
        config: IndexConfig,
        entries: impl IntoIterator<Item = (EmbeddingVector, ListingRecord)>,
    ) -> Result<Self, IndexError> {
        config.validate()?;
        let entries: Vec<(EmbeddingVector, ListingRecord)> = entries.into_iter().collect();
        for (vector, _) in &entries {
            check_dimension(config.dimension, vector)?;
        }

        let store = match &config.store {
            Some(store_config) => Some(store_config.open()?),
            None => None,
        };
        if let Some(store) = &store {
            persist(store.as_ref(), &config.compression, &entries)?;
        }

        let snapshot = Snapshot::empty().with_entries(entries, config.metric, &config.ann);
        info!(
            listings = snapshot.len(),
            dimension = config.dimension,
            metric = config.metric.as_str(),
            ann = snapshot.uses_graph(),
            "built embedding index"
        );

        Ok(Self {
            config,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            store,
        })
    }

    /// Open the configured store and index every stored listing that carries
    /// an embedding.
    ///
    /// A missing, unreadable or undecodable store is `IndexError::Unavailable`.
    pub fn open(config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let store_config = config
            .store
            .clone()
            .ok_or_else(|| IndexError::Unavailable("no listing store configured".into()))?;
        let store = store_config.open().map_err(IndexError::unavailable)?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        store
            .scan(&mut |data| {
                let record = decode_record(&config.compression, data)?;
                match record.embedding().cloned() {
                    Some(vector) => entries.push((vector, record)),
                    None => skipped += 1,
                }
                Ok(())
            })
            .map_err(IndexError::unavailable)?;
        if skipped > 0 {
            warn!(skipped, "stored listings without an embedding were not indexed");
        }
        for (vector, _) in &entries {
            check_dimension(config.dimension, vector)?;
        }

        let snapshot = Snapshot::empty().with_entries(entries, config.metric, &config.ann);
        info!(
            listings = snapshot.len(),
            dimension = config.dimension,
            "opened embedding index from store"
        );

        Ok(Self {
            config,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            store: Some(store),
        })
    }

    /// The `k` nearest listings to `query`, nearest first.
    pub fn search(&self, query: &EmbeddingVector, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK);
        }
        check_dimension(self.config.dimension, query)?;

        let snapshot = self.snapshot()?;
        let hits = snapshot.search(query.as_slice(), k, self.config.metric);
        debug!(
            k,
            hits = hits.len(),
            version = snapshot.version,
            "index search"
        );
        Ok(hits)
    }

    /// Insert or replace a single listing.
    pub fn insert(&self, vector: EmbeddingVector, record: ListingRecord) -> Result<(), IndexError> {
        self.insert_batch(vec![(vector, record)])
    }

    /// Insert or replace many listings and publish one new snapshot.
    pub fn insert_batch(
        &self,
        entries: impl IntoIterator<Item = (EmbeddingVector, ListingRecord)>,
    ) -> Result<(), IndexError> {
        let entries: Vec<(EmbeddingVector, ListingRecord)> = entries.into_iter().collect();
        if entries.is_empty() {
            return Ok(());
        }
        for (vector, _) in &entries {
            check_dimension(self.config.dimension, vector)?;
        }

        let _guard = self
            .writer
            .lock()
            .map_err(|_| IndexError::backend("poisoned lock"))?;

        if let Some(store) = &self.store {
            persist(store.as_ref(), &self.config.compression, &entries)?;
        }

        let base = self.snapshot()?;
        let next = base.with_entries(entries, self.config.metric, &self.config.ann);
        let version = next.version;
        *self
            .current
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))? = Arc::new(next);
        debug!(version, "published index snapshot");
        Ok(())
    }

    /// Look up an indexed listing by canonical id.
    pub fn get(&self, canonical_id: &str) -> Result<Option<ListingRecord>, IndexError> {
        Ok(self.snapshot()?.get(canonical_id).cloned())
    }

    /// Every indexed listing in insertion order.
    pub fn listings(&self) -> Result<Vec<ListingRecord>, IndexError> {
        Ok(self.snapshot()?.records().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.snapshot().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn metric(&self) -> Metric {
        self.config.metric
    }

    /// Monotonic snapshot counter; bumped by every successful insert.
    pub fn version(&self) -> u64 {
        self.snapshot().map(|s| s.version).unwrap_or(0)
    }

    /// Flush the backing store, if any.
    pub fn flush(&self) -> Result<(), IndexError> {
        match &self.store {
            Some(store) => store.flush(),
            None => Ok(()),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, IndexError> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| IndexError::backend("poisoned lock"))
    }
}

fn check_dimension(expected: usize, vector: &EmbeddingVector) -> Result<(), IndexError> {
    if vector.dimension() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            got: vector.dimension(),
        });
    }
    Ok(())
}

fn persist(
    store: &dyn ListingStore,
    compression: &CompressionConfig,
    entries: &[(EmbeddingVector, ListingRecord)],
) -> Result<(), IndexError> {
    let mut encoded = Vec::with_capacity(entries.len());
    for (vector, record) in entries {
        let record = record.with_embedding(vector.clone());
        encoded.push((
            record.canonical_id().to_string(),
            encode_record(compression, &record)?,
        ));
    }
    store.batch_put(encoded)
}
