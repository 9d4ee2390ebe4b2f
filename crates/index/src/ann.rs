//! Approximate nearest neighbor candidate generation using HNSW.
//!
//! The graph only proposes candidates. Every candidate is re-scored with the
//! exact metric by the snapshot that owns the graph, so the order of returned
//! hits never depends on HNSW's internal distance approximations.
//!
//! ## Trade-offs
//!
//! - **Speed**: sub-linear search on large listing sets
//! - **Recall**: typically 95-99%; exhaustive recall is not a goal
//! - **Build time**: the graph is rebuilt when enough vectors accumulate
//!   outside it (see [`AnnConfig::max_pending`])
//!
//! Below [`AnnConfig::min_vectors_for_ann`] the index uses an exact linear scan.

use hnsw_rs::prelude::*;

use crate::metric::Metric;

/// Configuration for ANN graph construction and search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnConfig {
    /// Number of neighbors per node (higher = better recall, slower build).
    /// Default: 16
    pub m: usize,
    /// Size of dynamic candidate list during construction.
    /// Default: 200
    pub ef_construction: usize,
    /// Size of dynamic candidate list during search.
    /// Default: 64
    pub ef_search: usize,
    /// Whether to use ANN or always fall back to linear scan.
    /// Default: true
    pub enabled: bool,
    /// Minimum number of vectors before ANN is used.
    /// Default: 1000
    pub min_vectors_for_ann: usize,
    /// Vectors inserted after the last graph build are scanned linearly; once
    /// more than this many accumulate the graph is rebuilt.
    /// Default: 256
    pub max_pending: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            enabled: true,
            min_vectors_for_ann: 1000,
            max_pending: 256,
        }
    }
}

impl AnnConfig {
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_vectors_for_ann(mut self, min: usize) -> Self {
        self.min_vectors_for_ann = min;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Check if ANN should be used given the current dataset size.
    pub fn should_use_ann(&self, num_vectors: usize) -> bool {
        self.enabled && num_vectors >= self.min_vectors_for_ann
    }
}

/// HNSW needs a handful of points before its layer heuristics behave.
const MIN_GRAPH_POINTS: usize = 10;

enum Graph {
    Cosine(Hnsw<'static, f32, DistCosine>),
    L2(Hnsw<'static, f32, DistL2>),
}

/// Immutable HNSW graph over a prefix of a snapshot's vectors.
///
/// Point ids are positions in the snapshot's vector table.
pub(crate) struct AnnGraph {
    graph: Graph,
    ef_search: usize,
    covered: usize,
}

impl AnnGraph {
    /// Build a graph over `vectors`. Returns `None` when there are too few
    /// points for HNSW to be useful.
    pub(crate) fn build(metric: Metric, vectors: &[&[f32]], config: &AnnConfig) -> Option<Self> {
        let nb_elem = vectors.len();
        if nb_elem < MIN_GRAPH_POINTS {
            return None;
        }

        let nb_layer = 16.min((nb_elem as f32).ln().trunc() as usize).max(1);
        // hnsw_rs takes `&Vec<f32>` for insertion
        let owned: Vec<Vec<f32>> = vectors.iter().map(|v| v.to_vec()).collect();
        let data_for_insertion: Vec<(&Vec<f32>, usize)> = owned
            .iter()
            .enumerate()
            .map(|(idx, vec)| (vec, idx))
            .collect();

        let graph = match metric {
            Metric::Cosine => {
                let hnsw = Hnsw::<f32, DistCosine>::new(
                    config.m,
                    nb_elem,
                    nb_layer,
                    config.ef_construction,
                    DistCosine {},
                );
                hnsw.parallel_insert(&data_for_insertion);
                Graph::Cosine(hnsw)
            }
            Metric::L2 => {
                let hnsw = Hnsw::<f32, DistL2>::new(
                    config.m,
                    nb_elem,
                    nb_layer,
                    config.ef_construction,
                    DistL2 {},
                );
                hnsw.parallel_insert(&data_for_insertion);
                Graph::L2(hnsw)
            }
        };

        Some(Self {
            graph,
            ef_search: config.ef_search,
            covered: nb_elem,
        })
    }

    /// Number of leading snapshot positions this graph indexes.
    pub(crate) fn covered(&self) -> usize {
        self.covered
    }

    /// Candidate positions for `query`, nearest first by HNSW's estimate.
    pub(crate) fn candidates(&self, query: &[f32], k: usize) -> Vec<usize> {
        let ef = self.ef_search.max(k);
        let neighbours: Vec<Neighbour> = match &self.graph {
            Graph::Cosine(hnsw) => hnsw.search(query, k, ef),
            Graph::L2(hnsw) => hnsw.search(query, k, ef),
        };
        neighbours
            .into_iter()
            .map(|neighbour| neighbour.get_origin_id())
            .collect()
    }
}
