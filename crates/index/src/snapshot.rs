use std::cmp::Ordering;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use listing::{EmbeddingVector, ListingRecord};

use crate::ann::{AnnConfig, AnnGraph};
use crate::metric::Metric;
use crate::IndexHit;

/// One immutable generation of the index.
///
/// Positions `< graph.covered()` are indexed by the graph unless listed in
/// `stale`; every other position is scanned exactly.
pub(crate) struct Snapshot {
    pub(crate) version: u64,
    vectors: Vec<EmbeddingVector>,
    records: Vec<ListingRecord>,
    by_id: HashMap<String, usize>,
    graph: Option<Arc<AnnGraph>>,
    stale: HashSet<usize>,
}

impl Snapshot {
    pub(crate) fn empty() -> Self {
        Self {
            version: 0,
            vectors: Vec::new(),
            records: Vec::new(),
            by_id: HashMap::new(),
            graph: None,
            stale: HashSet::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn get(&self, canonical_id: &str) -> Option<&ListingRecord> {
        self.by_id.get(canonical_id).map(|&pos| &self.records[pos])
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &ListingRecord> {
        self.records.iter()
    }

    pub(crate) fn uses_graph(&self) -> bool {
        self.graph.is_some()
    }

    /// Next generation with `entries` upserted. Vectors must already be
    /// dimension-checked.
    pub(crate) fn with_entries(
        &self,
        entries: Vec<(EmbeddingVector, ListingRecord)>,
        metric: Metric,
        ann: &AnnConfig,
    ) -> Snapshot {
        let mut vectors = self.vectors.clone();
        let mut records = self.records.clone();
        let mut by_id = self.by_id.clone();
        let mut stale = self.stale.clone();
        let covered = self.graph.as_ref().map_or(0, |g| g.covered());

        for (vector, record) in entries {
            let record = record.with_embedding(vector.clone());
            match by_id.get(record.canonical_id()) {
                Some(&pos) => {
                    if pos < covered && vectors[pos] != vector {
                        stale.insert(pos);
                    }
                    vectors[pos] = vector;
                    records[pos] = record;
                }
                None => {
                    by_id.insert(record.canonical_id().to_string(), records.len());
                    vectors.push(vector);
                    records.push(record);
                }
            }
        }

        let pending = stale.len() + vectors.len().saturating_sub(covered);
        let graph = if !ann.should_use_ann(vectors.len()) {
            None
        } else if self.graph.is_some() && pending <= ann.max_pending {
            self.graph.clone()
        } else {
            stale.clear();
            let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
            let built = AnnGraph::build(metric, &refs, ann).map(Arc::new);
            tracing::debug!(
                vectors = vectors.len(),
                graph = built.is_some(),
                "rebuilt ann graph"
            );
            built
        };
        if graph.is_none() {
            stale.clear();
        }

        Snapshot {
            version: self.version + 1,
            vectors,
            records,
            by_id,
            graph,
            stale,
        }
    }

    /// Exact top-k over the candidate set, ascending distance, ties by id.
    pub(crate) fn search(&self, query: &[f32], k: usize, metric: Metric) -> Vec<IndexHit> {
        if self.records.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<usize> = match &self.graph {
            Some(graph) => {
                let want = (k + self.stale.len()).min(graph.covered());
                let mut seen: HashSet<usize> = HashSet::new();
                let mut out: Vec<usize> = graph
                    .candidates(query, want)
                    .into_iter()
                    .filter(|pos| *pos < graph.covered() && !self.stale.contains(pos))
                    .filter(|pos| seen.insert(*pos))
                    .collect();
                out.extend(self.stale.iter().copied().filter(|pos| seen.insert(*pos)));
                out.extend(graph.covered()..self.vectors.len());
                out
            }
            None => (0..self.vectors.len()).collect(),
        };

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|pos| (pos, metric.distance(query, self.vectors[pos].as_slice())))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    self.records[a.0]
                        .canonical_id()
                        .cmp(self.records[b.0].canonical_id())
                })
        });

        scored
            .into_iter()
            .take(k)
            .map(|(pos, distance)| {
                let distance = distance.max(0.0);
                IndexHit {
                    listing: self.records[pos].clone(),
                    distance,
                    similarity: metric.similarity(distance),
                }
            })
            .collect()
    }
}
