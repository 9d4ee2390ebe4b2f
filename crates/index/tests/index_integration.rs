use std::sync::Arc;
use std::thread;

use index::{AnnConfig, EmbeddingIndex, IndexConfig, IndexError, Metric, StoreConfig};
use listing::{EmbeddingVector, ListingRecord, SourceId};

const DIM: usize = 16;

fn pseudo_vector(seed: usize) -> EmbeddingVector {
    let values = (0..DIM)
        .map(|j| ((seed * 31 + j * 17) as f32 * 0.137).sin())
        .collect();
    EmbeddingVector::new(values).unwrap()
}

fn listing(seed: usize) -> ListingRecord {
    ListingRecord::builder(
        SourceId::cars_com(),
        format!("https://www.cars.com/vehicledetail/{seed}/"),
        format!("Vehicle {seed}"),
    )
    .build()
    .unwrap()
}

fn entries(n: usize) -> Vec<(EmbeddingVector, ListingRecord)> {
    (0..n).map(|i| (pseudo_vector(i), listing(i))).collect()
}

#[test]
fn ann_path_returns_exactly_scored_sorted_hits() {
    let config = IndexConfig::new(DIM)
        .with_metric(Metric::Cosine)
        .with_ann(AnnConfig::default().with_min_vectors_for_ann(500));
    let index = EmbeddingIndex::build(config, entries(1500)).unwrap();

    let query = pseudo_vector(321);
    let hits = index.search(&query, 10).unwrap();
    assert!(!hits.is_empty() && hits.len() <= 10);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert!(hits.iter().all(|h| h.distance >= 0.0));
    assert_eq!(hits[0].canonical_id(), listing(321).canonical_id());

    // same snapshot, same query, same answer
    let again = index.search(&query, 10).unwrap();
    assert_eq!(hits, again);
}

#[test]
fn linear_and_ann_agree_on_the_nearest_listing() {
    let exact = EmbeddingIndex::build(
        IndexConfig::new(DIM).with_ann(AnnConfig::default().with_enabled(false)),
        entries(1200),
    )
    .unwrap();
    let approx = EmbeddingIndex::build(
        IndexConfig::new(DIM).with_ann(AnnConfig::default().with_min_vectors_for_ann(100)),
        entries(1200),
    )
    .unwrap();

    for seed in [3usize, 450, 1199] {
        let q = pseudo_vector(seed);
        let a = exact.search(&q, 1).unwrap();
        let b = approx.search(&q, 1).unwrap();
        assert_eq!(a[0].canonical_id(), b[0].canonical_id());
    }
}

#[test]
fn pending_inserts_are_visible_before_graph_rebuild() {
    let config = IndexConfig::new(DIM).with_ann(
        AnnConfig::default()
            .with_min_vectors_for_ann(100)
            .with_max_pending(1000),
    );
    let index = EmbeddingIndex::build(config, entries(300)).unwrap();

    let fresh = EmbeddingVector::new(vec![1.0; DIM]).unwrap();
    index.insert(fresh.clone(), listing(10_000)).unwrap();

    let hits = index.search(&fresh, 1).unwrap();
    assert_eq!(hits[0].canonical_id(), listing(10_000).canonical_id());
}

#[test]
fn searches_run_concurrently_with_inserts() {
    let index = Arc::new(EmbeddingIndex::build(IndexConfig::new(DIM), entries(200)).unwrap());

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for i in 200..260 {
                index.insert(pseudo_vector(i), listing(i)).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|r| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for i in 0..50 {
                    let hits = index.search(&pseudo_vector(r * 50 + i), 5).unwrap();
                    assert_eq!(hits.len(), 5);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(index.len(), 260);
    assert_eq!(index.version(), 61);
}

#[test]
fn redb_store_persists_listings_across_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("listings.redb");
    let config = IndexConfig::new(DIM)
        .with_metric(Metric::L2)
        .with_store(StoreConfig::redb(path.to_string_lossy()));

    {
        let index = EmbeddingIndex::build(config.clone(), entries(20)).unwrap();
        index.insert(pseudo_vector(500), listing(500)).unwrap();
        index.flush().unwrap();
    }

    let reopened = EmbeddingIndex::open(config).unwrap();
    assert_eq!(reopened.len(), 21);
    let hit = reopened.search(&pseudo_vector(500), 1).unwrap();
    assert_eq!(hit[0].canonical_id(), listing(500).canonical_id());
    assert!(reopened.get(listing(7).canonical_id()).unwrap().is_some());
}

#[test]
fn corrupt_store_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.redb");
    std::fs::write(&path, b"definitely not a redb file").unwrap();

    let config = IndexConfig::new(DIM).with_store(StoreConfig::redb(path.to_string_lossy()));
    let err = EmbeddingIndex::open(config).err().unwrap();
    assert!(matches!(err, IndexError::Unavailable(_)));
}

#[test]
fn reopening_with_wrong_dimension_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dim.redb");
    let store = StoreConfig::redb(path.to_string_lossy());

    EmbeddingIndex::build(IndexConfig::new(DIM).with_store(store.clone()), entries(3)).unwrap();
    let err = EmbeddingIndex::open(IndexConfig::new(DIM + 1).with_store(store))
        .err()
        .unwrap();
    assert_eq!(
        err,
        IndexError::DimensionMismatch {
            expected: DIM + 1,
            got: DIM
        }
    );
}
