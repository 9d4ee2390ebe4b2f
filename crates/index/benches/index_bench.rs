use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use index::{AnnConfig, EmbeddingIndex, IndexConfig};
use listing::{EmbeddingVector, ListingRecord, SourceId};

const DIM: usize = 512;

fn vector(seed: usize) -> EmbeddingVector {
    let values = (0..DIM)
        .map(|j| ((seed * 131 + j * 7) as f32 * 0.071).sin())
        .collect();
    EmbeddingVector::new(values).expect("finite vector")
}

fn record(seed: usize) -> ListingRecord {
    ListingRecord::builder(
        SourceId::autotrader(),
        format!("https://www.autotrader.com/cars-for-sale/vehicle/{seed}"),
        format!("Listing {seed}"),
    )
    .build()
    .expect("valid record")
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_search");

    for size in [500usize, 5_000] {
        let entries: Vec<_> = (0..size).map(|i| (vector(i), record(i))).collect();
        let linear = EmbeddingIndex::build(
            IndexConfig::new(DIM).with_ann(AnnConfig::default().with_enabled(false)),
            entries.clone(),
        )
        .expect("linear index");
        let ann = EmbeddingIndex::build(
            IndexConfig::new(DIM).with_ann(AnnConfig::default().with_min_vectors_for_ann(100)),
            entries,
        )
        .expect("ann index");

        let query = vector(size / 2);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("linear_{size}"), |b| {
            b.iter(|| linear.search(black_box(&query), 10).expect("search"))
        });
        group.bench_function(format!("hnsw_{size}"), |b| {
            b.iter(|| ann.search(black_box(&query), 10).expect("search"))
        });
    }

    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let index = EmbeddingIndex::build(
        IndexConfig::new(DIM),
        (0..1_000).map(|i| (vector(i), record(i))),
    )
    .expect("index");
    let mut next = 1_000usize;

    c.bench_function("index_insert_snapshot_swap", |b| {
        b.iter(|| {
            next += 1;
            index.insert(vector(next), record(next)).expect("insert")
        })
    });
}

criterion_group!(benches, bench_search, bench_insert);
criterion_main!(benches);
