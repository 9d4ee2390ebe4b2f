use std::time::Duration;

use aggregator::{Aggregator, AggregatorConfig, Provenance, RankedResult};
use chrono::{TimeZone, Utc};
use index::IndexHit;
use listing::{EmbeddingVector, ListingRecord, Price, SourceId, VehicleAttributes};
use orchestrator::{FailureKind, ScrapeOutcome, ScrapeResult, TaskId, TaskRef};

fn civic() -> VehicleAttributes {
    VehicleAttributes::new()
        .with_make("Honda")
        .with_model("Civic")
        .with_year(2019)
}

fn record(source: SourceId, path: &str, price: Option<u64>) -> ListingRecord {
    ListingRecord::builder(
        source,
        format!("https://www.example.com/vehicle/{path}"),
        format!("2019 Honda Civic {path}"),
    )
    .with_price(price.map(Price::from_dollars))
    .with_attributes(civic())
    .build()
    .unwrap()
}

fn hit(listing: ListingRecord, similarity: f32) -> IndexHit {
    let listing = listing.with_embedding(EmbeddingVector::new(vec![1.0, 0.0, 0.0]).unwrap());
    IndexHit {
        listing,
        distance: 1.0 - similarity,
        similarity,
    }
}

fn scraped(id: u64, source: SourceId, listings: Vec<ListingRecord>) -> ScrapeResult {
    ScrapeResult {
        task: TaskRef {
            id: TaskId(id),
            source,
            query_index: 0,
        },
        outcome: ScrapeOutcome::Success { listings },
        attempts: 1,
        elapsed: Duration::from_millis(120),
    }
}

fn failed(id: u64, source: SourceId, kind: FailureKind) -> ScrapeResult {
    ScrapeResult {
        task: TaskRef {
            id: TaskId(id),
            source,
            query_index: 0,
        },
        outcome: ScrapeOutcome::Failure {
            kind,
            message: "boom".into(),
        },
        attempts: 3,
        elapsed: Duration::from_secs(10),
    }
}

fn aggregator() -> Aggregator {
    Aggregator::new(AggregatorConfig::default())
        .unwrap()
        .with_reference(civic())
}

#[test]
fn scrape_price_wins_over_index_price() {
    let indexed = record(SourceId::autotrader(), "a1", Some(15_000));
    let fresh = record(SourceId::autotrader(), "a1", Some(14_500));
    assert_eq!(indexed.canonical_id(), fresh.canonical_id());

    let merged = aggregator().merge(
        [hit(indexed, 0.9)],
        &[scraped(0, SourceId::autotrader(), vec![fresh])],
    );

    assert_eq!(merged.len(), 1);
    let only = &merged[0];
    assert_eq!(only.provenance, Provenance::Both);
    assert_eq!(only.listing.price(), Some(Price::from_dollars(14_500)));
    assert_eq!(only.similarity, Some(0.9));
    assert!(only.listing.embedding().is_some());
    assert!(only.relevance.is_some());
}

#[test]
fn index_price_kept_when_scrape_has_none() {
    let indexed = record(SourceId::cars_com(), "c1", Some(16_000));
    let fresh = record(SourceId::cars_com(), "c1", None);
    let merged = aggregator().merge(
        [hit(indexed, 0.8)],
        &[scraped(0, SourceId::cars_com(), vec![fresh])],
    );
    assert_eq!(merged[0].listing.price(), Some(Price::from_dollars(16_000)));
}

#[test]
fn merge_is_idempotent() {
    let hits = vec![
        hit(record(SourceId::autotrader(), "a1", Some(15_000)), 0.95),
        hit(record(SourceId::autotrader(), "a2", None), 0.7),
    ];
    let scrapes = vec![
        scraped(
            0,
            SourceId::autotrader(),
            vec![
                record(SourceId::autotrader(), "a1", Some(14_900)),
                record(SourceId::autotrader(), "a3", Some(13_000)),
            ],
        ),
        scraped(
            1,
            SourceId::cars_com(),
            vec![record(SourceId::cars_com(), "c1", Some(17_000))],
        ),
        failed(2, SourceId::cars_com(), FailureKind::Timeout),
    ];
    let agg = aggregator();

    let once = agg.merge(hits, &scrapes);
    let twice = agg.merge(once.clone(), &[]);

    assert_eq!(once, twice);
    assert_eq!(once.len(), 4);
}

#[test]
fn ordering_is_total() {
    // Same score everywhere: priced before unpriced, then canonical id.
    let listings = vec![
        record(SourceId::cars_com(), "x", None),
        record(SourceId::cars_com(), "y", Some(10_000)),
        record(SourceId::cars_com(), "z", Some(11_000)),
    ];
    let hits: Vec<IndexHit> = listings.into_iter().map(|l| hit(l, 0.5)).collect();
    let merged = aggregator().merge(hits, &[]);

    assert_eq!(merged.len(), 3);
    assert!(merged[2].listing.price().is_none());
    assert!(merged[0].canonical_id() < merged[1].canonical_id());
    assert!(merged.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn higher_similarity_ranks_first_and_scores_follow_alpha() {
    let agg = Aggregator::new(AggregatorConfig::default().with_alpha(1.0)).unwrap();
    let merged = agg.merge(
        [
            hit(record(SourceId::autotrader(), "low", None), 0.2),
            hit(record(SourceId::autotrader(), "high", None), 0.9),
        ],
        &[],
    );
    assert_eq!(merged[0].score, 0.9);
    assert_eq!(merged[1].score, 0.2);
}

#[test]
fn latest_scrape_observation_wins() {
    let older = ListingRecord::builder(
        SourceId::cars_com(),
        "https://www.example.com/vehicle/c9",
        "2019 Honda Civic",
    )
    .with_price(Some(Price::from_dollars(20_000)))
    .with_observed_at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    .build()
    .unwrap();
    let newer = ListingRecord::builder(
        SourceId::cars_com(),
        "https://www.example.com/vehicle/c9?utm_source=feed",
        "2019 Honda Civic",
    )
    .with_price(Some(Price::from_dollars(19_000)))
    .with_observed_at(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap())
    .build()
    .unwrap();
    assert_eq!(older.canonical_id(), newer.canonical_id());

    let merged = aggregator().merge(
        Vec::<IndexHit>::new(),
        &[
            scraped(0, SourceId::cars_com(), vec![newer]),
            scraped(1, SourceId::cars_com(), vec![older]),
        ],
    );
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].listing.price(), Some(Price::from_dollars(19_000)));
    assert_eq!(merged[0].provenance, Provenance::Scrape);
}

#[test]
fn same_vehicle_on_two_sources_stays_distinct() {
    let merged = aggregator().merge(
        Vec::<IndexHit>::new(),
        &[
            scraped(0, SourceId::autotrader(), vec![record(SourceId::autotrader(), "v", None)]),
            scraped(1, SourceId::cars_com(), vec![record(SourceId::cars_com(), "v", None)]),
        ],
    );
    assert_eq!(merged.len(), 2);
}

#[test]
fn records_without_canonical_id_are_dropped() {
    let good = record(SourceId::autotrader(), "ok", None);
    let mut value = serde_json::to_value(&good).unwrap();
    value["canonical_id"] = serde_json::Value::String(String::new());
    let broken: ListingRecord = serde_json::from_value(value).unwrap();

    let merged = aggregator().merge(
        Vec::<IndexHit>::new(),
        &[scraped(0, SourceId::autotrader(), vec![broken, good])],
    );
    assert_eq!(merged.len(), 1);
    assert!(!merged[0].canonical_id().is_empty());
}

#[test]
fn max_results_truncates() {
    let agg = Aggregator::new(AggregatorConfig::default().with_max_results(2))
        .unwrap()
        .with_reference(civic());
    let listings = (0..5)
        .map(|i| record(SourceId::cars_com(), &format!("n{i}"), Some(10_000)))
        .collect();
    let merged: Vec<RankedResult> =
        agg.merge(Vec::<IndexHit>::new(), &[scraped(0, SourceId::cars_com(), listings)]);
    assert_eq!(merged.len(), 2);
    // earlier positions in the source response are more relevant
    assert!(merged[0].relevance > merged[1].relevance);
}

#[test]
fn failed_tasks_contribute_nothing() {
    let merged = aggregator().merge(
        Vec::<IndexHit>::new(),
        &[failed(0, SourceId::autotrader(), FailureKind::Cancelled)],
    );
    assert!(merged.is_empty());
}
