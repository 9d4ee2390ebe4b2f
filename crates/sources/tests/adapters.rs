use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use listing::{ListingRecord, Price, SourceId, VehicleAttributes};
use query::{synthesize, SearchQuery, SynthesizerConfig};
use sources::testing::{CannedAdapter, CannedResponse, ConcurrencyProbe, ScriptedFetcher};
use sources::{
    cars_com, AdapterRegistry, MarketplaceOptions, SourceAdapter, SourceError, SourcesConfig,
};

const CARS_COM_PAGE: &str = r#"
<html><body>
  <div class="vehicle-card">
    <a href="/vehicledetail/abc-123/"><h2 class="title">2019 Honda Civic Sport</h2></a>
    <span class="primary-price">$18,400</span>
    <div class="mileage">41K mi.</div>
    <div class="miles-from">Brooklyn, NY (4 mi.)</div>
  </div>
  <div class="vehicle-card">
    <a href="/vehicledetail/def-456/"><h2 class="title">2020 Honda Civic LX</h2></a>
    <span class="primary-price">Not Priced</span>
  </div>
</body></html>
"#;

fn keyword_query() -> SearchQuery {
    let attrs = VehicleAttributes::new()
        .with_make("Honda")
        .with_model("Civic")
        .with_year(2019);
    synthesize(
        &attrs,
        &BTreeSet::from([SourceId::cars_com()]),
        &SynthesizerConfig::default(),
    )
    .unwrap()
    .remove(0)
}

#[tokio::test]
async fn cars_com_adapter_fetches_and_parses() {
    let fetcher = Arc::new(ScriptedFetcher::new([(200, CARS_COM_PAGE.to_string())]));
    let adapter = cars_com(MarketplaceOptions::cars_com(), fetcher.clone()).unwrap();

    let listings = adapter.fetch(&keyword_query()).await.unwrap();
    assert_eq!(listings.len(), 2);
    assert_eq!(listings[0].source(), &SourceId::cars_com());
    assert_eq!(listings[0].price(), Some(Price::from_dollars(18_400)));
    assert_eq!(listings[0].mileage(), Some(41_000));
    assert_eq!(listings[0].url(), "https://www.cars.com/vehicledetail/abc-123");
    assert_eq!(listings[1].price(), None);

    let requested = fetcher.requested();
    assert_eq!(requested.len(), 1);
    assert!(requested[0].as_str().starts_with("https://www.cars.com/shopping/results/"));
}

#[tokio::test]
async fn http_statuses_are_classified() {
    let fetcher = Arc::new(ScriptedFetcher::new([
        (429, String::new()),
        (500, String::new()),
        (200, CARS_COM_PAGE.to_string()),
    ]));
    let adapter = cars_com(MarketplaceOptions::cars_com(), fetcher).unwrap();
    let query = keyword_query();

    assert!(matches!(
        adapter.fetch(&query).await,
        Err(SourceError::RateLimited(_))
    ));
    assert!(matches!(
        adapter.fetch(&query).await,
        Err(SourceError::Network(_))
    ));
    assert_eq!(adapter.fetch(&query).await.unwrap().len(), 2);
}

#[tokio::test]
async fn empty_success_body_is_a_parse_failure() {
    let fetcher = Arc::new(ScriptedFetcher::new([(200, String::new())]));
    let adapter = cars_com(MarketplaceOptions::cars_com(), fetcher).unwrap();
    let err = adapter.fetch(&keyword_query()).await.unwrap_err();
    assert!(matches!(err, SourceError::Parse(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn registry_from_config_uses_injected_fetcher() {
    let fetcher = Arc::new(ScriptedFetcher::new([(200, CARS_COM_PAGE.to_string())]));
    let registry = SourcesConfig::default()
        .build_registry_with(fetcher.clone())
        .unwrap();
    let adapter = registry.get(&SourceId::cars_com()).unwrap();
    assert_eq!(adapter.fetch(&keyword_query()).await.unwrap().len(), 2);
    assert_eq!(fetcher.requested().len(), 1);
}

fn listing(url: &str) -> ListingRecord {
    ListingRecord::builder(SourceId::autotrader(), url, "2019 Honda Civic")
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn canned_adapter_follows_script_then_fallback() {
    let adapter = CannedAdapter::listings(
        SourceId::autotrader(),
        vec![listing("https://www.autotrader.com/a")],
    )
    .with_script([CannedResponse::Error(SourceError::Timeout("slow".into()))])
    .with_delay(Duration::from_millis(50));
    let query = keyword_query();

    assert!(matches!(
        adapter.fetch(&query).await,
        Err(SourceError::Timeout(_))
    ));
    assert_eq!(adapter.fetch(&query).await.unwrap().len(), 1);
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn probe_records_peak_concurrency() {
    let probe = ConcurrencyProbe::new();
    let adapter: Arc<dyn SourceAdapter> = Arc::new(
        CannedAdapter::listings(SourceId::autotrader(), Vec::new())
            .with_delay(Duration::from_millis(10))
            .with_probe(probe.clone()),
    );
    let registry = AdapterRegistry::new().with(adapter);
    let adapter = registry.get(&SourceId::autotrader()).unwrap();
    let query = keyword_query();

    let (a, b, c) = tokio::join!(
        adapter.fetch(&query),
        adapter.fetch(&query),
        adapter.fetch(&query)
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(probe.peak(), 3);
    assert_eq!(probe.current(), 0);
}

#[tokio::test(start_paused = true)]
async fn hanging_adapter_never_answers() {
    let adapter = CannedAdapter::hanging(SourceId::cars_com());
    let outcome =
        tokio::time::timeout(Duration::from_secs(5), adapter.fetch(&keyword_query())).await;
    assert!(outcome.is_err());
}
