use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use listing::{ListingRecord, SourceId};
use query::SearchQuery;
use tracing::debug;
use url::Url;

use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::parse::ListingParser;

/// Uniform "fetch listings for query Q" capability of one marketplace.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> &SourceId;

    async fn fetch(&self, query: &SearchQuery) -> Result<Vec<ListingRecord>, SourceError>;
}

/// Shapes a [`SearchQuery`] into the marketplace's search URL.
pub trait SearchUrlBuilder: Send + Sync {
    fn search_url(&self, query: &SearchQuery) -> Result<Url, SourceError>;
}

/// Adapter made of a URL builder, a fetcher and a parser.
///
/// Status classification happens in the fetcher; body interpretation is
/// entirely the parser's job.
pub struct MarketplaceAdapter {
    source: SourceId,
    urls: Box<dyn SearchUrlBuilder>,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn ListingParser>,
}

impl MarketplaceAdapter {
    pub fn new(
        source: SourceId,
        urls: Box<dyn SearchUrlBuilder>,
        fetcher: Arc<dyn PageFetcher>,
        parser: Arc<dyn ListingParser>,
    ) -> Self {
        Self {
            source,
            urls,
            fetcher,
            parser,
        }
    }

    pub fn search_url(&self, query: &SearchQuery) -> Result<Url, SourceError> {
        self.urls.search_url(query)
    }
}

#[async_trait]
impl SourceAdapter for MarketplaceAdapter {
    fn source(&self) -> &SourceId {
        &self.source
    }

    async fn fetch(&self, query: &SearchQuery) -> Result<Vec<ListingRecord>, SourceError> {
        let url = self.urls.search_url(query)?;
        debug!(source = %self.source, url = %url, "fetching marketplace page");
        let page = self.fetcher.fetch(&url).await?;
        self.parser.parse(&self.source, &page)
    }
}

/// Adapters keyed by the source they serve.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<SourceId, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under its own source id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source().clone(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, source: &SourceId) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(source).cloned()
    }

    pub fn contains(&self, source: &SourceId) -> bool {
        self.adapters.contains_key(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.adapters.keys()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("sources", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
