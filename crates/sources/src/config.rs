use std::collections::BTreeSet;
use std::sync::Arc;

use listing::SourceId;
use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterRegistry, SourceAdapter};
use crate::error::SourceError;
use crate::fetch::{FetcherConfig, HttpFetcher, PageFetcher};
use crate::marketplaces::{self, MarketplaceOptions};
use crate::parse::{HtmlListingParser, ListingParser, SelectorSet};

/// Per-marketplace settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Location and paging; the marketplace preset when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<MarketplaceOptions>,
    /// Overrides the built-in selector preset.
    #[serde(default)]
    pub selectors: Option<SelectorSet>,
    #[serde(default = "default_max_listings")]
    pub max_listings: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_max_listings() -> usize {
    HtmlListingParser::DEFAULT_MAX_LISTINGS
}

impl SourceSettings {
    pub fn new(options: MarketplaceOptions) -> Self {
        Self {
            enabled: true,
            options: Some(options),
            selectors: None,
            max_listings: default_max_listings(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Configured options, or `preset` when none were given.
    pub fn options_or(&self, preset: MarketplaceOptions) -> MarketplaceOptions {
        self.options.clone().unwrap_or(preset)
    }

    fn parser(&self, preset: SelectorSet) -> Result<Arc<dyn ListingParser>, SourceError> {
        let selectors = self.selectors.clone().unwrap_or(preset);
        Ok(Arc::new(
            HtmlListingParser::new(&selectors)?.with_max_listings(self.max_listings),
        ))
    }
}

/// Settings for every built-in marketplace plus the shared HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default = "SourcesConfig::default_autotrader")]
    pub autotrader: SourceSettings,
    #[serde(default = "SourcesConfig::default_cars_com")]
    pub cars_com: SourceSettings,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            autotrader: Self::default_autotrader(),
            cars_com: Self::default_cars_com(),
        }
    }
}

impl SourcesConfig {
    fn default_autotrader() -> SourceSettings {
        SourceSettings::new(MarketplaceOptions::autotrader())
    }

    fn default_cars_com() -> SourceSettings {
        SourceSettings::new(MarketplaceOptions::cars_com())
    }

    fn entries(&self) -> [(SourceId, &SourceSettings); 2] {
        [
            (SourceId::autotrader(), &self.autotrader),
            (SourceId::cars_com(), &self.cars_com),
        ]
    }

    /// Every built-in source, enabled or not.
    pub fn known_sources(&self) -> BTreeSet<SourceId> {
        self.entries().into_iter().map(|(id, _)| id).collect()
    }

    pub fn enabled_sources(&self) -> BTreeSet<SourceId> {
        self.entries()
            .into_iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(id, _)| id)
            .collect()
    }

    /// Sources with `enabled: false`; no request override can switch them on.
    pub fn disabled_sources(&self) -> BTreeSet<SourceId> {
        self.entries()
            .into_iter()
            .filter(|(_, settings)| !settings.enabled)
            .map(|(id, _)| id)
            .collect()
    }

    /// Registry with an adapter for every known source over a shared client.
    ///
    /// Disabled sources are registered too so they can be listed; the search
    /// pipeline keeps them out of every scrape.
    pub fn build_registry(&self) -> Result<AdapterRegistry, SourceError> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&self.fetcher)?);
        self.build_registry_with(fetcher)
    }

    /// Same as [`build_registry`](Self::build_registry) over a caller-supplied fetcher.
    pub fn build_registry_with(
        &self,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Result<AdapterRegistry, SourceError> {
        let autotrader: Arc<dyn SourceAdapter> = Arc::new(marketplaces::autotrader_with_parser(
            self.autotrader.options_or(MarketplaceOptions::autotrader()),
            Arc::clone(&fetcher),
            self.autotrader.parser(SelectorSet::autotrader())?,
        ));
        let cars_com: Arc<dyn SourceAdapter> = Arc::new(marketplaces::cars_com_with_parser(
            self.cars_com.options_or(MarketplaceOptions::cars_com()),
            fetcher,
            self.cars_com.parser(SelectorSet::cars_com())?,
        ));
        Ok(AdapterRegistry::new().with(autotrader).with(cars_com))
    }
}
