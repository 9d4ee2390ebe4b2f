//! Marketplace source adapters.
//!
//! Every marketplace is reached through the same [`SourceAdapter`] capability:
//! "fetch listings for this query". The reference adapters are composed of
//! three replaceable parts:
//!
//! * a [`SearchUrlBuilder`] that shapes a [`query::SearchQuery`] into the
//!   marketplace's search URL ([`AutoTraderUrls`], [`CarsComUrls`]),
//! * a [`PageFetcher`] that moves bytes ([`HttpFetcher`] over `reqwest`) and
//!   classifies HTTP statuses (429 is [`SourceError::RateLimited`], any other
//!   non-success is [`SourceError::Network`]),
//! * a [`ListingParser`] that turns the body into
//!   [`listing::ListingRecord`]s ([`HtmlListingParser`] with per-site
//!   [`SelectorSet`] presets).
//!
//! ```no_run
//! use sources::SourcesConfig;
//!
//! # fn main() -> Result<(), sources::SourceError> {
//! let registry = SourcesConfig::default().build_registry()?;
//! assert_eq!(registry.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! Adapters are stateless with respect to the orchestrator: retries, timeouts
//! and rate limiting all happen one layer up.

mod adapter;
mod config;
mod error;
mod fetch;
mod marketplaces;
mod parse;

#[doc(hidden)]
pub mod testing;

pub use crate::adapter::{AdapterRegistry, MarketplaceAdapter, SearchUrlBuilder, SourceAdapter};
pub use crate::config::{SourceSettings, SourcesConfig};
pub use crate::error::SourceError;
pub use crate::fetch::{FetchedPage, FetcherConfig, HttpFetcher, PageFetcher};
pub use crate::marketplaces::{
    autotrader, autotrader_with_parser, cars_com, cars_com_with_parser, AutoTraderUrls,
    CarsComUrls, MarketplaceOptions,
};
pub use crate::parse::{attributes_from_title, HtmlListingParser, ListingParser, SelectorSet};
