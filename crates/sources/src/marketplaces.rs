//! Reference marketplaces: AutoTrader (code-list dialect) and Cars.com
//! (keyword dialect).

use std::sync::Arc;

use listing::SourceId;
use query::{terms, SearchQuery};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::adapter::{MarketplaceAdapter, SearchUrlBuilder};
use crate::error::SourceError;
use crate::fetch::PageFetcher;
use crate::parse::{HtmlListingParser, ListingParser, SelectorSet};

/// Location and paging knobs common to both marketplaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceOptions {
    pub base_url: String,
    #[serde(default = "MarketplaceOptions::default_zip")]
    pub zip: String,
    #[serde(default = "MarketplaceOptions::default_radius_miles")]
    pub radius_miles: u32,
    pub page_size: u32,
}

impl MarketplaceOptions {
    fn default_zip() -> String {
        "10001".to_string()
    }

    fn default_radius_miles() -> u32 {
        50
    }

    pub fn autotrader() -> Self {
        Self {
            base_url: "https://www.autotrader.com".into(),
            zip: Self::default_zip(),
            radius_miles: Self::default_radius_miles(),
            page_size: 25,
        }
    }

    pub fn cars_com() -> Self {
        Self {
            base_url: "https://www.cars.com".into(),
            zip: Self::default_zip(),
            radius_miles: Self::default_radius_miles(),
            page_size: 20,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(path))
            .map_err(|e| SourceError::Parse(format!("invalid base url '{}': {e}", self.base_url)))
    }
}

fn first_term<'a>(query: &'a SearchQuery, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| query.term(key))
}

/// `/cars-for-sale/all-cars?makeCodeList=HONDA&modelCodeList=CIVIC&startYear=…`
pub struct AutoTraderUrls {
    options: MarketplaceOptions,
}

impl AutoTraderUrls {
    pub fn new(options: MarketplaceOptions) -> Self {
        Self { options }
    }
}

impl SearchUrlBuilder for AutoTraderUrls {
    fn search_url(&self, query: &SearchQuery) -> Result<Url, SourceError> {
        let mut url = self.options.endpoint("/cars-for-sale/all-cars")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("listingTypes", "used,new");
            if let Some(make) = first_term(query, &[terms::MAKE_CODE, terms::MAKE]) {
                pairs.append_pair("makeCodeList", &make.to_ascii_uppercase());
            }
            if let Some(model) = first_term(query, &[terms::MODEL_CODE, terms::MODEL]) {
                pairs.append_pair("modelCodeList", &model.to_ascii_uppercase());
            }
            let start = first_term(query, &[terms::START_YEAR, terms::YEAR]);
            let end = first_term(query, &[terms::END_YEAR, terms::YEAR]);
            if let (Some(start), Some(end)) = (start, end) {
                pairs.append_pair("startYear", start);
                pairs.append_pair("endYear", end);
            }
            pairs.append_pair("zip", &self.options.zip);
            pairs.append_pair("searchRadius", &self.options.radius_miles.to_string());
            pairs.append_pair("sortBy", "relevance");
            pairs.append_pair("numRecords", &self.options.page_size.to_string());
        }
        Ok(url)
    }
}

/// `/shopping/results/?makes[]=honda&models[]=honda-civic&year_min=…`
pub struct CarsComUrls {
    options: MarketplaceOptions,
}

impl CarsComUrls {
    pub fn new(options: MarketplaceOptions) -> Self {
        Self { options }
    }
}

impl SearchUrlBuilder for CarsComUrls {
    fn search_url(&self, query: &SearchQuery) -> Result<Url, SourceError> {
        let mut url = self.options.endpoint("/shopping/results/")?;
        {
            let mut pairs = url.query_pairs_mut();
            let make = first_term(query, &[terms::MAKE, terms::MAKE_CODE])
                .map(|m| m.to_ascii_lowercase());
            if let Some(make) = &make {
                pairs.append_pair("makes[]", make);
            }
            if let (Some(make), Some(model)) =
                (&make, first_term(query, &[terms::MODEL, terms::MODEL_CODE]))
            {
                let model = model.to_ascii_lowercase().replace('_', "-");
                pairs.append_pair("models[]", &format!("{make}-{model}"));
            }
            let min = first_term(query, &[terms::YEAR, terms::START_YEAR]);
            let max = first_term(query, &[terms::YEAR, terms::END_YEAR]);
            if let (Some(min), Some(max)) = (min, max) {
                pairs.append_pair("year_min", min);
                pairs.append_pair("year_max", max);
            }
            pairs.append_pair("maximum_distance", &self.options.radius_miles.to_string());
            pairs.append_pair("page_size", &self.options.page_size.to_string());
            pairs.append_pair("sort", "best_match_desc");
            pairs.append_pair("stock_type", "all");
            pairs.append_pair("zip", &self.options.zip);
        }
        Ok(url)
    }
}

/// AutoTrader adapter with the default HTML parser.
pub fn autotrader(
    options: MarketplaceOptions,
    fetcher: Arc<dyn PageFetcher>,
) -> Result<MarketplaceAdapter, SourceError> {
    let parser: Arc<dyn ListingParser> =
        Arc::new(HtmlListingParser::new(&SelectorSet::autotrader())?);
    Ok(autotrader_with_parser(options, fetcher, parser))
}

pub fn autotrader_with_parser(
    options: MarketplaceOptions,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn ListingParser>,
) -> MarketplaceAdapter {
    MarketplaceAdapter::new(
        SourceId::autotrader(),
        Box::new(AutoTraderUrls::new(options)),
        fetcher,
        parser,
    )
}

/// Cars.com adapter with the default HTML parser.
pub fn cars_com(
    options: MarketplaceOptions,
    fetcher: Arc<dyn PageFetcher>,
) -> Result<MarketplaceAdapter, SourceError> {
    let parser: Arc<dyn ListingParser> = Arc::new(HtmlListingParser::new(&SelectorSet::cars_com())?);
    Ok(cars_com_with_parser(options, fetcher, parser))
}

pub fn cars_com_with_parser(
    options: MarketplaceOptions,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn ListingParser>,
) -> MarketplaceAdapter {
    MarketplaceAdapter::new(
        SourceId::cars_com(),
        Box::new(CarsComUrls::new(options)),
        fetcher,
        parser,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use listing::VehicleAttributes;
    use query::{synthesize, SynthesizerConfig};

    use super::*;

    fn queries() -> Vec<SearchQuery> {
        let attrs = VehicleAttributes::new()
            .with_make("Honda")
            .with_model("Civic")
            .with_year(2019);
        synthesize(
            &attrs,
            &BTreeSet::from([SourceId::autotrader(), SourceId::cars_com()]),
            &SynthesizerConfig::default(),
        )
        .unwrap()
    }

    fn params(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn autotrader_url_uses_codes_and_year_window() {
        let url = AutoTraderUrls::new(MarketplaceOptions::autotrader())
            .search_url(&queries()[0])
            .unwrap();
        assert_eq!(url.path(), "/cars-for-sale/all-cars");
        let p = params(&url);
        assert_eq!(p["makeCodeList"], "HONDA");
        assert_eq!(p["modelCodeList"], "CIVIC");
        assert_eq!(p["startYear"], "2017");
        assert_eq!(p["endYear"], "2021");
        assert_eq!(p["numRecords"], "25");
    }

    #[test]
    fn cars_com_url_uses_slugs_and_exact_year() {
        let url = CarsComUrls::new(MarketplaceOptions::cars_com())
            .search_url(&queries()[1])
            .unwrap();
        assert_eq!(url.path(), "/shopping/results/");
        let p = params(&url);
        assert_eq!(p["makes[]"], "honda");
        assert_eq!(p["models[]"], "honda-civic");
        assert_eq!(p["year_min"], "2019");
        assert_eq!(p["year_max"], "2019");
        assert_eq!(p["page_size"], "20");
    }

    #[test]
    fn builders_fall_back_across_dialects() {
        // a keyword query routed to AutoTrader still yields codes
        let url = AutoTraderUrls::new(MarketplaceOptions::autotrader())
            .search_url(&queries()[1])
            .unwrap();
        let p = params(&url);
        assert_eq!(p["makeCodeList"], "HONDA");
        assert_eq!(p["startYear"], "2019");
    }

    #[test]
    fn bad_base_url_is_reported() {
        let mut options = MarketplaceOptions::cars_com();
        options.base_url = "not a url".into();
        let err = CarsComUrls::new(options).search_url(&queries()[1]).unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }
}
