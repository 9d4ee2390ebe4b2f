use listing::{parse_mileage, ListingRecord, Price, SourceId, VehicleAttributes};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;
use crate::fetch::FetchedPage;

/// Turns a fetched marketplace page into listing records.
pub trait ListingParser: Send + Sync {
    fn parse(&self, source: &SourceId, page: &FetchedPage) -> Result<Vec<ListingRecord>, SourceError>;
}

/// CSS selectors locating listing cards and their fields.
///
/// Field selectors are evaluated inside each card; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub card: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub mileage: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl SelectorSet {
    pub fn autotrader() -> Self {
        Self {
            card: r#"div[class*="listing-item"], div[class*="inventory-listing"]"#.into(),
            title: r#"h3, a[class*="title"], a[class*="heading"]"#.into(),
            link: "a[href]".into(),
            price: Some(r#"[class*="price"]"#.into()),
            mileage: Some(r#"[class*="mileage"]"#.into()),
            location: Some(r#"[class*="location"], [class*="dealer"]"#.into()),
            image: Some("img[src]".into()),
        }
    }

    pub fn cars_com() -> Self {
        Self {
            card: r#"div[class*="vehicle-card"]"#.into(),
            title: r#"h2, a[class*="title"]"#.into(),
            link: "a[href]".into(),
            price: Some(r#"[class*="primary-price"], [class*="price"]"#.into()),
            mileage: Some(r#"[class*="mileage"]"#.into()),
            location: Some(r#"[class*="miles-from"], [class*="dealer-name"]"#.into()),
            image: Some("img[src]".into()),
        }
    }
}

struct Compiled {
    card: Selector,
    title: Selector,
    link: Selector,
    price: Option<Selector>,
    mileage: Option<Selector>,
    location: Option<Selector>,
    image: Option<Selector>,
}

fn compile(raw: &str) -> Result<Selector, SourceError> {
    Selector::parse(raw).map_err(|e| SourceError::Parse(format!("invalid selector '{raw}': {e}")))
}

fn compile_opt(raw: &Option<String>) -> Result<Option<Selector>, SourceError> {
    raw.as_deref().map(compile).transpose()
}

/// Selector-driven HTML parser; the reference adapters use one preset each.
pub struct HtmlListingParser {
    selectors: Compiled,
    max_listings: usize,
}

impl HtmlListingParser {
    pub const DEFAULT_MAX_LISTINGS: usize = 10;

    pub fn new(selectors: &SelectorSet) -> Result<Self, SourceError> {
        Ok(Self {
            selectors: Compiled {
                card: compile(&selectors.card)?,
                title: compile(&selectors.title)?,
                link: compile(&selectors.link)?,
                price: compile_opt(&selectors.price)?,
                mileage: compile_opt(&selectors.mileage)?,
                location: compile_opt(&selectors.location)?,
                image: compile_opt(&selectors.image)?,
            },
            max_listings: Self::DEFAULT_MAX_LISTINGS,
        })
    }

    pub fn with_max_listings(mut self, max: usize) -> Self {
        self.max_listings = max;
        self
    }

    fn parse_card(
        &self,
        source: &SourceId,
        page: &FetchedPage,
        card: ElementRef<'_>,
    ) -> Option<ListingRecord> {
        let title = first_text(card, &self.selectors.title)?;
        let href = card
            .select(&self.selectors.link)
            .find_map(|a| a.value().attr("href"))?;
        let link = page.url.join(href).ok()?;

        let price = self
            .selectors
            .price
            .as_ref()
            .and_then(|sel| first_text(card, sel))
            .and_then(|text| Price::parse(&text.replace(' ', "")));
        let mileage = self
            .selectors
            .mileage
            .as_ref()
            .and_then(|sel| first_text(card, sel))
            .and_then(|text| parse_mileage(&text));
        let location = self
            .selectors
            .location
            .as_ref()
            .and_then(|sel| first_text(card, sel));
        let image = self.selectors.image.as_ref().and_then(|sel| {
            card.select(sel)
                .find_map(|img| img.value().attr("src"))
                .and_then(|src| page.url.join(src).ok())
        });

        let mut builder = ListingRecord::builder(source.clone(), link.as_str(), title.clone())
            .with_price(price)
            .with_mileage(mileage)
            .with_attributes(attributes_from_title(&title));
        if let Some(location) = location {
            builder = builder.with_location(location);
        }
        if let Some(image) = image {
            builder = builder.with_image_url(image.as_str());
        }

        match builder.build() {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(source = %source, error = %err, "skipping unparseable listing card");
                None
            }
        }
    }
}

impl ListingParser for HtmlListingParser {
    fn parse(&self, source: &SourceId, page: &FetchedPage) -> Result<Vec<ListingRecord>, SourceError> {
        if page.body.trim().is_empty() {
            return Err(SourceError::Parse(format!("empty body from {}", page.url)));
        }
        let document = Html::parse_document(&page.body);
        let records: Vec<ListingRecord> = document
            .select(&self.selectors.card)
            .filter_map(|card| self.parse_card(source, page, card))
            .take(self.max_listings)
            .collect();
        debug!(source = %source, listings = records.len(), "parsed marketplace page");
        Ok(records)
    }
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).find_map(|el| {
        let text = el.text().collect::<Vec<_>>().join(" ");
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!collapsed.is_empty()).then_some(collapsed)
    })
}

const CONDITION_WORDS: &[&str] = &["used", "new", "certified", "pre-owned", "cpo"];

/// Best-effort year/make/model from a title like `Used 2019 Honda Civic LX`.
pub fn attributes_from_title(title: &str) -> VehicleAttributes {
    let mut words = title
        .split_whitespace()
        .filter(|w| !CONDITION_WORDS.contains(&w.to_ascii_lowercase().as_str()))
        .peekable();

    let mut attrs = VehicleAttributes::new();
    if let Some(year) = words
        .peek()
        .and_then(|w| w.parse::<u16>().ok())
        .filter(|y| (1900..=2100).contains(y))
    {
        attrs = attrs.with_year(year);
        words.next();
    }
    if let Some(make) = words.next() {
        attrs = attrs.with_make(make);
    }
    if let Some(model) = words.next() {
        attrs = attrs.with_model(model);
    }
    attrs.normalized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    const AUTOTRADER_PAGE: &str = r#"
        <html><body>
          <div class="inventory-listing">
            <h3>Used 2019 Honda Civic LX</h3>
            <a href="/cars-for-sale/vehicle/700123?listingRef=x">details</a>
            <span class="first-price">$17,250</span>
            <div class="item-card-mileage">32,100 miles</div>
            <div class="dealer-location">Springfield, IL</div>
            <img src="https://images.example.com/civic.jpg">
          </div>
          <div class="inventory-listing">
            <h3>2018 Honda Civic EX</h3>
            <a href="https://www.autotrader.com/cars-for-sale/vehicle/700456">details</a>
          </div>
          <div class="inventory-listing"><p>sponsored</p></div>
        </body></html>
    "#;

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: Url::parse("https://www.autotrader.com/cars-for-sale/all-cars?makeCodeList=HONDA")
                .unwrap(),
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn parses_cards_and_skips_incomplete_ones() {
        let parser = HtmlListingParser::new(&SelectorSet::autotrader()).unwrap();
        let records = parser
            .parse(&SourceId::autotrader(), &page(AUTOTRADER_PAGE))
            .unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.title(), "Used 2019 Honda Civic LX");
        assert_eq!(first.price(), Some(Price::from_dollars(17_250)));
        assert_eq!(first.mileage(), Some(32_100));
        assert_eq!(first.location(), Some("Springfield, IL"));
        assert_eq!(
            first.url(),
            "https://www.autotrader.com/cars-for-sale/vehicle/700123?listingRef=x"
        );
        assert_eq!(first.attributes().year, Some(2019));
        assert_eq!(first.attributes().make.as_deref(), Some("Honda"));
        assert_eq!(first.attributes().model.as_deref(), Some("Civic"));

        assert_eq!(records[1].price(), None);
    }

    #[test]
    fn respects_max_listings() {
        let parser = HtmlListingParser::new(&SelectorSet::autotrader())
            .unwrap()
            .with_max_listings(1);
        let records = parser
            .parse(&SourceId::autotrader(), &page(AUTOTRADER_PAGE))
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn empty_body_is_a_parse_error() {
        let parser = HtmlListingParser::new(&SelectorSet::cars_com()).unwrap();
        let err = parser.parse(&SourceId::cars_com(), &page("  ")).unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[test]
    fn page_without_cards_yields_nothing() {
        let parser = HtmlListingParser::new(&SelectorSet::cars_com()).unwrap();
        let records = parser
            .parse(&SourceId::cars_com(), &page("<html><body>No results</body></html>"))
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let mut selectors = SelectorSet::cars_com();
        selectors.card = "div[".into();
        assert!(matches!(
            HtmlListingParser::new(&selectors),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn title_attribute_inference() {
        let attrs = attributes_from_title("Certified 2021 Toyota Camry SE");
        assert_eq!(attrs.year, Some(2021));
        assert_eq!(attrs.make.as_deref(), Some("Toyota"));
        assert_eq!(attrs.model.as_deref(), Some("Camry"));

        let attrs = attributes_from_title("Ford F-150");
        assert_eq!(attrs.year, None);
        assert_eq!(attrs.model.as_deref(), Some("F-150"));

        assert!(attributes_from_title("").is_empty());
    }
}
