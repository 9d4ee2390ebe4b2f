use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ListingError;
use crate::identity::{canonical_id, normalize_url};
use crate::price::Price;

/// Lower-case identifier of a marketplace source (e.g. `autotrader`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub const AUTOTRADER: &'static str = "autotrader";
    pub const CARS_COM: &'static str = "cars_com";

    /// Validate and lower-case a source identifier.
    ///
    /// Allowed characters are ASCII alphanumerics, `_` and `-`.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ListingError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ListingError::EmptySource);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ListingError::InvalidSource(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn autotrader() -> Self {
        Self(Self::AUTOTRADER.to_string())
    }

    pub fn cars_com() -> Self {
        Self(Self::CARS_COM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SourceId {
    type Error = ListingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SourceId::new(value)
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0
    }
}

impl std::str::FromStr for SourceId {
    type Err = ListingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceId::new(s)
    }
}

/// Immutable embedding produced by the recognizer or stored with a listing.
///
/// Cloning is cheap; the values are shared behind an `Arc`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct EmbeddingVector(Arc<[f32]>);

impl EmbeddingVector {
    /// Wrap a vector, rejecting empty input and non-finite components.
    pub fn new(values: Vec<f32>) -> Result<Self, ListingError> {
        if values.is_empty() {
            return Err(ListingError::EmptyEmbedding);
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(ListingError::NonFiniteEmbedding(pos));
        }
        Ok(Self(values.into()))
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

impl fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimension", &self.0.len())
            .finish()
    }
}

impl TryFrom<Vec<f32>> for EmbeddingVector {
    type Error = ListingError;

    fn try_from(value: Vec<f32>) -> Result<Self, Self::Error> {
        EmbeddingVector::new(value)
    }
}

impl From<EmbeddingVector> for Vec<f32> {
    fn from(value: EmbeddingVector) -> Self {
        value.0.to_vec()
    }
}

impl AsRef<[f32]> for EmbeddingVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Vehicle description supplied by the recognizer or parsed from a listing.
///
/// Every field is optional. Blank strings and the `"Unknown"` sentinel are
/// treated as absent by [`VehicleAttributes::normalized`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleAttributes {
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub body_type: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

const UNKNOWN_SENTINEL: &str = "unknown";

fn clean(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN_SENTINEL) {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl VehicleAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_make(mut self, make: impl Into<String>) -> Self {
        self.make = Some(make.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_body_type(mut self, body_type: impl Into<String>) -> Self {
        self.body_type = Some(body_type.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Trim every field and drop blanks, `"Unknown"` and a zero year.
    pub fn normalized(self) -> Self {
        Self {
            make: clean(self.make),
            model: clean(self.model),
            year: self.year.filter(|y| *y > 0),
            body_type: clean(self.body_type),
            color: clean(self.color),
        }
    }

    /// True when no usable attribute remains after normalization.
    pub fn is_empty(&self) -> bool {
        let n = self.clone().normalized();
        n.make.is_none()
            && n.model.is_none()
            && n.year.is_none()
            && n.body_type.is_none()
            && n.color.is_none()
    }

    /// Human-readable summary such as `2019 Honda Civic`.
    pub fn summary(&self) -> String {
        let n = self.clone().normalized();
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if let Some(year) = n.year {
            parts.push(year.to_string());
        }
        parts.extend(n.make);
        parts.extend(n.model);
        parts.join(" ")
    }
}

/// A single marketplace listing.
///
/// Records are immutable once built. A fresher observation of the same
/// listing is a new record carrying the same `canonical_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    canonical_id: String,
    source: SourceId,
    title: String,
    price: Option<Price>,
    url: String,
    attributes: VehicleAttributes,
    embedding: Option<EmbeddingVector>,
    mileage: Option<u32>,
    location: Option<String>,
    image_url: Option<String>,
    observed_at: DateTime<Utc>,
}

impl ListingRecord {
    pub fn builder(
        source: SourceId,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> ListingRecordBuilder {
        ListingRecordBuilder {
            source,
            url: url.into(),
            title: title.into(),
            price: None,
            attributes: VehicleAttributes::default(),
            embedding: None,
            mileage: None,
            location: None,
            image_url: None,
            observed_at: None,
        }
    }

    pub fn canonical_id(&self) -> &str {
        &self.canonical_id
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn price(&self) -> Option<Price> {
        self.price
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn attributes(&self) -> &VehicleAttributes {
        &self.attributes
    }

    pub fn embedding(&self) -> Option<&EmbeddingVector> {
        self.embedding.as_ref()
    }

    pub fn mileage(&self) -> Option<u32> {
        self.mileage
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Copy of this record carrying `embedding`.
    pub fn with_embedding(&self, embedding: EmbeddingVector) -> Self {
        let mut next = self.clone();
        next.embedding = Some(embedding);
        next
    }

    /// Reconcile this record with a fresher observation of the same listing.
    ///
    /// Presentation fields (price, mileage, location, title, url, attributes,
    /// image) come from `fresh` when it has them; the embedding is kept from
    /// `self` unless `self` has none. The returned record keeps `self`'s
    /// canonical id and takes the later `observed_at` of the two.
    pub fn reconciled_with(&self, fresh: &ListingRecord) -> ListingRecord {
        let attributes = {
            let fresh_attrs = fresh.attributes.clone().normalized();
            let own = self.attributes.clone().normalized();
            VehicleAttributes {
                make: fresh_attrs.make.or(own.make),
                model: fresh_attrs.model.or(own.model),
                year: fresh_attrs.year.or(own.year),
                body_type: fresh_attrs.body_type.or(own.body_type),
                color: fresh_attrs.color.or(own.color),
            }
        };
        let title = if fresh.title.trim().is_empty() {
            self.title.clone()
        } else {
            fresh.title.clone()
        };
        ListingRecord {
            canonical_id: self.canonical_id.clone(),
            source: self.source.clone(),
            title,
            price: fresh.price.or(self.price),
            url: fresh.url.clone(),
            attributes,
            embedding: self.embedding.clone().or_else(|| fresh.embedding.clone()),
            mileage: fresh.mileage.or(self.mileage),
            location: fresh.location.clone().or_else(|| self.location.clone()),
            image_url: fresh.image_url.clone().or_else(|| self.image_url.clone()),
            observed_at: self.observed_at.max(fresh.observed_at),
        }
    }
}

/// Builder for [`ListingRecord`]; `build` normalizes the url and derives the id.
#[derive(Debug, Clone)]
pub struct ListingRecordBuilder {
    source: SourceId,
    url: String,
    title: String,
    price: Option<Price>,
    attributes: VehicleAttributes,
    embedding: Option<EmbeddingVector>,
    mileage: Option<u32>,
    location: Option<String>,
    image_url: Option<String>,
    observed_at: Option<DateTime<Utc>>,
}

impl ListingRecordBuilder {
    pub fn with_price(mut self, price: Option<Price>) -> Self {
        self.price = price;
        self
    }

    pub fn with_attributes(mut self, attributes: VehicleAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_mileage(mut self, mileage: Option<u32>) -> Self {
        self.mileage = mileage;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = Some(observed_at);
        self
    }

    pub fn build(self) -> Result<ListingRecord, ListingError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ListingError::EmptyTitle);
        }
        let url = normalize_url(&self.url)?;
        let canonical_id = canonical_id(&self.source, &url);
        let location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        Ok(ListingRecord {
            canonical_id,
            source: self.source,
            title,
            price: self.price,
            url,
            attributes: self.attributes.normalized(),
            embedding: self.embedding,
            mileage: self.mileage,
            location,
            image_url: self.image_url,
            observed_at: self.observed_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn source_id_is_lowercased_and_validated() {
        assert_eq!(SourceId::new("AutoTrader").unwrap().as_str(), "autotrader");
        assert_eq!(SourceId::new("  "), Err(ListingError::EmptySource));
        assert!(matches!(
            SourceId::new("cars.com"),
            Err(ListingError::InvalidSource(_))
        ));
    }

    #[test]
    fn source_id_serde_is_transparent() {
        let id = SourceId::cars_com();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cars_com\"");
        let back: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<SourceId>("\"\"").is_err());
    }

    #[test]
    fn embedding_rejects_empty_and_nan() {
        assert_eq!(
            EmbeddingVector::new(vec![]).unwrap_err(),
            ListingError::EmptyEmbedding
        );
        assert_eq!(
            EmbeddingVector::new(vec![0.1, f32::NAN]).unwrap_err(),
            ListingError::NonFiniteEmbedding(1)
        );
        let e = EmbeddingVector::new(vec![3.0, 4.0]).unwrap();
        assert_eq!(e.dimension(), 2);
        assert!((e.norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_attributes_are_absent() {
        let attrs = VehicleAttributes::new()
            .with_make("Honda")
            .with_model("Unknown")
            .with_body_type("  ")
            .normalized();
        assert_eq!(attrs.make.as_deref(), Some("Honda"));
        assert!(attrs.model.is_none());
        assert!(attrs.body_type.is_none());

        assert!(VehicleAttributes::new().with_make("UNKNOWN").is_empty());
        assert!(!VehicleAttributes::new().with_year(2019).is_empty());
    }

    #[test]
    fn summary_reads_naturally() {
        let attrs = VehicleAttributes::new()
            .with_make("Honda")
            .with_model("Civic")
            .with_year(2019);
        assert_eq!(attrs.summary(), "2019 Honda Civic");
    }

    #[test]
    fn builder_derives_canonical_id_from_normalized_url() {
        let a = ListingRecord::builder(SourceId::autotrader(), "https://autotrader.com/a/1/", "Civic")
            .build()
            .unwrap();
        let b = ListingRecord::builder(
            SourceId::autotrader(),
            "http://AUTOTRADER.com/a/1?utm_campaign=z",
            "2019 Honda Civic",
        )
        .build()
        .unwrap();
        assert_eq!(a.canonical_id(), b.canonical_id());
        assert!(!a.canonical_id().is_empty());
        assert_eq!(a.url(), "https://autotrader.com/a/1");
    }

    #[test]
    fn builder_rejects_blank_title() {
        let err = ListingRecord::builder(SourceId::autotrader(), "https://a.com/x", " ")
            .build()
            .unwrap_err();
        assert_eq!(err, ListingError::EmptyTitle);
    }

    #[test]
    fn reconcile_prefers_fresh_presentation_fields() {
        let embedding = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        let stored = ListingRecord::builder(SourceId::cars_com(), "https://cars.com/v/9", "Old title")
            .with_price(Some(Price::from_dollars(21_000)))
            .with_mileage(Some(40_000))
            .with_location("Austin, TX")
            .with_embedding(embedding.clone())
            .with_observed_at(at(100))
            .build()
            .unwrap();
        let fresh = ListingRecord::builder(SourceId::cars_com(), "https://cars.com/v/9", "New title")
            .with_price(Some(Price::from_dollars(19_500)))
            .with_observed_at(at(200))
            .build()
            .unwrap();

        let merged = stored.reconciled_with(&fresh);
        assert_eq!(merged.title(), "New title");
        assert_eq!(merged.price(), Some(Price::from_dollars(19_500)));
        assert_eq!(merged.mileage(), Some(40_000));
        assert_eq!(merged.location(), Some("Austin, TX"));
        assert_eq!(merged.embedding(), Some(&embedding));
        assert_eq!(merged.observed_at(), at(200));
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = ListingRecord::builder(SourceId::cars_com(), "https://cars.com/v/1", "Civic")
            .with_price(Price::parse("$15,999"))
            .with_attributes(VehicleAttributes::new().with_make("Honda"))
            .with_observed_at(at(42))
            .build()
            .unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let back: ListingRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
