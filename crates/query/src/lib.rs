//! carfinder query synthesis.
//!
//! Turns recognized [`VehicleAttributes`] plus the set of enabled sources into
//! structured [`SearchQuery`] values, one per [`QueryDialect`].
//!
//! ## Pure function guarantee
//!
//! No I/O, no clock calls, no randomness. Terms live in a `BTreeMap` and
//! target sources in a `BTreeSet`, so identical inputs produce identical
//! (and identically serialized) output.
//!
//! Missing attributes are left out of the query. They are never guessed.

mod config;
mod error;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use listing::{SourceId, VehicleAttributes};
use serde::{Deserialize, Serialize};

pub use crate::config::{QueryDialect, SynthesizerConfig};
pub use crate::error::QueryError;

/// Term keys used in [`SearchQuery::terms`].
pub mod terms {
    pub const MAKE_CODE: &str = "make_code";
    pub const MODEL_CODE: &str = "model_code";
    pub const START_YEAR: &str = "start_year";
    pub const END_YEAR: &str = "end_year";
    pub const MAKE: &str = "make";
    pub const MODEL: &str = "model";
    pub const YEAR: &str = "year";
    pub const BODY_STYLE: &str = "body_style";
}

/// A structured marketplace query shared by every source speaking `dialect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    dialect: QueryDialect,
    terms: BTreeMap<String, String>,
    target_sources: BTreeSet<SourceId>,
}

impl SearchQuery {
    pub fn dialect(&self) -> QueryDialect {
        self.dialect
    }

    pub fn terms(&self) -> &BTreeMap<String, String> {
        &self.terms
    }

    pub fn term(&self, key: &str) -> Option<&str> {
        self.terms.get(key).map(String::as_str)
    }

    pub fn target_sources(&self) -> &BTreeSet<SourceId> {
        &self.target_sources
    }

    pub fn targets(&self, source: &SourceId) -> bool {
        self.target_sources.contains(source)
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.terms.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{:?}[{}]", self.dialect, terms.join("&"))
    }
}

/// Build one query per dialect used by `enabled_sources`.
///
/// Queries come back ordered by dialect. An empty source set yields no
/// queries; an attribute set with nothing usable is
/// [`QueryError::InvalidAttributes`].
pub fn synthesize(
    attributes: &VehicleAttributes,
    enabled_sources: &BTreeSet<SourceId>,
    config: &SynthesizerConfig,
) -> Result<Vec<SearchQuery>, QueryError> {
    if attributes.is_empty() {
        return Err(QueryError::InvalidAttributes);
    }
    config.validate()?;

    let attrs = attributes.clone().normalized();
    let mut grouped: BTreeMap<QueryDialect, BTreeSet<SourceId>> = BTreeMap::new();
    for source in enabled_sources {
        grouped
            .entry(config.dialect_for(source))
            .or_default()
            .insert(source.clone());
    }

    Ok(grouped
        .into_iter()
        .map(|(dialect, target_sources)| SearchQuery {
            dialect,
            terms: terms_for(dialect, &attrs, config),
            target_sources,
        })
        .collect())
}

fn terms_for(
    dialect: QueryDialect,
    attrs: &VehicleAttributes,
    config: &SynthesizerConfig,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match dialect {
        QueryDialect::CodeList => {
            if let Some(make) = &attrs.make {
                out.insert(terms::MAKE_CODE.to_string(), code(make));
            }
            if let Some(model) = &attrs.model {
                out.insert(terms::MODEL_CODE.to_string(), code(model));
            }
            if let Some(year) = usable_year(attrs.year, config) {
                let (start, end) = year_window(year, config);
                out.insert(terms::START_YEAR.to_string(), start.to_string());
                out.insert(terms::END_YEAR.to_string(), end.to_string());
            }
            if let Some(body) = &attrs.body_type {
                out.insert(terms::BODY_STYLE.to_string(), code(body));
            }
        }
        QueryDialect::Keyword => {
            if let Some(make) = &attrs.make {
                out.insert(terms::MAKE.to_string(), slug(make));
            }
            if let Some(model) = &attrs.model {
                out.insert(terms::MODEL.to_string(), slug(model));
            }
            if let Some(year) = usable_year(attrs.year, config) {
                out.insert(terms::YEAR.to_string(), year.to_string());
            }
            if let Some(body) = &attrs.body_type {
                out.insert(terms::BODY_STYLE.to_string(), slug(body));
            }
        }
    }
    out
}

/// A recognized year outside `[min_year, max_year]` is dropped rather than
/// moved onto a bound.
fn usable_year(year: Option<u16>, config: &SynthesizerConfig) -> Option<u16> {
    year.filter(|y| (config.min_year..=config.max_year).contains(y))
}

/// `[max(year - window, min), min(year + window, max)]` for an in-range year.
fn year_window(year: u16, config: &SynthesizerConfig) -> (u16, u16) {
    let bound = |y: u16| y.clamp(config.min_year, config.max_year);
    (
        bound(year.saturating_sub(config.year_window)),
        bound(year.saturating_add(config.year_window)),
    )
}

fn code(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_ascii_uppercase()
}

fn slug(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_ascii_lowercase()
}
