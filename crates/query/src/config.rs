use std::collections::BTreeMap;

use listing::SourceId;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// How a marketplace expects vehicle constraints to be spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDialect {
    /// Upper-case make/model codes plus a model-year window.
    CodeList,
    /// Lower-case make/model slugs plus an exact model year.
    Keyword,
}

/// Configuration for [`crate::synthesize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    /// Dialect per source. Sources not listed use `default_dialect`.
    #[serde(default = "SynthesizerConfig::default_dialects")]
    pub dialects: BTreeMap<SourceId, QueryDialect>,
    #[serde(default = "SynthesizerConfig::default_dialect")]
    pub default_dialect: QueryDialect,
    /// Years either side of the recognized year for code-list queries.
    #[serde(default = "SynthesizerConfig::default_year_window")]
    pub year_window: u16,
    #[serde(default = "SynthesizerConfig::default_min_year")]
    pub min_year: u16,
    #[serde(default = "SynthesizerConfig::default_max_year")]
    pub max_year: u16,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            dialects: Self::default_dialects(),
            default_dialect: Self::default_dialect(),
            year_window: Self::default_year_window(),
            min_year: Self::default_min_year(),
            max_year: Self::default_max_year(),
        }
    }
}

impl SynthesizerConfig {
    pub(crate) fn default_dialects() -> BTreeMap<SourceId, QueryDialect> {
        BTreeMap::from([
            (SourceId::autotrader(), QueryDialect::CodeList),
            (SourceId::cars_com(), QueryDialect::Keyword),
        ])
    }

    pub(crate) fn default_dialect() -> QueryDialect {
        QueryDialect::Keyword
    }

    pub(crate) fn default_year_window() -> u16 {
        2
    }

    pub(crate) fn default_min_year() -> u16 {
        1990
    }

    pub(crate) fn default_max_year() -> u16 {
        2026
    }

    pub fn with_dialect(mut self, source: SourceId, dialect: QueryDialect) -> Self {
        self.dialects.insert(source, dialect);
        self
    }

    pub fn with_default_dialect(mut self, dialect: QueryDialect) -> Self {
        self.default_dialect = dialect;
        self
    }

    pub fn with_year_window(mut self, window: u16) -> Self {
        self.year_window = window;
        self
    }

    pub fn with_year_bounds(mut self, min_year: u16, max_year: u16) -> Self {
        self.min_year = min_year;
        self.max_year = max_year;
        self
    }

    pub fn dialect_for(&self, source: &SourceId) -> QueryDialect {
        self.dialects
            .get(source)
            .copied()
            .unwrap_or(self.default_dialect)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.min_year > self.max_year {
            return Err(QueryError::InvalidConfig(format!(
                "min_year {} is after max_year {}",
                self.min_year, self.max_year
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_reference_sources() {
        let cfg = SynthesizerConfig::default();
        assert_eq!(cfg.dialect_for(&SourceId::autotrader()), QueryDialect::CodeList);
        assert_eq!(cfg.dialect_for(&SourceId::cars_com()), QueryDialect::Keyword);
        assert_eq!(
            cfg.dialect_for(&SourceId::new("carvana").unwrap()),
            QueryDialect::Keyword
        );
        assert_eq!((cfg.year_window, cfg.min_year, cfg.max_year), (2, 1990, 2026));
    }

    #[test]
    fn inverted_year_bounds_are_rejected() {
        let cfg = SynthesizerConfig::default().with_year_bounds(2030, 2000);
        assert!(matches!(cfg.validate(), Err(QueryError::InvalidConfig(_))));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: SynthesizerConfig = serde_json::from_str(r#"{"year_window": 1}"#).unwrap();
        assert_eq!(cfg.year_window, 1);
        assert_eq!(cfg.dialects, SynthesizerConfig::default_dialects());
    }
}
