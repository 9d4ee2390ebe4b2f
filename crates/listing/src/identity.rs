//! Canonical listing identity.
//!
//! A listing is identified by the marketplace it came from plus its URL after
//! normalization. Two scrapes of the same page, or a scrape and a previously
//! indexed record, therefore collapse onto the same id.
//!
//! # Algorithm
//!
//! ```text
//! hex(SHA-256(source || 0x00 || normalized_url))[..32]
//! ```
//!
//! URL normalization:
//! - scheme forced to `https`, host lower-cased, default port dropped
//! - fragment removed
//! - tracking parameters (`utm_*`, `fbclid`, `gclid`, `msclkid`) removed
//! - remaining query pairs sorted by key, then value
//! - trailing `/` removed from non-root paths

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::ListingError;
use crate::record::SourceId;

/// Length (hex chars) of a canonical listing id.
pub const CANONICAL_ID_LEN: usize = 32;

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid"];

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Normalize a listing URL into its canonical textual form.
///
/// ```rust
/// use listing::normalize_url;
///
/// let a = normalize_url("HTTP://WWW.Cars.com/vehicledetail/123/?utm_source=x#photos").unwrap();
/// let b = normalize_url("https://www.cars.com/vehicledetail/123").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn normalize_url(raw: &str) -> Result<String, ListingError> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|err| ListingError::InvalidUrl {
        url: trimmed.to_string(),
        reason: err.to_string(),
    })?;

    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ListingError::InvalidUrl {
            url: trimmed.to_string(),
            reason: "listing urls must be absolute http(s) urls".into(),
        });
    }

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ListingError::InvalidUrl {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            });
        }
    }

    // http -> https and default-port removal cannot fail for http(s) urls
    let _ = url.set_scheme("https");
    if url.port() == Some(443) || url.port() == Some(80) {
        let _ = url.set_port(None);
    }
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// Derive the canonical id for an already-normalized URL.
pub fn canonical_id(source: &SourceId, normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(normalized_url.as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(CANONICAL_ID_LEN);
    hex
}

/// Normalize `raw_url` and derive its canonical id in one step.
pub fn canonical_id_for(source: &SourceId, raw_url: &str) -> Result<String, ListingError> {
    let normalized = normalize_url(raw_url)?;
    Ok(canonical_id(source, &normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str) -> SourceId {
        SourceId::new(id).expect("valid source")
    }

    #[test]
    fn tracking_params_and_fragment_are_dropped() {
        let normalized =
            normalize_url("https://example.com/car/1?utm_medium=ad&color=red&gclid=x#top")
                .unwrap();
        assert_eq!(normalized, "https://example.com/car/1?color=red");
    }

    #[test]
    fn query_pairs_are_sorted() {
        let a = normalize_url("https://example.com/s?b=2&a=1").unwrap();
        let b = normalize_url("https://example.com/s?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn root_path_keeps_slash() {
        assert_eq!(
            normalize_url("https://Example.com").unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn relative_and_non_http_urls_are_rejected() {
        assert!(matches!(
            normalize_url("/cars/123"),
            Err(ListingError::InvalidUrl { .. })
        ));
        assert!(matches!(
            normalize_url("ftp://example.com/cars/123"),
            Err(ListingError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn canonical_id_depends_on_source() {
        let url = normalize_url("https://example.com/listing/9").unwrap();
        let a = canonical_id(&source("autotrader"), &url);
        let b = canonical_id(&source("cars_com"), &url);
        assert_ne!(a, b);
        assert_eq!(a.len(), CANONICAL_ID_LEN);
    }

    #[test]
    fn canonical_id_is_stable_across_url_spellings() {
        let src = source("autotrader");
        let a = canonical_id_for(&src, "http://www.autotrader.com/cars/77/").unwrap();
        let b = canonical_id_for(&src, "https://WWW.autotrader.com/cars/77?utm_source=feed").unwrap();
        assert_eq!(a, b);
    }
}
