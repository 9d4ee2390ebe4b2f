use thiserror::Error;

/// Failure of a single adapter fetch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    /// The response arrived but could not be turned into listings.
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
}

impl SourceError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Parse(_))
    }

    /// Map a non-success HTTP status onto a failure kind.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            429 => SourceError::RateLimited(format!("HTTP 429 from {url}")),
            _ => SourceError::Network(format!("HTTP {status} from {url}")),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_not_retryable() {
        assert!(!SourceError::Parse("bad".into()).is_retryable());
        assert!(SourceError::Timeout("slow".into()).is_retryable());
        assert!(SourceError::Network("reset".into()).is_retryable());
        assert!(SourceError::RateLimited("429".into()).is_retryable());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            SourceError::from_status(429, "https://x"),
            SourceError::RateLimited(_)
        ));
        assert!(matches!(
            SourceError::from_status(503, "https://x"),
            SourceError::Network(_)
        ));
        assert!(SourceError::from_status(404, "https://x")
            .to_string()
            .contains("HTTP 404"));
    }
}
