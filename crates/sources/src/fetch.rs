use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SourceError;

/// Raw page body plus the status it came with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: Url,
    pub status: u16,
    pub body: String,
}

/// Transfer strategy behind an adapter. The default is plain HTTP; a
/// browser-driven fetcher for script-rendered pages would slot in here.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, SourceError>;
}

/// HTTP client settings shared by the reference adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "FetcherConfig::default_user_agent")]
    pub user_agent: String,
    /// Whole-request timeout applied by the client.
    #[serde(default = "FetcherConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "FetcherConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: Self::default_user_agent(),
            timeout_secs: Self::default_timeout_secs(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
        }
    }
}

impl FetcherConfig {
    fn default_user_agent() -> String {
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
            .to_string()
    }

    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_connect_timeout_secs() -> u64 {
        10
    }
}

/// [`PageFetcher`] backed by a pooled `reqwest::Client`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| SourceError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, SourceError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url = %url, "marketplace returned non-success status");
            return Err(SourceError::from_status(status.as_u16(), url.as_str()));
        }
        let body = response.text().await?;
        Ok(FetchedPage {
            url: url.clone(),
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetcher_config_defaults() {
        let cfg = FetcherConfig::default();
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.connect_timeout_secs, 10);
        assert!(cfg.user_agent.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn http_fetcher_builds() {
        assert!(HttpFetcher::new(&FetcherConfig::default()).is_ok());
    }
}
