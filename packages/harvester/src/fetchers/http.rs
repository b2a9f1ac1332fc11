//! HTTP fetcher backed by reqwest.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{FetchOptions, FetchedResource, Fetcher};

/// Plain HTTP GET fetcher.
///
/// # Example
///
/// ```rust,ignore
/// use harvester::fetchers::HttpFetcher;
///
/// let fetcher = HttpFetcher::new().with_user_agent("DocumentHarvester/1.0");
/// let page = fetcher.fetch("https://example.gov/rulings/2024").await?;
/// ```
pub struct HttpFetcher {
    client: reqwest::Client,
    defaults: FetchOptions,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Create a fetcher with a 30s timeout and the default user agent.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            defaults: FetchOptions {
                timeout: Duration::from_secs(30),
                user_agent: "DocumentHarvester/1.0".to_string(),
            },
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.defaults.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = timeout;
        self
    }

    fn map_send_error(url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Http {
                url: url.to_string(),
                source: Box::new(e),
            }
        }
    }
}

/// Parse `url`, accepting only absolute http(s) URLs.
pub(crate) fn parse_http_url(url: &str) -> FetchResult<Url> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(parsed),
        _ => Err(FetchError::InvalidUrl {
            url: url.to_string(),
        }),
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedResource> {
        let defaults = self.defaults.clone();
        self.fetch_with(url, &defaults).await
    }

    async fn fetch_with(&self, url: &str, options: &FetchOptions) -> FetchResult<FetchedResource> {
        let parsed = parse_http_url(url)?;

        debug!(url = %url, "HTTP fetch starting");
        let response = self
            .client
            .get(parsed)
            .timeout(options.timeout)
            .header(USER_AGENT, &options.user_agent)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "HTTP request failed");
                Self::map_send_error(url, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    source: Box::new(e),
                }
            }
        })?;

        debug!(url = %url, bytes = body.len(), "HTTP fetch complete");
        Ok(FetchedResource {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(parse_http_url("https://example.gov/a").is_ok());
        assert!(parse_http_url("http://example.gov").is_ok());
        assert!(matches!(
            parse_http_url("ftp://example.gov/a"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(parse_http_url("/relative/path").is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_network() {
        let fetcher = HttpFetcher::new();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert_eq!(err.url(), "not a url");
    }
}
