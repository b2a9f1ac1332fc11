//! Outbound fetch abstraction.
//!
//! Adapters never talk to the network directly; they go through a
//! [`Fetcher`], which lets the run controller wrap every request in the
//! shared throttle and lets tests substitute canned responses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::FetchResult;
use crate::fingerprint::canonical_bytes;

/// Raw response to a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// URL that was requested
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    pub status: u16,

    pub content_type: Option<String>,

    pub body: Vec<u8>,

    pub fetched_at: DateTime<Utc>,
}

impl FetchedResource {
    pub fn new(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: 200,
            content_type: None,
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Body decoded per its declared charset, for link parsing.
    pub fn text(&self) -> String {
        let bytes = canonical_bytes(&self.body, self.content_type.as_deref());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Per-run request settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub user_agent: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one URL. Non-success statuses and timeouts are errors.
    async fn fetch(&self, url: &str) -> FetchResult<FetchedResource>;

    /// Fetch with run-specific settings. Fetchers without per-request
    /// knobs ignore `options`.
    async fn fetch_with(&self, url: &str, options: &FetchOptions) -> FetchResult<FetchedResource> {
        let _ = options;
        self.fetch(url).await
    }

    /// Get the fetcher name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for std::sync::Arc<F> {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedResource> {
        (**self).fetch(url).await
    }

    async fn fetch_with(&self, url: &str, options: &FetchOptions) -> FetchResult<FetchedResource> {
        (**self).fetch_with(url, options).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
