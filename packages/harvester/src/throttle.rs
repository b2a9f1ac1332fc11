//! Jittered rate limiting for outbound requests.
//!
//! Every request a run makes, index or document, goes through a
//! [`PacedFetcher`], which pauses for a uniformly random duration in
//! `[min, max]` before delegating. The pause itself is behind the
//! [`Pacer`] trait so tests can skip or record it.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::error::FetchResult;
use crate::traits::fetcher::{FetchOptions, FetchedResource, Fetcher};

/// Inclusive range a pause is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Draw a duration uniformly from the range. An inverted range yields `min`.
    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[async_trait]
pub trait Pacer: Send + Sync {
    /// Wait before the next outbound request.
    async fn pause(&self, range: DelayRange);
}

/// Sleeps a random duration drawn from the range.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterPacer;

#[async_trait]
impl Pacer for JitterPacer {
    async fn pause(&self, range: DelayRange) {
        let delay = range.sample();
        trace!(delay_ms = delay.as_millis() as u64, "pacing request");
        tokio::time::sleep(delay).await;
    }
}

/// Never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPause;

#[async_trait]
impl Pacer for NoPause {
    async fn pause(&self, _range: DelayRange) {}
}

/// A fetcher wrapper that paces every request and applies run settings.
pub struct PacedFetcher<F: Fetcher> {
    inner: F,
    pacer: Arc<dyn Pacer>,
    range: DelayRange,
    options: FetchOptions,
}

impl<F: Fetcher> PacedFetcher<F> {
    pub fn new(inner: F, pacer: Arc<dyn Pacer>, range: DelayRange, options: FetchOptions) -> Self {
        Self {
            inner,
            pacer,
            range,
            options,
        }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for PacedFetcher<F> {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedResource> {
        self.pacer.pause(self.range).await;
        self.inner.fetch_with(url, &self.options).await
    }

    async fn fetch_with(&self, url: &str, options: &FetchOptions) -> FetchResult<FetchedResource> {
        self.pacer.pause(self.range).await;
        self.inner.fetch_with(url, options).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFetcher, RecordingPacer};

    fn options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(30),
            user_agent: "Test/1.0".into(),
        }
    }

    #[test]
    fn test_sample_stays_in_range() {
        let range = DelayRange::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..200 {
            let d = range.sample();
            assert!(d >= range.min && d <= range.max);
        }

        let fixed = DelayRange::new(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(fixed.sample(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_every_fetch_is_paced() {
        let mock = MockFetcher::new()
            .with_page("https://example.gov/a", "a")
            .with_page("https://example.gov/b", "b");
        let pacer = Arc::new(RecordingPacer::new());
        let range = DelayRange::new(Duration::from_secs(1), Duration::from_secs(3));
        let fetcher = PacedFetcher::new(mock.clone(), pacer.clone(), range, options());

        fetcher.fetch("https://example.gov/a").await.unwrap();
        fetcher.fetch("https://example.gov/b").await.unwrap();
        let _ = fetcher.fetch("https://example.gov/missing").await;

        assert_eq!(pacer.pauses(), vec![range; 3]);
        assert_eq!(mock.calls().len(), 3);
        assert_eq!(mock.last_user_agent().as_deref(), Some("Test/1.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_pacer_sleeps_within_range() {
        let range = DelayRange::new(Duration::from_secs(1), Duration::from_secs(3));
        let start = tokio::time::Instant::now();
        JitterPacer.pause(range).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1));
        assert!(waited <= Duration::from_secs(3) + Duration::from_millis(5));
    }
}
