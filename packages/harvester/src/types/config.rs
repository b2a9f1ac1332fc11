//! Configuration types for harvesting and dispatch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::source::Source;

/// Global harvest settings. Sources may override the fetch-related ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Lower bound of the jittered pause before each outbound request.
    ///
    /// Default: 1s.
    pub delay_min: Duration,

    /// Upper bound of the jittered pause. Default: 3s.
    pub delay_max: Duration,

    /// Per-request timeout. Default: 30s.
    pub fetch_timeout: Duration,

    pub user_agent: String,

    /// Whole-run retry policy applied by the dispatcher.
    pub retry: RetryPolicy,

    /// How many sources `start_all_eligible_runs` harvests at once.
    ///
    /// Runs never parallelise internally; this only bounds cross-source
    /// concurrency. Default: 4.
    pub max_concurrent_sources: usize,

    /// Default age cutoff for `purge_old_runs`. Default: 90.
    pub run_retention_days: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            delay_min: Duration::from_secs(1),
            delay_max: Duration::from_secs(3),
            fetch_timeout: Duration::from_secs(30),
            user_agent: "DocumentHarvester/1.0".to_string(),
            retry: RetryPolicy::default(),
            max_concurrent_sources: 4,
            run_retention_days: 90,
        }
    }
}

impl HarvestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the jittered pause range.
    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.delay_min = min;
        self.delay_max = max;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_sources(mut self, max: usize) -> Self {
        self.max_concurrent_sources = max.max(1);
        self
    }

    pub fn with_run_retention_days(mut self, days: u32) -> Self {
        self.run_retention_days = days;
        self
    }

    /// Merge a source's overrides over these defaults.
    pub fn effective_for(&self, source: &Source) -> EffectiveSettings {
        EffectiveSettings {
            delay_min: source.settings.delay_min().unwrap_or(self.delay_min),
            delay_max: source.settings.delay_max().unwrap_or(self.delay_max),
            fetch_timeout: source.settings.fetch_timeout().unwrap_or(self.fetch_timeout),
            user_agent: source
                .settings
                .user_agent
                .clone()
                .unwrap_or_else(|| self.user_agent.clone()),
        }
    }
}

/// Settings in force for one run of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub fetch_timeout: Duration,
    pub user_agent: String,
}

impl EffectiveSettings {
    /// Reason these settings cannot drive a run, if any.
    pub fn problem(&self) -> Option<String> {
        if self.delay_min > self.delay_max {
            return Some(format!(
                "delay_min {:?} exceeds delay_max {:?}",
                self.delay_min, self.delay_max
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Some("fetch_timeout must be greater than zero".to_string());
        }
        if self.user_agent.trim().is_empty() {
            return Some("user_agent must not be empty".to_string());
        }
        None
    }
}

/// Bounded, fixed-delay retry of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,

    /// Fixed pause between attempts. Default: 300s.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::source::{NewSource, SourceSettings};
    use chrono::Utc;

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.delay_min, Duration::from_secs(1));
        assert_eq!(config.delay_max, Duration::from_secs(3));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.delay, Duration::from_secs(300));
        assert_eq!(config.retry.max_attempts(), 4);
        assert_eq!(config.run_retention_days, 90);
    }

    #[test]
    fn test_source_overrides_merge_over_defaults() {
        let source = NewSource::new("s", "https://example.gov", "gazette")
            .with_settings(SourceSettings {
                delay_min_ms: Some(10),
                delay_max_ms: Some(20),
                fetch_timeout_secs: None,
                user_agent: Some("Custom/2.0".into()),
            })
            .into_source(Utc::now());

        let effective = HarvestConfig::default().effective_for(&source);
        assert_eq!(effective.delay_min, Duration::from_millis(10));
        assert_eq!(effective.delay_max, Duration::from_millis(20));
        assert_eq!(effective.fetch_timeout, Duration::from_secs(30));
        assert_eq!(effective.user_agent, "Custom/2.0");
        assert!(effective.problem().is_none());
    }

    #[test]
    fn test_inverted_delay_range_is_a_problem() {
        let source = NewSource::new("s", "https://example.gov", "gazette")
            .with_settings(SourceSettings {
                delay_min_ms: Some(5_000),
                ..Default::default()
            })
            .into_source(Utc::now());

        let effective = HarvestConfig::default().effective_for(&source);
        assert!(effective.problem().unwrap().contains("exceeds"));
    }
}
