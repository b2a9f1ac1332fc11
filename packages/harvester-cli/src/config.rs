use anyhow::{Context, Result};
use dotenvy::dotenv;
use harvester::{HarvestConfig, RetryPolicy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub content_root: PathBuf,
    pub harvest: HarvestConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = HarvestConfig::default();

        let delay_min = parse::<u64>(&var, "HARVEST_DELAY_MIN_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.delay_min);
        let delay_max = parse::<u64>(&var, "HARVEST_DELAY_MAX_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.delay_max);
        let fetch_timeout = parse::<u64>(&var, "HARVEST_FETCH_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.fetch_timeout);
        let retry = RetryPolicy::new(
            parse(&var, "HARVEST_MAX_RETRIES")?.unwrap_or(defaults.retry.max_retries),
            parse::<u64>(&var, "HARVEST_RETRY_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry.delay),
        );

        let harvest = HarvestConfig::new()
            .with_delay(delay_min, delay_max)
            .with_fetch_timeout(fetch_timeout)
            .with_user_agent(var("HARVEST_USER_AGENT").unwrap_or(defaults.user_agent))
            .with_retry(retry)
            .with_max_concurrent_sources(
                parse(&var, "HARVEST_MAX_CONCURRENT_SOURCES")?
                    .unwrap_or(defaults.max_concurrent_sources),
            );

        Ok(Self {
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://harvest.db?mode=rwc".to_string()),
            content_root: var("CONTENT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/raw")),
            harvest,
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{name} must be a valid number"))
        })
        .transpose()
}
