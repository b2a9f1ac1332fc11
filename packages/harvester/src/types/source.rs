//! Configured origins that documents are harvested from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// How a source publishes its documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Web,
    Api,
    Pdf,
    Rss,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Web => "web",
            SourceKind::Api => "api",
            SourceKind::Pdf => "pdf",
            SourceKind::Rss => "rss",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(SourceKind::Web),
            "api" => Ok(SourceKind::Api),
            "pdf" => Ok(SourceKind::Pdf),
            "rss" => Ok(SourceKind::Rss),
            other => Err(format!("invalid source kind: {}", other)),
        }
    }
}

/// Operator-controlled health of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Inactive,
    Errored,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Inactive => "inactive",
            SourceStatus::Errored => "errored",
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SourceStatus::Active),
            "inactive" => Ok(SourceStatus::Inactive),
            "errored" => Ok(SourceStatus::Errored),
            other => Err(format!("invalid source status: {}", other)),
        }
    }
}

/// Per-source overrides of the global harvest settings.
///
/// Every field is optional; unset fields fall back to [`HarvestConfig`].
///
/// [`HarvestConfig`]: crate::types::config::HarvestConfig
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_min_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_max_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl SourceSettings {
    pub fn delay_min(&self) -> Option<Duration> {
        self.delay_min_ms.map(Duration::from_millis)
    }

    pub fn delay_max(&self) -> Option<Duration> {
        self.delay_max_ms.map(Duration::from_millis)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

/// A configured origin from which documents are harvested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,

    /// Unique, human-facing identity
    pub name: String,

    pub description: String,

    pub kind: SourceKind,

    /// Base locator the adapter enumerates from
    pub origin: String,

    /// Registry selector of the adapter that harvests this source
    pub adapter: String,

    /// Cadence label, see [`crate::schedule::Cadence`]
    pub cadence: String,

    pub active: bool,
    pub status: SourceStatus,

    #[serde(default)]
    pub settings: SourceSettings,

    pub last_harvest_at: Option<DateTime<Utc>>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Filesystem-safe form of the name used by the content store layout.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Whether the scheduler may start a run for this source at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.status == SourceStatus::Active
            && self.next_eligible_at.map_or(true, |next| next <= now)
    }
}

/// Lowercase `name`, mapping every run of non-alphanumeric characters to `_`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("source");
    }
    slug
}

/// Configuration-time description of a source, upserted by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: SourceKind,
    pub origin: String,
    pub adapter: String,
    #[serde(default = "default_cadence")]
    pub cadence: String,
    #[serde(default)]
    pub settings: SourceSettings,
}

fn default_cadence() -> String {
    "daily".to_string()
}

impl NewSource {
    pub fn new(
        name: impl Into<String>,
        origin: impl Into<String>,
        adapter: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: SourceKind::Web,
            origin: origin.into(),
            adapter: adapter.into(),
            cadence: default_cadence(),
            settings: SourceSettings::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_cadence(mut self, cadence: impl Into<String>) -> Self {
        self.cadence = cadence.into();
        self
    }

    pub fn with_settings(mut self, settings: SourceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Materialize a brand-new source record.
    pub fn into_source(self, now: DateTime<Utc>) -> Source {
        Source {
            id: Uuid::now_v7(),
            name: self.name,
            description: self.description,
            kind: self.kind,
            origin: self.origin,
            adapter: self.adapter,
            cadence: self.cadence,
            active: true,
            status: SourceStatus::Active,
            settings: self.settings,
            last_harvest_at: None,
            next_eligible_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_slug() {
        assert_eq!(slugify("COSIT - Soluções de Consulta"), "cosit_soluções_de_consulta");
        assert_eq!(slugify("  Federal Gazette  "), "federal_gazette");
        assert_eq!(slugify("a/b\\c"), "a_b_c");
        assert_eq!(slugify("---"), "source");
    }

    #[test]
    fn test_eligibility() {
        let now = Utc::now();
        let mut source = NewSource::new("gazette", "https://example.gov/rulings", "gazette")
            .into_source(now);

        assert!(source.is_eligible(now));

        source.next_eligible_at = Some(now + ChronoDuration::hours(1));
        assert!(!source.is_eligible(now));
        assert!(source.is_eligible(now + ChronoDuration::hours(1)));

        source.next_eligible_at = None;
        source.status = SourceStatus::Errored;
        assert!(!source.is_eligible(now));

        source.status = SourceStatus::Active;
        source.active = false;
        assert!(!source.is_eligible(now));
    }

    #[test]
    fn test_kind_and_status_round_trip_through_str() {
        for kind in [SourceKind::Web, SourceKind::Api, SourceKind::Pdf, SourceKind::Rss] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert_eq!("errored".parse::<SourceStatus>().unwrap(), SourceStatus::Errored);
        assert!("paused".parse::<SourceStatus>().is_err());
    }
}
