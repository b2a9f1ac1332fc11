//! Cadence labels and next-eligible computation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How often a source should be harvested.
///
/// Offsets are fixed; `Monthly` is always 30 days, regardless of calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    /// Parse a label, falling back to `Daily` for anything unknown.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "hourly" => Cadence::Hourly,
            "daily" => Cadence::Daily,
            "weekly" => Cadence::Weekly,
            "monthly" => Cadence::Monthly,
            _ => Cadence::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }

    pub fn interval(&self) -> Duration {
        match self {
            Cadence::Hourly => Duration::hours(1),
            Cadence::Daily => Duration::hours(24),
            Cadence::Weekly => Duration::days(7),
            Cadence::Monthly => Duration::days(30),
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a source harvested at `from` may run again.
pub fn next_eligible(cadence_label: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    from + Cadence::from_label(cadence_label).interval()
}
