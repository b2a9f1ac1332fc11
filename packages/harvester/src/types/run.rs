//! Audit records for harvest runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(RunStatus::Started),
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("invalid run status: {}", other)),
        }
    }
}

/// Per-decision tallies for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub new: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub failed: u32,
}

impl RunCounts {
    pub fn total(&self) -> u32 {
        self.new + self.updated + self.unchanged + self.failed
    }

    /// Documents whose content was written during the run.
    pub fn stored(&self) -> u32 {
        self.new + self.updated
    }
}

/// One execution of the harvest workflow for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,

    /// `None` while the run is in progress
    pub finished_at: Option<DateTime<Utc>>,

    /// `finished_at - started_at` in milliseconds, set with `finished_at`
    pub duration_ms: Option<i64>,

    pub counts: RunCounts,
    pub message: String,
    pub error_detail: String,

    /// Adapter-specific side data (buckets visited, skipped links, ...)
    pub metadata: serde_json::Value,
}

impl RunRecord {
    pub fn open(source_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_id,
            status: RunStatus::Started,
            started_at,
            finished_at: None,
            duration_ms: None,
            counts: RunCounts::default(),
            message: String::new(),
            error_detail: String::new(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::milliseconds)
    }

    /// Fill in the terminal fields. Callers guarantee this happens once.
    pub(crate) fn apply(&mut self, finalization: &RunFinalization) {
        self.status = finalization.status;
        self.finished_at = Some(finalization.finished_at);
        self.duration_ms = Some((finalization.finished_at - self.started_at).num_milliseconds());
        self.counts = finalization.counts;
        self.message = finalization.message.clone();
        self.error_detail = finalization.error_detail.clone();
        self.metadata = finalization.metadata.clone();
    }
}

/// Terminal state written at a run's single finalization point.
#[derive(Debug, Clone)]
pub struct RunFinalization {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub message: String,
    pub error_detail: String,
    pub metadata: serde_json::Value,

    /// Written to the source alongside the run
    pub next_eligible_at: DateTime<Utc>,
}

/// What the run controller hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub run_id: Uuid,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub message: String,
}
