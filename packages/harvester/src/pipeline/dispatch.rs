//! Trigger interface: retrying single runs, batch runs of eligible
//! sources, and run-log retention.
//!
//! Retries cover the whole run and only infrastructure failures, i.e.
//! errors the controller could not capture on a run record. Business
//! failures (bad configuration, unknown or inactive source) and runs
//! finalized as `error` are returned as-is.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{HarvestError, Result};
use crate::pipeline::run::RunController;
use crate::types::{
    config::RetryPolicy,
    run::{RunCounts, RunOutcome, RunStatus},
    source::Source,
};

/// Result of one triggered run, after retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub source_id: Uuid,
    pub source_name: Option<String>,
    pub run_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub counts: RunCounts,
    pub message: String,
    pub error: Option<String>,

    /// Attempts made, including the first
    pub attempts: u32,
}

impl RunSummary {
    fn from_outcome(source: &Source, outcome: RunOutcome, attempts: u32) -> Self {
        Self {
            success: outcome.success,
            source_id: source.id,
            source_name: Some(source.name.clone()),
            run_id: Some(outcome.run_id),
            status: Some(outcome.status),
            counts: outcome.counts,
            message: outcome.message,
            error: None,
            attempts,
        }
    }

    fn from_error(source_id: Uuid, source: Option<&Source>, message: String, attempts: u32) -> Self {
        Self {
            success: false,
            source_id,
            source_name: source.map(|s| s.name.clone()),
            run_id: None,
            status: None,
            counts: RunCounts::default(),
            error: Some(message.clone()),
            message,
            attempts,
        }
    }
}

/// Result of `start_all_eligible_runs`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Sources that were eligible
    pub total: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub details: Vec<RunSummary>,

    /// Set when the eligible sources could not be listed
    pub error: Option<String>,
}

/// Result of `purge_old_runs`.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeSummary {
    pub success: bool,
    pub deleted: u64,
    pub days: u32,
    pub cutoff: DateTime<Utc>,
    pub error: Option<String>,
}

/// Entry point for whatever decides when to harvest.
#[derive(Clone)]
pub struct Dispatcher {
    controller: RunController,
    retry: RetryPolicy,
    max_concurrent: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Dispatcher using the controller's retry and concurrency settings.
    pub fn new(controller: RunController) -> Self {
        let config = controller.config();
        Self {
            retry: config.retry,
            max_concurrent: config.max_concurrent_sources.max(1),
            controller,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Token that stops in-flight runs between candidates and cuts retry waits short.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    /// Run one source, retrying infrastructure failures.
    ///
    /// Never fails: exhausting the retry bound yields an unsuccessful summary.
    pub async fn start_run(&self, source_id: Uuid) -> RunSummary {
        let max_attempts = self.retry.max_attempts();
        let mut last_source: Option<Source> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.attempt(source_id, &mut last_source).await {
                Ok((source, outcome)) => {
                    return RunSummary::from_outcome(&source, outcome, attempt);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                warn!(source_id = %source_id, error = %err, "run not started");
                return RunSummary::from_error(source_id, last_source.as_ref(), err.to_string(), attempt);
            }

            if attempt >= max_attempts || self.shutdown.is_cancelled() {
                error!(source_id = %source_id, attempts = attempt, error = %err, "giving up on run");
                return RunSummary::from_error(
                    source_id,
                    last_source.as_ref(),
                    format!("Maximum retries exceeded: {err}"),
                    attempt,
                );
            }

            warn!(
                source_id = %source_id,
                attempt,
                max_attempts,
                delay_secs = self.retry.delay.as_secs(),
                error = %err,
                "run failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.retry.delay) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    async fn attempt(
        &self,
        source_id: Uuid,
        last_source: &mut Option<Source>,
    ) -> Result<(Source, RunOutcome)> {
        let source = self
            .controller
            .catalog()
            .get_source(source_id)
            .await?
            .ok_or_else(|| HarvestError::SourceNotFound(source_id.to_string()))?;
        *last_source = Some(source.clone());

        if !source.active {
            return Err(HarvestError::SourceInactive(source.name.clone()));
        }

        let outcome = self.controller.run_with_cancel(&source, &self.shutdown).await?;
        Ok((source, outcome))
    }

    /// Look a source up by name, then `start_run` it.
    pub async fn run_source_by_name(&self, name: &str) -> Result<RunSummary> {
        let source = self
            .controller
            .catalog()
            .get_source_by_name(name)
            .await?
            .ok_or_else(|| HarvestError::SourceNotFound(name.to_string()))?;
        Ok(self.start_run(source.id).await)
    }

    /// Run every eligible source, at most `max_concurrent` at a time.
    pub async fn start_all_eligible_runs(&self) -> BatchSummary {
        let now = self.controller.clock().now();
        let sources = match self.controller.catalog().eligible_sources(now).await {
            Ok(sources) => sources,
            Err(e) => {
                error!(error = %e, "failed to list eligible sources");
                return BatchSummary {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let total = sources.len();
        info!(total, "starting eligible sources");
        if total == 0 {
            return BatchSummary::default();
        }

        let details: Vec<RunSummary> = stream::iter(sources)
            .map(|source| self.start_run(source.id))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let succeeded = details.iter().filter(|d| d.success).count();
        let summary = BatchSummary {
            total,
            executed: details.len(),
            succeeded,
            failed: details.len() - succeeded,
            details,
            error: None,
        };
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "eligible sources finished"
        );
        summary
    }

    /// Delete finalized runs that started more than `days` ago.
    pub async fn purge_old_runs(&self, days: u32) -> PurgeSummary {
        let cutoff = self.controller.clock().now() - ChronoDuration::days(i64::from(days));
        match self.controller.catalog().purge_runs_before(cutoff).await {
            Ok(deleted) => {
                info!(deleted, days, "purged old runs");
                PurgeSummary {
                    success: true,
                    deleted,
                    days,
                    cutoff,
                    error: None,
                }
            }
            Err(e) => {
                error!(error = %e, days, "failed to purge old runs");
                PurgeSummary {
                    success: false,
                    deleted: 0,
                    days,
                    cutoff,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// `purge_old_runs` with the configured retention.
    pub async fn purge_expired_runs(&self) -> PurgeSummary {
        self.purge_old_runs(self.controller.config().run_retention_days)
            .await
    }
}
