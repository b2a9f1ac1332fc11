//! Run controller.
//!
//! One run of one source, as a linear workflow:
//!
//! ```text
//! validate ──► open run ──► adapter.harvest ──► reconcile each candidate ──► finalize
//!    │                            │
//!    └─ ConfigInvalid             └─ loop error: finalized as `error`,
//!       (no run record)              counters kept
//! ```
//!
//! Everything that touches the outside world is injected: catalog, content
//! store, fetcher, pacer and clock.

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::AdapterRegistry;
use crate::error::{HarvestError, Result};
use crate::pipeline::reconcile::{Decision, Reconciler};
use crate::schedule::next_eligible;
use crate::throttle::{DelayRange, JitterPacer, PacedFetcher, Pacer};
use crate::traits::{
    adapter::{CandidateFailure, CandidateSink, HarvestContext, HarvestReport},
    clock::{Clock, SystemClock},
    fetcher::{FetchOptions, Fetcher},
    store::{Catalog, ContentStore},
};
use crate::types::{
    config::HarvestConfig,
    document::Candidate,
    run::{RunCounts, RunFinalization, RunOutcome, RunStatus},
    source::{Source, SourceStatus},
};

/// Failure details kept on the run record, at most this many.
const MAX_RECORDED_FAILURES: usize = 50;

/// Drives single harvest runs.
#[derive(Clone)]
pub struct RunController {
    catalog: Arc<dyn Catalog>,
    registry: AdapterRegistry,
    fetcher: Arc<dyn Fetcher>,
    pacer: Arc<dyn Pacer>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    content: Arc<dyn ContentStore>,
    config: HarvestConfig,
}

impl RunController {
    /// Controller with the system clock, jittered pacing and default config.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        content: Arc<dyn ContentStore>,
        registry: AdapterRegistry,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            reconciler: Reconciler::new(catalog.clone(), content.clone(), clock.clone()),
            catalog,
            registry,
            fetcher,
            pacer: Arc::new(JitterPacer),
            clock,
            content,
            config: HarvestConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.reconciler = Reconciler::new(self.catalog.clone(), self.content.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_config(mut self, config: HarvestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Harvest `source` once.
    pub async fn run(&self, source: &Source) -> Result<RunOutcome> {
        self.run_with_cancel(source, &CancellationToken::new()).await
    }

    /// Harvest `source` once, stopping between candidates if `cancel` fires.
    ///
    /// Returns `Err` only when no run record could be written: a failed
    /// precondition, or the catalog failing to open or finalize the run.
    /// Failures inside the harvest loop are captured on the record.
    pub async fn run_with_cancel(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if !source.active || source.status != SourceStatus::Active {
            return Err(HarvestError::config(
                &source.name,
                format!("source is not active (status {})", source.status),
            ));
        }

        let adapter = self.registry.resolve(&source.adapter)?;
        adapter
            .validate(source)
            .map_err(|reason| HarvestError::config(&source.name, reason))?;

        let settings = self.config.effective_for(source);
        if let Some(reason) = settings.problem() {
            return Err(HarvestError::config(&source.name, reason));
        }

        let started_at = self.clock.now();
        let run = self.catalog.open_run(source.id, started_at).await?;
        info!(source = %source.name, run_id = %run.id, adapter = %source.adapter, "run opened");

        let fetcher = PacedFetcher::new(
            self.fetcher.clone(),
            self.pacer.clone(),
            DelayRange::new(settings.delay_min, settings.delay_max),
            FetchOptions {
                timeout: settings.fetch_timeout,
                user_agent: settings.user_agent.clone(),
            },
        );
        let ctx = HarvestContext::new(&fetcher, self.clock.as_ref(), cancel);
        let mut sink = RunSink::new(&self.reconciler, source);

        let result = adapter.harvest(source, &ctx, &mut sink).await;
        let counts = sink.counts;

        let (status, message, error_detail, report) = match result {
            Err(HarvestError::Cancelled) => (
                RunStatus::Cancelled,
                cancelled_message(&counts),
                String::new(),
                HarvestReport::default(),
            ),
            Ok(report) if cancel.is_cancelled() => {
                (RunStatus::Cancelled, cancelled_message(&counts), String::new(), report)
            }
            Ok(report) => (
                RunStatus::Success,
                format!(
                    "Harvest completed: {} documents stored ({} unchanged, {} failed)",
                    counts.stored(),
                    counts.unchanged,
                    counts.failed
                ),
                String::new(),
                report,
            ),
            Err(e) => {
                error!(source = %source.name, run_id = %run.id, error = %e, "harvest failed");
                (
                    RunStatus::Error,
                    format!("Harvest failed: {e}"),
                    error_chain(&e),
                    HarvestReport::default(),
                )
            }
        };

        let finished_at = self.clock.now().max(started_at);
        let finalization = RunFinalization {
            run_id: run.id,
            status,
            finished_at,
            counts,
            message: message.clone(),
            error_detail,
            metadata: json!({
                "adapter": source.adapter,
                "attempted": report.attempted,
                "harvest": report.metadata,
                "failures": sink.failures,
            }),
            next_eligible_at: next_eligible(&source.cadence, finished_at),
        };

        let closed = self.catalog.finalize_run(&finalization).await?;
        info!(
            source = %source.name,
            run_id = %closed.id,
            status = %closed.status,
            new = counts.new,
            updated = counts.updated,
            unchanged = counts.unchanged,
            failed = counts.failed,
            duration_ms = closed.duration_ms.unwrap_or_default(),
            "run finalized"
        );

        Ok(RunOutcome {
            success: status == RunStatus::Success,
            run_id: closed.id,
            status,
            counts,
            message,
        })
    }
}

fn cancelled_message(counts: &RunCounts) -> String {
    format!(
        "Harvest cancelled: {} documents stored ({} unchanged, {} failed)",
        counts.stored(),
        counts.unchanged,
        counts.failed
    )
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut detail = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

/// Sink that reconciles every candidate as it arrives and tallies outcomes.
struct RunSink<'a> {
    reconciler: &'a Reconciler,
    source: &'a Source,
    counts: RunCounts,
    failures: Vec<serde_json::Value>,
}

impl<'a> RunSink<'a> {
    fn new(reconciler: &'a Reconciler, source: &'a Source) -> Self {
        Self {
            reconciler,
            source,
            counts: RunCounts::default(),
            failures: Vec::new(),
        }
    }

    fn record_failure(&mut self, external_id: &str, url: &str, reason: String) {
        self.counts.failed += 1;
        if self.failures.len() < MAX_RECORDED_FAILURES {
            self.failures.push(json!({
                "external_id": external_id,
                "url": url,
                "error": reason,
            }));
        }
    }
}

#[async_trait::async_trait]
impl<'a> CandidateSink for RunSink<'a> {
    async fn accept(&mut self, candidate: Candidate) {
        match self.reconciler.reconcile(self.source, &candidate).await {
            Decision::Created(_) => self.counts.new += 1,
            Decision::Updated(_) => self.counts.updated += 1,
            Decision::Unchanged(_) => self.counts.unchanged += 1,
            Decision::Failed(reason) => {
                self.record_failure(&candidate.external_id, &candidate.origin_url, reason)
            }
        }
    }

    async fn reject(&mut self, failure: CandidateFailure) {
        warn!(
            source = %self.source.name,
            external_id = %failure.external_id,
            error = %failure.error,
            "candidate failed to download"
        );
        self.record_failure(&failure.external_id, &failure.origin_url, failure.error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryCatalog, MemoryContentStore};
    use crate::testing::{ManualClock, MockFetcher, RecordingPacer, ScriptedAdapter};
    use crate::traits::store::{RunLog, SourceCatalog};
    use crate::types::source::{NewSource, SourceSettings};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        catalog: Arc<MemoryCatalog>,
        clock: ManualClock,
        adapter: Arc<ScriptedAdapter>,
        controller: RunController,
        source: Source,
    }

    async fn fixture(adapter: ScriptedAdapter) -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let adapter = Arc::new(adapter);
        let registry = AdapterRegistry::builder().register_arc(adapter.clone()).build();
        let controller = RunController::new(
            catalog.clone(),
            Arc::new(MemoryContentStore::new()),
            registry,
            Arc::new(MockFetcher::new()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_pacer(Arc::new(RecordingPacer::new()));
        let source = catalog
            .upsert_source(
                &NewSource::new("scripted source", "https://example.gov", "scripted")
                    .with_cadence("weekly"),
                clock.now(),
            )
            .await
            .unwrap();
        Fixture {
            catalog,
            clock,
            adapter,
            controller,
            source,
        }
    }

    fn doc(id: &str, body: &str) -> Candidate {
        Candidate::new(id, id, format!("https://example.gov/{id}"), body).with_content_type("text/html")
    }

    #[tokio::test]
    async fn test_success_run_counts_and_schedule() {
        let f = fixture(
            ScriptedAdapter::new("scripted")
                .accept(doc("a", "A"))
                .reject("b", "https://example.gov/b", 503),
        )
        .await;

        let outcome = f.controller.run(&f.source).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.counts, RunCounts { new: 1, updated: 0, unchanged: 0, failed: 1 });
        assert_eq!(outcome.message, "Harvest completed: 1 documents stored (0 unchanged, 1 failed)");

        let run = f.catalog.get_run(outcome.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.metadata["failures"][0]["external_id"], "b");

        let source = f.catalog.get_source(f.source.id).await.unwrap().unwrap();
        assert_eq!(source.last_harvest_at, Some(f.clock.now()));
        assert_eq!(source.next_eligible_at, Some(f.clock.now() + Duration::days(7)));
    }

    #[tokio::test]
    async fn test_loop_error_keeps_counters() {
        let f = fixture(
            ScriptedAdapter::new("scripted")
                .accept(doc("a", "A"))
                .failing_with("index markup changed"),
        )
        .await;

        let outcome = f.controller.run(&f.source).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status, RunStatus::Error);
        assert_eq!(outcome.counts.new, 1);
        let run = f.catalog.get_run(outcome.run_id).await.unwrap().unwrap();
        assert_eq!(run.message, "Harvest failed: run failed: index markup changed");
        assert_eq!(run.error_detail, "run failed: index markup changed");
        assert!(run.is_finalized());
    }

    #[tokio::test]
    async fn test_invalid_config_creates_no_run() {
        let f = fixture(ScriptedAdapter::new("scripted").invalid("missing origin")).await;

        let err = f.controller.run(&f.source).await.unwrap_err();

        assert!(matches!(err, HarvestError::ConfigInvalid { ref reason, .. } if reason == "missing origin"));
        assert_eq!(f.catalog.run_count(), 0);
        assert_eq!(f.adapter.harvest_calls(), 0);
    }

    #[tokio::test]
    async fn test_inactive_and_bad_settings_are_config_errors() {
        let f = fixture(ScriptedAdapter::new("scripted")).await;

        let mut inactive = f.source.clone();
        inactive.active = false;
        assert!(matches!(
            f.controller.run(&inactive).await,
            Err(HarvestError::ConfigInvalid { .. })
        ));

        let mut inverted = f.source.clone();
        inverted.settings = SourceSettings {
            delay_min_ms: Some(10),
            delay_max_ms: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            f.controller.run(&inverted).await,
            Err(HarvestError::ConfigInvalid { .. })
        ));

        let mut unknown = f.source.clone();
        unknown.adapter = "nope".into();
        assert!(matches!(
            f.controller.run(&unknown).await,
            Err(HarvestError::UnknownAdapter(_))
        ));
        assert_eq!(f.catalog.run_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_finalized_as_cancelled() {
        let f = fixture(ScriptedAdapter::new("scripted").accept(doc("a", "A"))).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f.controller.run_with_cancel(&f.source, &cancel).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(!outcome.success);
        assert_eq!(outcome.counts.total(), 0);
    }

    #[tokio::test]
    async fn test_zero_candidates_is_success() {
        let f = fixture(ScriptedAdapter::new("scripted")).await;
        let outcome = f.controller.run(&f.source).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.counts.total(), 0);
    }
}
