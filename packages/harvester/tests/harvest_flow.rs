//! Integration tests for the harvest workflow.
//!
//! Everything runs against the memory catalog, the memory content store
//! and canned fetch responses:
//! 1. Run accounting across repeated runs
//! 2. Gazette indexes harvested end to end
//! 3. Dispatcher retries and retention
//! 4. Concurrent writers on one document identity

use chrono::{Duration, TimeZone, Utc};
use harvester::{
    testing::{FlakyCatalog, ManualClock, MockFetcher, ScriptStep, ScriptedAdapter},
    AdapterRegistry, Candidate, Clock, Decision, DocumentFilter, Dispatcher, DocumentCatalog,
    FsContentStore, MemoryCatalog, MemoryContentStore, NewSource, NoPause, Reconciler,
    RetryPolicy, RunController, RunFilter, RunLog, RunStatus, Source, SourceCatalog,
};
use std::sync::Arc;

const ORIGIN: &str = "https://www.example.gov/rulings";

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap())
}

fn controller(
    catalog: Arc<MemoryCatalog>,
    adapter: Arc<ScriptedAdapter>,
    clock: &ManualClock,
) -> RunController {
    RunController::new(
        catalog,
        Arc::new(MemoryContentStore::new()),
        AdapterRegistry::builder().register_arc(adapter).build(),
        Arc::new(MockFetcher::new()),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_pacer(Arc::new(NoPause))
}

async fn add_source(catalog: &MemoryCatalog, name: &str, adapter: &str, clock: &ManualClock) -> Source {
    catalog
        .upsert_source(&NewSource::new(name, ORIGIN, adapter), clock.now())
        .await
        .unwrap()
}

fn html(id: &str, body: &str) -> Candidate {
    Candidate::new(id, id, format!("{ORIGIN}/{id}"), body).with_content_type("text/html")
}

#[tokio::test]
async fn test_new_document_then_unchanged_on_second_run() {
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let adapter = Arc::new(
        ScriptedAdapter::new("scripted")
            .accept(html("A", "<p>alpha</p>"))
            .reject("B", format!("{ORIGIN}/B"), 502),
    );
    let controller = controller(catalog.clone(), adapter.clone(), &clock);
    let source = add_source(&catalog, "S", "scripted", &clock).await;

    let first = controller.run(&source).await.unwrap();
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!((first.counts.new, first.counts.failed), (1, 1));
    assert_eq!(
        first.message,
        "Harvest completed: 1 documents stored (0 unchanged, 1 failed)"
    );

    adapter.set_steps(vec![ScriptStep::Accept(html("A", "<p>alpha</p>"))]);
    clock.advance(Duration::days(1));
    let second = controller.run(&source).await.unwrap();
    assert_eq!(second.counts.unchanged, 1);
    assert_eq!(second.counts.total(), 1);

    let docs = catalog
        .list_documents(&DocumentFilter::for_source(source.id))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].external_id, "A");
    assert_eq!(docs[0].version, 1);
}

#[tokio::test]
async fn test_run_records_balance_and_time() {
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let adapter = Arc::new(
        ScriptedAdapter::new("scripted")
            .accept(html("a", "1"))
            .accept(html("b", "2"))
            .reject("c", format!("{ORIGIN}/c"), 404),
    );
    let controller = controller(catalog.clone(), adapter.clone(), &clock);
    let source = add_source(&catalog, "balanced", "scripted", &clock).await;

    controller.run(&source).await.unwrap();
    adapter.set_steps(vec![
        ScriptStep::Accept(html("a", "1")),
        ScriptStep::Accept(html("b", "2 changed")),
    ]);
    adapter.set_failure(Some("index went away".into()));
    clock.advance(Duration::hours(30));
    let failed = controller.run(&source).await.unwrap();
    assert_eq!(failed.status, RunStatus::Error);
    assert_eq!((failed.counts.unchanged, failed.counts.updated), (1, 1));

    let runs = catalog.list_runs(&RunFilter::for_source(source.id)).await.unwrap();
    assert_eq!(runs.len(), 2);
    for run in &runs {
        let finished = run.finished_at.unwrap();
        assert!(run.status.is_final());
        assert_eq!(run.duration_ms, Some((finished - run.started_at).num_milliseconds()));
        assert_eq!(
            run.counts.total(),
            run.counts.new + run.counts.updated + run.counts.unchanged + run.counts.failed
        );
    }
    assert!(runs[0].error_detail.contains("index went away"));
    assert_eq!(runs[1].counts.new, 2);
}

#[tokio::test]
async fn test_gazette_harvest_creates_then_updates() {
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let fetcher = MockFetcher::new()
        .with_page(
            format!("{ORIGIN}/2024"),
            r#"<a href="/rulings/2024/sc-12.html">Solução de Consulta nº 12</a>
               <a href="sc-7.html">Solução de Consulta nº 7/2023</a>
               <a href="/rulings/faq">Perguntas frequentes</a>"#,
        )
        .with_page("https://www.example.gov/rulings/2024/sc-12.html", "<p>twelve</p>")
        .with_page(format!("{ORIGIN}/sc-7.html"), "<p>seven</p>");
    let controller = RunController::new(
        catalog.clone(),
        Arc::new(MemoryContentStore::new()),
        AdapterRegistry::with_defaults(),
        Arc::new(fetcher.clone()),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_pacer(Arc::new(NoPause));
    let source = add_source(&catalog, "Tax Rulings", "gazette", &clock).await;

    let first = controller.run(&source).await.unwrap();
    assert!(first.success);
    assert_eq!(first.counts.new, 2);

    let run = catalog.get_run(first.run_id).await.unwrap().unwrap();
    assert_eq!(run.metadata["adapter"], "gazette");
    assert_eq!(run.metadata["harvest"]["skipped_buckets"][0]["year"], 2023);

    let twelve = catalog
        .find_document(source.id, "cosit_2024_0012")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(twelve.external_number.as_deref(), Some("12/2024"));
    assert_eq!(twelve.storage_path, "tax_rulings/2024/06/cosit_2024_0012.html");
    assert!(catalog
        .find_document(source.id, "cosit_2023_0007")
        .await
        .unwrap()
        .is_some());

    fetcher.set_page("https://www.example.gov/rulings/2024/sc-12.html", "<p>twelve, amended</p>");
    clock.advance(Duration::days(1));
    let second = controller.run(&source).await.unwrap();
    assert_eq!((second.counts.updated, second.counts.unchanged), (1, 1));

    let amended = catalog.get_document(twelve.id).await.unwrap().unwrap();
    assert_eq!(amended.version, 2);
    assert_eq!(fetcher.last_user_agent().as_deref(), Some("DocumentHarvester/1.0"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_then_succeed() {
    let memory = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let source = add_source(&memory, "flaky", "scripted", &clock).await;
    let flaky = Arc::new(FlakyCatalog::new(memory.clone(), 2));
    let controller = RunController::new(
        flaky.clone(),
        Arc::new(MemoryContentStore::new()),
        AdapterRegistry::builder()
            .register(ScriptedAdapter::new("scripted").accept(html("a", "1")))
            .build(),
        Arc::new(MockFetcher::new()),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_pacer(Arc::new(NoPause));

    let summary = Dispatcher::new(controller).start_run(source.id).await;

    assert!(summary.success, "{summary:?}");
    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.counts.new, 1);
    assert_eq!(flaky.remaining_failures(), 0);
    assert_eq!(memory.run_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_return_terminal_summary() {
    let memory = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let source = add_source(&memory, "down", "scripted", &clock).await;
    let flaky = Arc::new(FlakyCatalog::new(memory.clone(), 10));
    let controller = RunController::new(
        flaky.clone(),
        Arc::new(MemoryContentStore::new()),
        AdapterRegistry::builder()
            .register(ScriptedAdapter::new("scripted"))
            .build(),
        Arc::new(MockFetcher::new()),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_pacer(Arc::new(NoPause));

    let started = tokio::time::Instant::now();
    let summary = Dispatcher::new(controller).start_run(source.id).await;

    assert!(!summary.success);
    assert_eq!(summary.attempts, RetryPolicy::default().max_attempts());
    assert!(summary
        .error
        .as_deref()
        .unwrap()
        .starts_with("Maximum retries exceeded: storage error"));
    assert_eq!(flaky.remaining_failures(), 6);
    assert!(started.elapsed() >= std::time::Duration::from_secs(900));
    assert_eq!(memory.run_count(), 0);
}

#[tokio::test]
async fn test_business_failures_are_not_retried() {
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let adapter = Arc::new(ScriptedAdapter::new("scripted").invalid("missing index path"));
    let dispatcher = Dispatcher::new(controller(catalog.clone(), adapter.clone(), &clock));
    let source = add_source(&catalog, "misconfigured", "scripted", &clock).await;

    let summary = dispatcher.start_run(source.id).await;

    assert_eq!(summary.attempts, 1);
    assert!(summary.error.unwrap().contains("missing index path"));
    assert_eq!(adapter.harvest_calls(), 0);
    assert_eq!(catalog.run_count(), 0);

    let by_name = dispatcher.run_source_by_name("nope").await;
    assert!(by_name.is_err());
}

#[tokio::test]
async fn test_purge_keeps_recent_runs() {
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let adapter = Arc::new(ScriptedAdapter::new("scripted"));
    let dispatcher = Dispatcher::new(controller(catalog.clone(), adapter, &clock));
    let source = add_source(&catalog, "old", "scripted", &clock).await;

    for _ in 0..3 {
        dispatcher.start_run(source.id).await;
        clock.advance(Duration::days(50));
    }

    // Runs started 150, 100 and 50 days ago.
    let summary = dispatcher.purge_old_runs(90).await;
    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.cutoff, clock.now() - Duration::days(90));
    assert_eq!(catalog.run_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_writers_share_one_record() {
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let source = add_source(&catalog, "race", "scripted", &clock).await;
    let reconciler = Reconciler::new(
        catalog.clone(),
        Arc::new(MemoryContentStore::new()),
        Arc::new(clock.clone()),
    );

    let handles: Vec<_> = ["<p>one</p>", "<p>two</p>"]
        .into_iter()
        .map(|body| {
            let reconciler = reconciler.clone();
            let source = source.clone();
            tokio::spawn(async move { reconciler.reconcile(&source, &html("same", body)).await })
        })
        .collect();

    let mut decisions = Vec::new();
    for handle in handles {
        decisions.push(handle.await.unwrap());
    }

    assert!(decisions.iter().all(|d| !d.is_failed()), "{decisions:?}");
    assert_eq!(
        decisions.iter().filter(|d| matches!(d, Decision::Created(_))).count(),
        1
    );
    assert_eq!(catalog.document_count(), 1);

    let record = catalog.find_document(source.id, "same").await.unwrap().unwrap();
    assert!(record.version <= 2);
}

#[tokio::test]
async fn test_stored_file_matches_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = clock();
    let source = add_source(&catalog, "Disk Source", "scripted", &clock).await;
    let reconciler = Reconciler::new(
        catalog.clone(),
        Arc::new(FsContentStore::new(dir.path())),
        Arc::new(clock.clone()),
    );

    let latin1 = html("doc", "").with_content_type("text/html; charset=iso-8859-1");
    let latin1 = Candidate {
        content: b"<p>Solu\xe7\xe3o</p>".to_vec(),
        ..latin1
    };
    let Decision::Created(record) = reconciler.reconcile(&source, &latin1).await else {
        panic!("expected created");
    };

    let on_disk = tokio::fs::read(&record.storage_path).await.unwrap();
    assert_eq!(on_disk, "<p>Solução</p>".as_bytes());
    assert_eq!(harvester::fingerprint(&on_disk), record.fingerprint);
    assert!(record
        .storage_path
        .ends_with("disk_source/2024/06/doc.html"));
}
