//! Test doubles for the harvester seams.
//!
//! Everything here is deterministic and network-free:
//! - `MockFetcher`: canned responses keyed by URL, with a call log
//! - `ManualClock`: time that only moves when told to
//! - `RecordingPacer`: records pauses instead of sleeping
//! - `ScriptedAdapter`: emits a fixed list of candidates and failures
//! - `VecSink`: collects what an adapter emits
//! - `FailingContentStore` / `FlakyCatalog`: fault injection

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{FetchError, FetchResult, HarvestError, Result, StoreError, StoreResult};
use crate::throttle::{DelayRange, Pacer};
use crate::traits::{
    adapter::{CandidateFailure, CandidateSink, HarvestContext, HarvestReport, SourceAdapter},
    clock::Clock,
    fetcher::{FetchOptions, FetchedResource, Fetcher},
    store::{
        ContentStore, DocumentCatalog, DocumentFilter, InsertOutcome, RunFilter, RunLog,
        SourceCatalog, SourceFilter,
    },
};
use crate::types::{
    content::{ContentKey, StoredContent},
    document::{Candidate, DocumentRecord, DocumentUpdate, NewDocument},
    run::{RunFinalization, RunRecord},
    source::{NewSource, Source, SourceStatus},
};

#[derive(Debug, Clone)]
enum MockResponse {
    Resource(FetchedResource),
    Status(u16),
    Timeout,
}

#[derive(Debug, Default)]
struct MockFetcherState {
    responses: HashMap<String, MockResponse>,
    calls: Vec<String>,
    user_agents: Vec<String>,
}

/// Fetcher with canned responses. Unknown URLs answer 404.
///
/// Clones share state, so a test can keep a handle after handing one to
/// the controller and change responses between runs.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    state: Arc<Mutex<MockFetcherState>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.set_page(url, body);
        self
    }

    pub fn with_resource(self, resource: FetchedResource) -> Self {
        self.insert(resource.url.clone(), MockResponse::Resource(resource));
        self
    }

    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.insert(url.into(), MockResponse::Status(status));
        self
    }

    pub fn with_timeout(self, url: impl Into<String>) -> Self {
        self.insert(url.into(), MockResponse::Timeout);
        self
    }

    /// Replace the response for `url` with an HTML page.
    pub fn set_page(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        let url = url.into();
        let resource = FetchedResource::new(url.clone(), body).with_content_type("text/html; charset=utf-8");
        self.insert(url, MockResponse::Resource(resource));
    }

    pub fn set_status(&self, url: impl Into<String>, status: u16) {
        self.insert(url.into(), MockResponse::Status(status));
    }

    fn insert(&self, url: String, response: MockResponse) {
        if let Ok(mut state) = self.state.lock() {
            state.responses.insert(url, response);
        }
    }

    /// Every URL requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }

    pub fn last_user_agent(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.user_agents.last().cloned())
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedResource> {
        let response = {
            let mut state = self.state.lock().map_err(|_| FetchError::InvalidUrl {
                url: url.to_string(),
            })?;
            state.calls.push(url.to_string());
            state.responses.get(url).cloned()
        };

        match response {
            Some(MockResponse::Resource(resource)) => Ok(resource),
            Some(MockResponse::Status(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            Some(MockResponse::Timeout) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn fetch_with(&self, url: &str, options: &FetchOptions) -> FetchResult<FetchedResource> {
        if let Ok(mut state) = self.state.lock() {
            state.user_agents.push(options.user_agent.clone());
        }
        self.fetch(url).await
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|g| *g).unwrap_or_else(|p| *p.into_inner())
    }
}

/// Pacer that records each requested pause and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    pauses: Mutex<Vec<DelayRange>>,
}

impl RecordingPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> Vec<DelayRange> {
        self.pauses.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, range: DelayRange) {
        if let Ok(mut pauses) = self.pauses.lock() {
            pauses.push(range);
        }
    }
}

/// Sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct VecSink {
    pub accepted: Vec<Candidate>,
    pub rejected: Vec<CandidateFailure>,
}

#[async_trait]
impl CandidateSink for VecSink {
    async fn accept(&mut self, candidate: Candidate) {
        self.accepted.push(candidate);
    }

    async fn reject(&mut self, failure: CandidateFailure) {
        self.rejected.push(failure);
    }
}

/// One thing a [`ScriptedAdapter`] emits.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Accept(Candidate),
    Reject {
        external_id: String,
        origin_url: String,
        status: u16,
    },
}

/// Adapter that replays a script instead of crawling.
pub struct ScriptedAdapter {
    selector: String,
    steps: Mutex<Vec<ScriptStep>>,
    failure: Mutex<Option<String>>,
    invalid: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            steps: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            invalid: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn accept(self, candidate: Candidate) -> Self {
        self.push(ScriptStep::Accept(candidate));
        self
    }

    pub fn reject(self, external_id: impl Into<String>, origin_url: impl Into<String>, status: u16) -> Self {
        self.push(ScriptStep::Reject {
            external_id: external_id.into(),
            origin_url: origin_url.into(),
            status,
        });
        self
    }

    /// Fail the pass with a run error after emitting the script.
    pub fn failing_with(self, message: impl Into<String>) -> Self {
        self.set_failure(Some(message.into()));
        self
    }

    /// Reject every source in validation.
    pub fn invalid(mut self, reason: impl Into<String>) -> Self {
        self.invalid = Some(reason.into());
        self
    }

    pub fn set_steps(&self, steps: Vec<ScriptStep>) {
        if let Ok(mut guard) = self.steps.lock() {
            *guard = steps;
        }
    }

    pub fn set_failure(&self, failure: Option<String>) {
        if let Ok(mut guard) = self.failure.lock() {
            *guard = failure;
        }
    }

    /// Number of harvest passes so far.
    pub fn harvest_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, step: ScriptStep) {
        if let Ok(mut guard) = self.steps.lock() {
            guard.push(step);
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn selector(&self) -> &str {
        &self.selector
    }

    fn validate(&self, _source: &Source) -> std::result::Result<(), String> {
        match &self.invalid {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    async fn harvest(
        &self,
        _source: &Source,
        ctx: &HarvestContext<'_>,
        sink: &mut dyn CandidateSink,
    ) -> Result<HarvestReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let steps = self.steps.lock().map(|s| s.clone()).unwrap_or_default();
        let failure = self.failure.lock().ok().and_then(|f| f.clone());

        let mut attempted = 0;
        for step in steps {
            if ctx.is_cancelled() {
                break;
            }
            attempted += 1;
            match step {
                ScriptStep::Accept(candidate) => sink.accept(candidate).await,
                ScriptStep::Reject {
                    external_id,
                    origin_url,
                    status,
                } => {
                    sink.reject(CandidateFailure {
                        error: FetchError::Status {
                            url: origin_url.clone(),
                            status,
                        },
                        external_id,
                        origin_url,
                    })
                    .await
                }
            }
        }

        match failure {
            Some(message) => Err(HarvestError::Run(message)),
            None => Ok(HarvestReport::new(attempted)),
        }
    }
}

/// Content store whose puts always fail.
#[derive(Debug, Default)]
pub struct FailingContentStore;

#[async_trait]
impl ContentStore for FailingContentStore {
    async fn put(&self, _key: &ContentKey, _bytes: &[u8]) -> StoreResult<StoredContent> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        Err(StoreError::not_found("content", path))
    }
}

/// Catalog wrapper whose first `n` `open_run` calls fail with an I/O error.
///
/// `with_failing_updates` makes `update_document` fail the same way.
pub struct FlakyCatalog<C> {
    inner: Arc<C>,
    remaining_failures: AtomicU32,
    failing_updates: AtomicU32,
}

impl<C> FlakyCatalog<C> {
    pub fn new(inner: Arc<C>, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
            failing_updates: AtomicU32::new(0),
        }
    }

    pub fn with_failing_updates(self, failures: u32) -> Self {
        self.failing_updates.store(failures, Ordering::SeqCst);
        self
    }

    pub fn remaining_failures(&self) -> u32 {
        self.remaining_failures.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicU32) -> StoreResult<()> {
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
        Ok(_) => Err(StoreError::Io(std::io::Error::other("catalog unavailable"))),
        Err(_) => Ok(()),
    }
}

#[async_trait]
impl<C: SourceCatalog> SourceCatalog for FlakyCatalog<C> {
    async fn upsert_source(&self, source: &NewSource, now: DateTime<Utc>) -> StoreResult<Source> {
        self.inner.upsert_source(source, now).await
    }

    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        self.inner.get_source(id).await
    }

    async fn get_source_by_name(&self, name: &str) -> StoreResult<Option<Source>> {
        self.inner.get_source_by_name(name).await
    }

    async fn list_sources(&self, filter: &SourceFilter) -> StoreResult<Vec<Source>> {
        self.inner.list_sources(filter).await
    }

    async fn set_source_state(
        &self,
        id: Uuid,
        active: bool,
        status: SourceStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Source> {
        self.inner.set_source_state(id, active, status, now).await
    }

    async fn delete_source(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_source(id).await
    }
}

#[async_trait]
impl<C: DocumentCatalog> DocumentCatalog for FlakyCatalog<C> {
    async fn find_document(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<DocumentRecord>> {
        self.inner.find_document(source_id, external_id).await
    }

    async fn get_document(&self, id: Uuid) -> StoreResult<Option<DocumentRecord>> {
        self.inner.get_document(id).await
    }

    async fn insert_document(&self, doc: NewDocument) -> StoreResult<InsertOutcome> {
        self.inner.insert_document(doc).await
    }

    async fn update_document(&self, update: &DocumentUpdate) -> StoreResult<Option<DocumentRecord>> {
        take_failure(&self.failing_updates)?;
        self.inner.update_document(update).await
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentRecord>> {
        self.inner.list_documents(filter).await
    }
}

#[async_trait]
impl<C: RunLog> RunLog for FlakyCatalog<C> {
    async fn open_run(&self, source_id: Uuid, started_at: DateTime<Utc>) -> StoreResult<RunRecord> {
        take_failure(&self.remaining_failures)?;
        self.inner.open_run(source_id, started_at).await
    }

    async fn finalize_run(&self, finalization: &RunFinalization) -> StoreResult<RunRecord> {
        self.inner.finalize_run(finalization).await
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<RunRecord>> {
        self.inner.get_run(id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>> {
        self.inner.list_runs(filter).await
    }

    async fn purge_runs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.purge_runs_before(cutoff).await
    }
}
