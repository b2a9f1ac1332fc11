//! Catalog and content storage traits.
//!
//! The catalog is split into focused traits:
//! - `SourceCatalog`: configured sources and their schedule state
//! - `DocumentCatalog`: one record per (source, external id)
//! - `RunLog`: audit records for every harvest run
//! - `Catalog`: composite trait combining all three
//!
//! Raw bytes live behind a separate [`ContentStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{
    content::{ContentKey, StoredContent},
    document::{DocumentKind, DocumentRecord, DocumentStatus, DocumentUpdate, NewDocument},
    run::{RunFinalization, RunRecord, RunStatus},
    source::{NewSource, Source, SourceStatus},
};

/// Filter for listing sources.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub active: Option<bool>,
    pub status: Option<SourceStatus>,
    pub adapter: Option<String>,
}

impl SourceFilter {
    pub fn matches(&self, source: &Source) -> bool {
        self.active.map_or(true, |a| source.active == a)
            && self.status.map_or(true, |s| source.status == s)
            && self.adapter.as_deref().map_or(true, |a| source.adapter == a)
    }
}

/// Filter for listing documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub source_id: Option<Uuid>,
    pub status: Option<DocumentStatus>,
    pub kind: Option<DocumentKind>,
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn for_source(source_id: Uuid) -> Self {
        Self {
            source_id: Some(source_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, doc: &DocumentRecord) -> bool {
        self.source_id.map_or(true, |id| doc.source_id == id)
            && self.status.map_or(true, |s| doc.status == s)
            && self.kind.map_or(true, |k| doc.kind == k)
    }
}

/// Filter for listing runs. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub source_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn for_source(source_id: Uuid) -> Self {
        Self {
            source_id: Some(source_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, run: &RunRecord) -> bool {
        self.source_id.map_or(true, |id| run.source_id == id)
            && self.status.map_or(true, |s| run.status == s)
    }
}

/// Result of inserting a first-sighting document.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(DocumentRecord),

    /// Another writer created the same (source, external id) first
    Conflict(DocumentRecord),
}

#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Create a source, or update the configuration of the one with the same name.
    ///
    /// Schedule state and operator state survive an update.
    async fn upsert_source(&self, source: &NewSource, now: DateTime<Utc>) -> StoreResult<Source>;

    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>>;

    async fn get_source_by_name(&self, name: &str) -> StoreResult<Option<Source>>;

    async fn list_sources(&self, filter: &SourceFilter) -> StoreResult<Vec<Source>>;

    /// Sources due for a harvest at `now`.
    async fn eligible_sources(&self, now: DateTime<Utc>) -> StoreResult<Vec<Source>> {
        let filter = SourceFilter {
            active: Some(true),
            status: Some(SourceStatus::Active),
            adapter: None,
        };
        Ok(self
            .list_sources(&filter)
            .await?
            .into_iter()
            .filter(|s| s.is_eligible(now))
            .collect())
    }

    /// Operator mutation of the active flag and status.
    async fn set_source_state(
        &self,
        id: Uuid,
        active: bool,
        status: SourceStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Source>;

    /// Delete a source with its documents and runs.
    ///
    /// Returns false if no such source existed.
    async fn delete_source(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn find_document(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<DocumentRecord>>;

    async fn get_document(&self, id: Uuid) -> StoreResult<Option<DocumentRecord>>;

    /// Insert a version-1 record unless (source, external id) already exists.
    async fn insert_document(&self, doc: NewDocument) -> StoreResult<InsertOutcome>;

    /// Apply `update` if the record is still at `update.expected_version`.
    ///
    /// Returns the new record, or `None` when another writer got there first.
    async fn update_document(&self, update: &DocumentUpdate) -> StoreResult<Option<DocumentRecord>>;

    async fn list_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentRecord>>;
}

#[async_trait]
pub trait RunLog: Send + Sync {
    /// Persist a new run in status `started`.
    async fn open_run(&self, source_id: Uuid, started_at: DateTime<Utc>) -> StoreResult<RunRecord>;

    /// Close a run and stamp its source's schedule in one step.
    ///
    /// Fails with `AlreadyFinalized` if the run was closed before.
    async fn finalize_run(&self, finalization: &RunFinalization) -> StoreResult<RunRecord>;

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<RunRecord>>;

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>>;

    /// Delete runs that started before `cutoff`, finalized or not.
    ///
    /// A run still `started` past the cutoff lost its finalize write and
    /// will never close. Returns the number of runs deleted.
    async fn purge_runs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Composite catalog used by the controller and dispatcher.
pub trait Catalog: SourceCatalog + DocumentCatalog + RunLog {}

impl<T: SourceCatalog + DocumentCatalog + RunLog> Catalog for T {}

/// Opaque put-by-path blob storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Write `bytes` at the key's deterministic location, replacing any
    /// previous content. A put either lands completely or not at all.
    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> StoreResult<StoredContent>;

    /// Read back content by the path returned from `put`.
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>>;
}
