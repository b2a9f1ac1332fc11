//! In-memory catalog for tests, dry runs and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::{
    DocumentCatalog, DocumentFilter, InsertOutcome, RunFilter, RunLog, SourceCatalog, SourceFilter,
};
use crate::types::{
    document::{DocumentRecord, DocumentUpdate, NewDocument},
    run::{RunFinalization, RunRecord},
    source::{NewSource, Source, SourceStatus},
};

#[derive(Default)]
struct State {
    sources: HashMap<Uuid, Source>,
    documents: HashMap<Uuid, DocumentRecord>,
    /// (source_id, external_id) -> document id
    identities: HashMap<(Uuid, String), Uuid>,
    runs: HashMap<Uuid, RunRecord>,
}

/// In-memory catalog.
///
/// All three catalogs share one lock, so cascades and finalization are
/// atomic. Data is lost when the value is dropped.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::poisoned())
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::poisoned())
    }

    pub fn document_count(&self) -> usize {
        self.read().map(|s| s.documents.len()).unwrap_or(0)
    }

    pub fn run_count(&self) -> usize {
        self.read().map(|s| s.runs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SourceCatalog for MemoryCatalog {
    async fn upsert_source(&self, source: &NewSource, now: DateTime<Utc>) -> StoreResult<Source> {
        let mut state = self.write()?;

        if let Some(existing) = state.sources.values_mut().find(|s| s.name == source.name) {
            existing.description = source.description.clone();
            existing.kind = source.kind;
            existing.origin = source.origin.clone();
            existing.adapter = source.adapter.clone();
            existing.cadence = source.cadence.clone();
            existing.settings = source.settings.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let created = source.clone().into_source(now);
        state.sources.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        Ok(self.read()?.sources.get(&id).cloned())
    }

    async fn get_source_by_name(&self, name: &str) -> StoreResult<Option<Source>> {
        Ok(self
            .read()?
            .sources
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn list_sources(&self, filter: &SourceFilter) -> StoreResult<Vec<Source>> {
        let mut sources: Vec<Source> = self
            .read()?
            .sources
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    async fn set_source_state(
        &self,
        id: Uuid,
        active: bool,
        status: SourceStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Source> {
        let mut state = self.write()?;
        let source = state
            .sources
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("source", id))?;
        source.active = active;
        source.status = status;
        source.updated_at = now;
        Ok(source.clone())
    }

    async fn delete_source(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.write()?;
        if state.sources.remove(&id).is_none() {
            return Ok(false);
        }
        state.documents.retain(|_, d| d.source_id != id);
        state.identities.retain(|(source_id, _), _| *source_id != id);
        state.runs.retain(|_, r| r.source_id != id);
        Ok(true)
    }
}

#[async_trait]
impl DocumentCatalog for MemoryCatalog {
    async fn find_document(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<DocumentRecord>> {
        let state = self.read()?;
        Ok(state
            .identities
            .get(&(source_id, external_id.to_string()))
            .and_then(|id| state.documents.get(id))
            .cloned())
    }

    async fn get_document(&self, id: Uuid) -> StoreResult<Option<DocumentRecord>> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn insert_document(&self, doc: NewDocument) -> StoreResult<InsertOutcome> {
        let mut state = self.write()?;
        if !state.sources.contains_key(&doc.source_id) {
            return Err(StoreError::not_found("source", doc.source_id));
        }

        let key = (doc.source_id, doc.external_id.clone());
        if let Some(existing) = state.identities.get(&key).and_then(|id| state.documents.get(id)) {
            return Ok(InsertOutcome::Conflict(existing.clone()));
        }

        let record = doc.into_record();
        state.identities.insert(key, record.id);
        state.documents.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn update_document(&self, update: &DocumentUpdate) -> StoreResult<Option<DocumentRecord>> {
        let mut state = self.write()?;
        let current = state
            .documents
            .get_mut(&update.id)
            .ok_or_else(|| StoreError::not_found("document", update.id))?;

        if current.version != update.expected_version {
            return Ok(None);
        }

        let next = update.apply_to(current);
        *current = next.clone();
        Ok(Some(next))
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentRecord>> {
        let mut docs: Vec<DocumentRecord> = self
            .read()?
            .documents
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.external_id.cmp(&b.external_id)));
        if let Some(limit) = filter.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }
}

#[async_trait]
impl RunLog for MemoryCatalog {
    async fn open_run(&self, source_id: Uuid, started_at: DateTime<Utc>) -> StoreResult<RunRecord> {
        let mut state = self.write()?;
        if !state.sources.contains_key(&source_id) {
            return Err(StoreError::not_found("source", source_id));
        }
        let run = RunRecord::open(source_id, started_at);
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn finalize_run(&self, finalization: &RunFinalization) -> StoreResult<RunRecord> {
        let mut state = self.write()?;
        let run = state
            .runs
            .get_mut(&finalization.run_id)
            .ok_or_else(|| StoreError::not_found("run", finalization.run_id))?;

        if run.is_finalized() {
            return Err(StoreError::AlreadyFinalized {
                run_id: finalization.run_id,
            });
        }
        run.apply(finalization);
        let run = run.clone();

        if let Some(source) = state.sources.get_mut(&run.source_id) {
            source.last_harvest_at = Some(finalization.finished_at);
            source.next_eligible_at = Some(finalization.next_eligible_at);
        }
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<RunRecord>> {
        Ok(self.read()?.runs.get(&id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .read()?
            .runs
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn purge_runs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.write()?;
        let before = state.runs.len();
        state
            .runs
            .retain(|_, r| r.started_at >= cutoff);
        Ok((before - state.runs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::DocumentKind;
    use crate::types::run::{RunCounts, RunStatus};
    use chrono::Duration;

    fn new_doc(source_id: Uuid, external_id: &str, now: DateTime<Utc>) -> NewDocument {
        NewDocument {
            source_id,
            external_id: external_id.into(),
            title: "t".into(),
            kind: DocumentKind::Ruling,
            origin_url: "https://example.gov/x".into(),
            fingerprint: "ff".into(),
            storage_path: "s/2024/01/x.html".into(),
            size_bytes: 1,
            metadata: Default::default(),
            created_at: now,
        }
    }

    fn finalization(run: &RunRecord, at: DateTime<Utc>) -> RunFinalization {
        RunFinalization {
            run_id: run.id,
            status: RunStatus::Success,
            finished_at: at,
            counts: RunCounts::default(),
            message: "ok".into(),
            error_detail: String::new(),
            metadata: serde_json::json!({}),
            next_eligible_at: at + Duration::days(1),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity_and_schedule() {
        let catalog = MemoryCatalog::new();
        let now = Utc::now();
        let first = catalog
            .upsert_source(&NewSource::new("a", "https://example.gov", "gazette"), now)
            .await
            .unwrap();

        let run = catalog.open_run(first.id, now).await.unwrap();
        catalog.finalize_run(&finalization(&run, now)).await.unwrap();

        let second = catalog
            .upsert_source(
                &NewSource::new("a", "https://example.gov/v2", "gazette").with_cadence("weekly"),
                now,
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.origin, "https://example.gov/v2");
        assert_eq!(second.cadence, "weekly");
        assert_eq!(second.last_harvest_at, Some(now));
    }

    #[tokio::test]
    async fn test_insert_conflict_returns_existing() {
        let catalog = MemoryCatalog::new();
        let now = Utc::now();
        let source = catalog
            .upsert_source(&NewSource::new("a", "https://example.gov", "gazette"), now)
            .await
            .unwrap();

        let InsertOutcome::Inserted(first) = catalog
            .insert_document(new_doc(source.id, "id-1", now))
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        let InsertOutcome::Conflict(existing) = catalog
            .insert_document(new_doc(source.id, "id-1", now))
            .await
            .unwrap()
        else {
            panic!("expected conflict");
        };

        assert_eq!(first.id, existing.id);
        assert_eq!(catalog.document_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let catalog = MemoryCatalog::new();
        let now = Utc::now();
        let source = catalog
            .upsert_source(&NewSource::new("a", "https://example.gov", "gazette"), now)
            .await
            .unwrap();
        let InsertOutcome::Inserted(doc) = catalog
            .insert_document(new_doc(source.id, "id-1", now))
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };

        let update = DocumentUpdate {
            id: doc.id,
            expected_version: 1,
            title: "t2".into(),
            origin_url: doc.origin_url.clone(),
            fingerprint: "ee".into(),
            storage_path: doc.storage_path.clone(),
            size_bytes: 2,
            metadata: Default::default(),
            updated_at: now,
        };
        assert_eq!(catalog.update_document(&update).await.unwrap().unwrap().version, 2);
        assert!(catalog.update_document(&update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finalize_exactly_once() {
        let catalog = MemoryCatalog::new();
        let now = Utc::now();
        let source = catalog
            .upsert_source(&NewSource::new("a", "https://example.gov", "gazette"), now)
            .await
            .unwrap();
        let run = catalog.open_run(source.id, now).await.unwrap();
        let end = now + Duration::seconds(3);

        let closed = catalog.finalize_run(&finalization(&run, end)).await.unwrap();
        assert_eq!(closed.duration(), Some(Duration::seconds(3)));

        let again = catalog.finalize_run(&finalization(&run, end + Duration::seconds(1))).await;
        assert!(matches!(again, Err(StoreError::AlreadyFinalized { .. })));
        let stored = catalog.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.finished_at, Some(end));

        let source = catalog.get_source(source.id).await.unwrap().unwrap();
        assert_eq!(source.last_harvest_at, Some(end));
        assert_eq!(source.next_eligible_at, Some(end + Duration::days(1)));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_purge_drops_abandoned_runs() {
        let catalog = MemoryCatalog::new();
        let now = Utc::now();
        let source = catalog
            .upsert_source(&NewSource::new("a", "https://example.gov", "gazette"), now)
            .await
            .unwrap();
        let old = now - Duration::days(120);
        let closed = catalog.open_run(source.id, old).await.unwrap();
        catalog.finalize_run(&finalization(&closed, old)).await.unwrap();
        catalog.open_run(source.id, old).await.unwrap();
        catalog.open_run(source.id, now).await.unwrap();

        // The old open run never finalized; it goes with the closed one.
        assert_eq!(catalog.purge_runs_before(now - Duration::days(90)).await.unwrap(), 2);
        assert_eq!(catalog.run_count(), 1);

        catalog.insert_document(new_doc(source.id, "id-1", now)).await.unwrap();
        assert!(catalog.delete_source(source.id).await.unwrap());
        assert_eq!(catalog.document_count(), 0);
        assert_eq!(catalog.run_count(), 0);
        assert!(catalog.find_document(source.id, "id-1").await.unwrap().is_none());
        assert!(!catalog.delete_source(source.id).await.unwrap());
    }
}
