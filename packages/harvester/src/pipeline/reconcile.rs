//! Document reconciliation.
//!
//! Turns one candidate into a catalog decision:
//!
//! | catalog state                | action                                   | decision    |
//! |------------------------------|------------------------------------------|-------------|
//! | no record                    | store content, insert version 1          | `Created`   |
//! | record, same fingerprint     | nothing                                  | `Unchanged` |
//! | record, different fingerprint| store content, bump version by one       | `Updated`   |
//! | any storage error            | prior state left in place                | `Failed`    |
//!
//! Content is always written before metadata. Concurrent writers are
//! resolved by the catalog's unique identity and version checks: a lost
//! race re-reads the record and decides again.

use chrono::Datelike;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::fingerprint::{canonicalize, Canonical};
use crate::traits::{
    clock::Clock,
    store::{Catalog, ContentStore, InsertOutcome},
};
use crate::types::{
    content::{ContentKey, StoredContent},
    document::{Candidate, DocumentRecord, DocumentUpdate, NewDocument},
    source::Source,
};

/// Attempts before a contended document is reported as failed.
const MAX_ATTEMPTS: usize = 3;

/// Outcome of reconciling one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Created(DocumentRecord),
    Updated(DocumentRecord),
    Unchanged(DocumentRecord),
    Failed(String),
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Created(_) => "created",
            Decision::Updated(_) => "updated",
            Decision::Unchanged(_) => "unchanged",
            Decision::Failed(_) => "failed",
        }
    }

    pub fn record(&self) -> Option<&DocumentRecord> {
        match self {
            Decision::Created(r) | Decision::Updated(r) | Decision::Unchanged(r) => Some(r),
            Decision::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Decision::Failed(_))
    }
}

/// Applies create/update/skip decisions against the catalog and content store.
#[derive(Clone)]
pub struct Reconciler {
    catalog: Arc<dyn Catalog>,
    content: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(catalog: Arc<dyn Catalog>, content: Arc<dyn ContentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            content,
            clock,
        }
    }

    /// Reconcile one candidate. Never returns an error: storage failures
    /// become `Decision::Failed`.
    pub async fn reconcile(&self, source: &Source, candidate: &Candidate) -> Decision {
        match self.try_reconcile(source, candidate).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    source = %source.name,
                    external_id = %candidate.external_id,
                    error = %e,
                    "reconcile failed"
                );
                Decision::Failed(e.to_string())
            }
        }
    }

    async fn try_reconcile(&self, source: &Source, candidate: &Candidate) -> StoreResult<Decision> {
        let canonical = canonicalize(&candidate.content, candidate.content_type.as_deref());

        for attempt in 1..=MAX_ATTEMPTS {
            let existing = self
                .catalog
                .find_document(source.id, &candidate.external_id)
                .await?;

            match existing {
                None => {
                    let stored = self.store(source, candidate, &canonical).await?;
                    let doc = NewDocument {
                        source_id: source.id,
                        external_id: candidate.external_id.clone(),
                        title: candidate.title.clone(),
                        kind: candidate.kind,
                        origin_url: candidate.origin_url.clone(),
                        fingerprint: canonical.fingerprint.clone(),
                        storage_path: stored.path,
                        size_bytes: stored.size_bytes,
                        metadata: candidate.metadata.clone(),
                        created_at: self.clock.now(),
                    };

                    match self.catalog.insert_document(doc).await? {
                        InsertOutcome::Inserted(record) => {
                            info!(
                                source = %source.name,
                                external_id = %record.external_id,
                                "document created"
                            );
                            return Ok(Decision::Created(record));
                        }
                        InsertOutcome::Conflict(_) => {
                            debug!(external_id = %candidate.external_id, attempt, "insert raced, re-evaluating");
                        }
                    }
                }
                Some(record) if record.fingerprint == canonical.fingerprint => {
                    debug!(
                        source = %source.name,
                        external_id = %record.external_id,
                        version = record.version,
                        "document unchanged"
                    );
                    return Ok(Decision::Unchanged(record));
                }
                Some(record) => {
                    if let Some(updated) = self.update(source, candidate, &canonical, &record).await? {
                        info!(
                            source = %source.name,
                            external_id = %updated.external_id,
                            version = updated.version,
                            "document updated"
                        );
                        return Ok(Decision::Updated(updated));
                    }
                    debug!(external_id = %candidate.external_id, attempt, "update raced, re-evaluating");
                }
            }
        }

        Err(StoreError::Corrupt(format!(
            "document {} still contended after {MAX_ATTEMPTS} attempts",
            candidate.external_id
        )))
    }

    /// Store new content and move the record to the next version.
    ///
    /// If the catalog write fails, content overwritten in place is put back.
    /// Stores may root paths anywhere, so only the relative tail is compared.
    async fn update(
        &self,
        source: &Source,
        candidate: &Candidate,
        canonical: &Canonical,
        record: &DocumentRecord,
    ) -> StoreResult<Option<DocumentRecord>> {
        let key = self.key(source, candidate);
        let previous = if record.storage_path.ends_with(&key.relative_path()) {
            self.content.get(&record.storage_path).await.ok()
        } else {
            None
        };

        let stored = self.content.put(&key, &canonical.bytes).await?;
        let update = DocumentUpdate {
            id: record.id,
            expected_version: record.version,
            title: candidate.title.clone(),
            origin_url: candidate.origin_url.clone(),
            fingerprint: canonical.fingerprint.clone(),
            storage_path: stored.path,
            size_bytes: stored.size_bytes,
            metadata: candidate.metadata.clone(),
            updated_at: self.clock.now(),
        };

        match self.catalog.update_document(&update).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Some(bytes) = previous {
                    if let Err(restore) = self.content.put(&key, &bytes).await {
                        warn!(path = %record.storage_path, error = %restore, "failed to restore previous content");
                    }
                }
                Err(e)
            }
        }
    }

    async fn store(
        &self,
        source: &Source,
        candidate: &Candidate,
        canonical: &Canonical,
    ) -> StoreResult<StoredContent> {
        self.content.put(&self.key(source, candidate), &canonical.bytes).await
    }

    fn key(&self, source: &Source, candidate: &Candidate) -> ContentKey {
        let now = self.clock.now();
        ContentKey::new(
            source.slug(),
            now.year(),
            now.month(),
            candidate.external_id.clone(),
            candidate.extension(),
        )
    }
}
