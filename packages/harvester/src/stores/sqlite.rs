//! SQLite catalog.
//!
//! A file-based catalog using SQLite. Good for:
//! - Local operation of the `harvest` CLI
//! - Single-server deployments
//! - Integration tests (in-memory)
//!
//! Timestamps are stored as fixed-width RFC 3339 text so string order is
//! time order.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::{
    DocumentCatalog, DocumentFilter, InsertOutcome, RunFilter, RunLog, SourceCatalog, SourceFilter,
};
use crate::types::{
    document::{DocumentRecord, DocumentUpdate, NewDocument},
    run::{RunCounts, RunFinalization, RunRecord},
    source::{NewSource, Source, SourceSettings, SourceStatus},
};

const SOURCE_COLUMNS: &str = "id, name, description, kind, origin, adapter, cadence, active, status, \
     settings, last_harvest_at, next_eligible_at, created_at, updated_at";

const DOCUMENT_COLUMNS: &str = "id, source_id, external_id, title, kind, origin_url, fingerprint, \
     storage_path, size_bytes, version, published_on, issuer, external_number, status, created_at, updated_at";

const RUN_COLUMNS: &str = "id, source_id, status, started_at, finished_at, duration_ms, new_count, \
     updated_count, unchanged_count, failed_count, message, error_detail, metadata";

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Connect and create the schema if needed.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://harvest.db?mode=rwc` - File-based, created if missing
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is a separate database, so pin one.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let catalog = Self { pool };
        catalog.run_migrations().await?;
        Ok(catalog)
    }

    /// Create an in-memory catalog (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL,
                origin TEXT NOT NULL,
                adapter TEXT NOT NULL,
                cadence TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL,
                settings TEXT NOT NULL DEFAULT '{}',
                last_harvest_at TEXT,
                next_eligible_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                origin_url TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                version INTEGER NOT NULL,
                published_on TEXT,
                issuer TEXT,
                external_number TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (source_id, external_id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER,
                new_count INTEGER NOT NULL DEFAULT 0,
                updated_count INTEGER NOT NULL DEFAULT 0,
                unchanged_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                message TEXT NOT NULL DEFAULT '',
                error_detail TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_runs_source_started ON runs(source_id, started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_source(&self, column: &str, value: &str) -> StoreResult<Option<Source>> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE {column} = ?");
        let row = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SourceRow::into_source).transpose()
    }
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {value:?}: {e}")))
}

fn parse_opt_ts(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("invalid id {value:?}: {e}")))
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(StoreError::Corrupt)
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct SourceRow {
    id: String,
    name: String,
    description: String,
    kind: String,
    origin: String,
    adapter: String,
    cadence: String,
    active: bool,
    status: String,
    settings: String,
    last_harvest_at: Option<String>,
    next_eligible_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SourceRow {
    fn into_source(self) -> StoreResult<Source> {
        let settings: SourceSettings = serde_json::from_str(&self.settings)?;
        Ok(Source {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            kind: parse_enum(&self.kind)?,
            origin: self.origin,
            adapter: self.adapter,
            cadence: self.cadence,
            active: self.active,
            status: parse_enum(&self.status)?,
            settings,
            last_harvest_at: parse_opt_ts(self.last_harvest_at)?,
            next_eligible_at: parse_opt_ts(self.next_eligible_at)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    source_id: String,
    external_id: String,
    title: String,
    kind: String,
    origin_url: String,
    fingerprint: String,
    storage_path: String,
    size_bytes: i64,
    version: i64,
    published_on: Option<String>,
    issuer: Option<String>,
    external_number: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl DocumentRow {
    fn into_record(self) -> StoreResult<DocumentRecord> {
        let published_on = self
            .published_on
            .as_deref()
            .map(|d| {
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| StoreError::Corrupt(format!("invalid date {d:?}: {e}")))
            })
            .transpose()?;

        Ok(DocumentRecord {
            id: parse_uuid(&self.id)?,
            source_id: parse_uuid(&self.source_id)?,
            external_id: self.external_id,
            title: self.title,
            kind: parse_enum(&self.kind)?,
            origin_url: self.origin_url,
            fingerprint: self.fingerprint,
            storage_path: self.storage_path,
            size_bytes: self.size_bytes.max(0) as u64,
            version: self.version.max(0) as u32,
            published_on,
            issuer: self.issuer,
            external_number: self.external_number,
            status: parse_enum(&self.status)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    source_id: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    duration_ms: Option<i64>,
    new_count: i64,
    updated_count: i64,
    unchanged_count: i64,
    failed_count: i64,
    message: String,
    error_detail: String,
    metadata: String,
}

impl RunRow {
    fn into_run(self) -> StoreResult<RunRecord> {
        Ok(RunRecord {
            id: parse_uuid(&self.id)?,
            source_id: parse_uuid(&self.source_id)?,
            status: parse_enum(&self.status)?,
            started_at: parse_ts(&self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
            duration_ms: self.duration_ms,
            counts: RunCounts {
                new: self.new_count as u32,
                updated: self.updated_count as u32,
                unchanged: self.unchanged_count as u32,
                failed: self.failed_count as u32,
            },
            message: self.message,
            error_detail: self.error_detail,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

#[async_trait]
impl SourceCatalog for SqliteCatalog {
    async fn upsert_source(&self, source: &NewSource, now: DateTime<Utc>) -> StoreResult<Source> {
        let settings = serde_json::to_string(&source.settings)?;

        sqlx::query(
            r#"
            INSERT INTO sources (id, name, description, kind, origin, adapter, cadence, active, status, settings, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                kind = excluded.kind,
                origin = excluded.origin,
                adapter = excluded.adapter,
                cadence = excluded.cadence,
                settings = excluded.settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(&source.name)
        .bind(&source.description)
        .bind(source.kind.as_str())
        .bind(&source.origin)
        .bind(&source.adapter)
        .bind(&source.cadence)
        .bind(SourceStatus::Active.as_str())
        .bind(&settings)
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await?;

        self.fetch_source("name", &source.name)
            .await?
            .ok_or_else(|| StoreError::not_found("source", &source.name))
    }

    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        self.fetch_source("id", &id.to_string()).await
    }

    async fn get_source_by_name(&self, name: &str) -> StoreResult<Option<Source>> {
        self.fetch_source("name", name).await
    }

    async fn list_sources(&self, filter: &SourceFilter) -> StoreResult<Vec<Source>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE 1 = 1"));
        if let Some(active) = filter.active {
            qb.push(" AND active = ").push_bind(active);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(adapter) = &filter.adapter {
            qb.push(" AND adapter = ").push_bind(adapter.clone());
        }
        qb.push(" ORDER BY name");

        let rows = qb.build_query_as::<SourceRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(SourceRow::into_source).collect()
    }

    async fn eligible_sources(&self, now: DateTime<Utc>) -> StoreResult<Vec<Source>> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources \
             WHERE active = 1 AND status = ? AND (next_eligible_at IS NULL OR next_eligible_at <= ?) \
             ORDER BY name"
        );
        let rows = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(SourceStatus::Active.as_str())
            .bind(ts(now))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SourceRow::into_source).collect()
    }

    async fn set_source_state(
        &self,
        id: Uuid,
        active: bool,
        status: SourceStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Source> {
        let result = sqlx::query("UPDATE sources SET active = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(status.as_str())
            .bind(ts(now))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("source", id));
        }
        self.get_source(id)
            .await?
            .ok_or_else(|| StoreError::not_found("source", id))
    }

    async fn delete_source(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DocumentCatalog for SqliteCatalog {
    async fn find_document(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<DocumentRecord>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE source_id = ? AND external_id = ?");
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(source_id.to_string())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(DocumentRow::into_record).transpose()
    }

    async fn get_document(&self, id: Uuid) -> StoreResult<Option<DocumentRecord>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?");
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DocumentRow::into_record).transpose()
    }

    async fn insert_document(&self, doc: NewDocument) -> StoreResult<InsertOutcome> {
        let source_id = doc.source_id;
        let external_id = doc.external_id.clone();
        let record = doc.into_record();

        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, source_id, external_id, title, kind, origin_url, fingerprint,
                storage_path, size_bytes, version, published_on, issuer, external_number, status,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, external_id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.source_id.to_string())
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(record.kind.as_str())
        .bind(&record.origin_url)
        .bind(&record.fingerprint)
        .bind(&record.storage_path)
        .bind(record.size_bytes as i64)
        .bind(record.version as i64)
        .bind(record.published_on.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(&record.issuer)
        .bind(&record.external_number)
        .bind(record.status.as_str())
        .bind(ts(record.created_at))
        .bind(ts(record.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted(record));
        }

        let existing = self
            .find_document(source_id, &external_id)
            .await?
            .ok_or_else(|| StoreError::not_found("document", &external_id))?;
        Ok(InsertOutcome::Conflict(existing))
    }

    async fn update_document(&self, update: &DocumentUpdate) -> StoreResult<Option<DocumentRecord>> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                title = ?,
                origin_url = ?,
                fingerprint = ?,
                storage_path = ?,
                size_bytes = ?,
                version = version + 1,
                published_on = COALESCE(?, published_on),
                issuer = COALESCE(?, issuer),
                external_number = COALESCE(?, external_number),
                status = 'harvested',
                updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&update.title)
        .bind(&update.origin_url)
        .bind(&update.fingerprint)
        .bind(&update.storage_path)
        .bind(update.size_bytes as i64)
        .bind(update.metadata.published_on.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(&update.metadata.issuer)
        .bind(&update.metadata.external_number)
        .bind(ts(update.updated_at))
        .bind(update.id.to_string())
        .bind(update.expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_document(update.id).await? {
                Some(_) => Ok(None),
                None => Err(StoreError::not_found("document", update.id)),
            };
        }
        self.get_document(update.id).await
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE 1 = 1"));
        if let Some(source_id) = filter.source_id {
            qb.push(" AND source_id = ").push_bind(source_id.to_string());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        qb.push(" ORDER BY updated_at DESC, external_id");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build_query_as::<DocumentRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(DocumentRow::into_record).collect()
    }
}

#[async_trait]
impl RunLog for SqliteCatalog {
    async fn open_run(&self, source_id: Uuid, started_at: DateTime<Utc>) -> StoreResult<RunRecord> {
        let run = RunRecord::open(source_id, started_at);
        let metadata = serde_json::to_string(&run.metadata)?;

        sqlx::query("INSERT INTO runs (id, source_id, status, started_at, metadata) VALUES (?, ?, ?, ?, ?)")
            .bind(run.id.to_string())
            .bind(source_id.to_string())
            .bind(run.status.as_str())
            .bind(ts(started_at))
            .bind(&metadata)
            .execute(&self.pool)
            .await?;

        Ok(run)
    }

    async fn finalize_run(&self, finalization: &RunFinalization) -> StoreResult<RunRecord> {
        let mut run = self
            .get_run(finalization.run_id)
            .await?
            .ok_or_else(|| StoreError::not_found("run", finalization.run_id))?;
        if run.is_finalized() {
            return Err(StoreError::AlreadyFinalized {
                run_id: finalization.run_id,
            });
        }
        run.apply(finalization);
        let metadata = serde_json::to_string(&run.metadata)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE runs SET
                status = ?,
                finished_at = ?,
                duration_ms = ?,
                new_count = ?,
                updated_count = ?,
                unchanged_count = ?,
                failed_count = ?,
                message = ?,
                error_detail = ?,
                metadata = ?
            WHERE id = ? AND finished_at IS NULL
            "#,
        )
        .bind(run.status.as_str())
        .bind(ts(finalization.finished_at))
        .bind(run.duration_ms)
        .bind(run.counts.new as i64)
        .bind(run.counts.updated as i64)
        .bind(run.counts.unchanged as i64)
        .bind(run.counts.failed as i64)
        .bind(&run.message)
        .bind(&run.error_detail)
        .bind(&metadata)
        .bind(run.id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::AlreadyFinalized { run_id: run.id });
        }

        sqlx::query("UPDATE sources SET last_harvest_at = ?, next_eligible_at = ? WHERE id = ?")
            .bind(ts(finalization.finished_at))
            .bind(ts(finalization.next_eligible_at))
            .bind(run.source_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?");
        let row = sqlx::query_as::<_, RunRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(RunRow::into_run).transpose()
    }

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {RUN_COLUMNS} FROM runs WHERE 1 = 1"));
        if let Some(source_id) = filter.source_id {
            qb.push(" AND source_id = ").push_bind(source_id.to_string());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY started_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build_query_as::<RunRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    async fn purge_runs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM runs WHERE started_at < ?")
            .bind(ts(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
