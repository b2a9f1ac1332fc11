//! Government Document Harvester
//!
//! Periodically collects published documents from configured sources,
//! stores their content durably, detects when a previously seen document
//! has changed, and keeps an auditable record of every harvest run.
//!
//! # Design
//!
//! - Adapters only enumerate and fetch; the library decides create/update/skip
//! - Change detection compares fingerprints of canonical (UTF-8) content
//! - Content is written before metadata, so a record never points at nothing
//! - Every run ends in exactly one terminal state, even when the pass fails
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvester::{AdapterRegistry, Dispatcher, FsContentStore, HttpFetcher, RunController, SqliteCatalog};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(SqliteCatalog::new("sqlite://harvester.db").await?);
//! let content = Arc::new(FsContentStore::new("./documents"));
//! let controller = RunController::new(
//!     catalog,
//!     content,
//!     AdapterRegistry::with_defaults(),
//!     Arc::new(HttpFetcher::new()),
//! );
//!
//! let dispatcher = Dispatcher::new(controller);
//! let batch = dispatcher.start_all_eligible_runs().await;
//! let purged = dispatcher.purge_old_runs(90).await;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Seams: catalog, content store, fetcher, adapter, clock
//! - [`types`] - Sources, documents, runs and configuration
//! - [`pipeline`] - Reconciler, run controller, dispatcher, upload ingest
//! - [`adapters`] - Adapter registry and the gazette index adapter
//! - [`stores`] - Memory, filesystem and SQLite storage
//! - [`fetchers`] - HTTP fetcher
//! - [`testing`] - Mock implementations for testing

pub mod adapters;
pub mod error;
pub mod fetchers;
pub mod fingerprint;
pub mod pipeline;
pub mod schedule;
pub mod stores;
pub mod testing;
pub mod throttle;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{FetchError, HarvestError, Result, StoreError};
pub use traits::{
    adapter::{CandidateFailure, CandidateSink, HarvestContext, HarvestReport, SourceAdapter},
    clock::{Clock, SystemClock},
    fetcher::{FetchOptions, FetchedResource, Fetcher},
    store::{
        Catalog, ContentStore, DocumentCatalog, DocumentFilter, InsertOutcome, RunFilter, RunLog,
        SourceCatalog, SourceFilter,
    },
};
pub use types::{
    config::{EffectiveSettings, HarvestConfig, RetryPolicy},
    content::{ContentKey, StoredContent},
    document::{
        Candidate, DocumentKind, DocumentMetadata, DocumentRecord, DocumentStatus, DocumentUpdate,
        NewDocument,
    },
    run::{RunCounts, RunFinalization, RunOutcome, RunRecord, RunStatus},
    source::{NewSource, Source, SourceKind, SourceSettings, SourceStatus},
};

pub use pipeline::{
    BatchSummary, Decision, Dispatcher, PurgeSummary, Reconciler, RunController, RunSummary, Upload,
};

pub use adapters::{AdapterRegistry, GazetteAdapter, GazetteProfile};
pub use fetchers::HttpFetcher;
pub use fingerprint::{canonicalize, fingerprint, Canonical};
pub use schedule::{next_eligible, Cadence};
pub use throttle::{DelayRange, JitterPacer, NoPause, PacedFetcher, Pacer};

// Re-export stores
pub use stores::{FsContentStore, MemoryCatalog, MemoryContentStore};

#[cfg(feature = "sqlite")]
pub use stores::SqliteCatalog;
