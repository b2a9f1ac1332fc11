//! Source adapter contract.
//!
//! Every external source is harvested by an implementation of
//! [`SourceAdapter`]. Adapters enumerate candidates and download their
//! content; they never touch the catalog. Each discovered candidate is
//! pushed into a [`CandidateSink`], which the run controller backs with
//! the reconciler.
//!
//! ```rust,ignore
//! let report = adapter.harvest(&source, &ctx, &mut sink).await?;
//! tracing::info!(attempted = report.attempted, "harvest pass finished");
//! ```

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result};
use crate::traits::{clock::Clock, fetcher::Fetcher};
use crate::types::{document::Candidate, source::Source};

/// Collaborators an adapter may use during one harvest pass.
pub struct HarvestContext<'a> {
    /// Throttled fetcher; every call pays the shared rate-limit pause
    pub fetcher: &'a dyn Fetcher,

    pub clock: &'a dyn Clock,

    /// Checked between candidates; a run is never aborted mid-document
    pub cancel: &'a CancellationToken,
}

impl<'a> HarvestContext<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, clock: &'a dyn Clock, cancel: &'a CancellationToken) -> Self {
        Self {
            fetcher,
            clock,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A candidate whose content could not be downloaded.
#[derive(Debug)]
pub struct CandidateFailure {
    pub external_id: String,
    pub origin_url: String,
    pub error: FetchError,
}

/// Receiver for everything an adapter discovers.
#[async_trait]
pub trait CandidateSink: Send {
    /// A candidate with downloaded content.
    async fn accept(&mut self, candidate: Candidate);

    /// A candidate that was discovered but failed to download.
    async fn reject(&mut self, failure: CandidateFailure);
}

/// Summary an adapter returns after a pass.
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    /// Candidates handed to the sink, accepted or rejected
    pub attempted: usize,

    /// Adapter-specific side data recorded on the run
    pub metadata: serde_json::Value,
}

impl HarvestReport {
    pub fn new(attempted: usize) -> Self {
        Self {
            attempted,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key sources use to select this adapter.
    fn selector(&self) -> &str;

    /// Check adapter-specific preconditions on a source's configuration.
    ///
    /// Returns the reason the source cannot be harvested, if any.
    fn validate(&self, source: &Source) -> std::result::Result<(), String>;

    fn is_valid(&self, source: &Source) -> bool {
        self.validate(source).is_ok()
    }

    /// Enumerate candidates and push each one into `sink`.
    ///
    /// Per-candidate failures go to [`CandidateSink::reject`] and never
    /// abort the pass. An `Err` means the pass itself broke.
    async fn harvest(
        &self,
        source: &Source,
        ctx: &HarvestContext<'_>,
        sink: &mut dyn CandidateSink,
    ) -> Result<HarvestReport>;
}
