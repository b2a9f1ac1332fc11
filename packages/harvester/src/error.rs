//! Typed errors for the harvester library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell
//! business failures (bad configuration) from infrastructure failures
//! (database, network) and decide whether a run is worth retrying.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can escape a harvest operation.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Source failed adapter-specific validation. No run record is opened.
    #[error("invalid configuration for source {source_name}: {reason}")]
    ConfigInvalid { source_name: String, reason: String },

    /// No source with this id or name exists
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// Source exists but is switched off
    #[error("source is inactive: {0}")]
    SourceInactive(String),

    /// No adapter registered under this selector
    #[error("no adapter registered for selector: {0}")]
    UnknownAdapter(String),

    /// Network fetch failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Catalog or content store failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Unexpected failure inside the harvest loop
    #[error("run failed: {0}")]
    Run(String),

    /// Run was cancelled before it finished
    #[error("run cancelled")]
    Cancelled,
}

impl HarvestError {
    pub fn config(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether a dispatcher should retry the whole run after this error.
    ///
    /// Business failures are terminal: retrying a misconfigured or
    /// missing source cannot succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::SourceNotFound(_)
                | Self::SourceInactive(_)
                | Self::UnknownAdapter(_)
                | Self::Cancelled
                | Self::Store(StoreError::AlreadyFinalized { .. })
        )
    }
}

/// Errors from a single outbound request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Transport-level failure (DNS, connection reset, TLS)
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Response body could not be read
    #[error("failed reading body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::InvalidUrl { url }
            | Self::Http { url, .. }
            | Self::Status { url, .. }
            | Self::Timeout { url }
            | Self::Body { url, .. } => url,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors from the catalog or the content store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A run record may only be finalized once
    #[error("run {run_id} is already finalized")]
    AlreadyFinalized { run_id: Uuid },

    /// Stored data could not be mapped back into a domain value
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::Corrupt("store lock poisoned".to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(Box::new(e))
    }
}

/// Result type alias for harvest operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
