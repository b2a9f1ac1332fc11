//! Content store addressing.

use serde::{Deserialize, Serialize};

/// Deterministic address of one document's bytes.
///
/// Layout: `{source_slug}/{year}/{month:02}/{identifier}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub source_slug: String,
    pub year: i32,
    pub month: u32,
    pub identifier: String,
    pub extension: String,
}

impl ContentKey {
    pub fn new(
        source_slug: impl Into<String>,
        year: i32,
        month: u32,
        identifier: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            source_slug: source_slug.into(),
            year,
            month,
            identifier: identifier.into(),
            extension: extension.into(),
        }
    }

    /// Path relative to the store root. Separators in the identifier are
    /// replaced so one identifier always maps to one file.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}/{:02}/{}.{}",
            self.source_slug,
            self.year,
            self.month,
            sanitize_identifier(&self.identifier),
            self.extension
        )
    }
}

/// Replace path separators (and parent references) in an identifier.
pub fn sanitize_identifier(identifier: &str) -> String {
    let cleaned: String = identifier
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_") + "_"
    } else {
        cleaned
    }
}

/// Result of a successful put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContent {
    pub path: String,
    pub size_bytes: u64,
}
