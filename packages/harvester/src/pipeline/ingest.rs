//! Manual upload ingestion.
//!
//! Operator uploads go through the same reconcile path as harvested
//! candidates. No run record is written for an upload.

use std::path::Path;
use tracing::info;

use crate::fingerprint::canonicalize;
use crate::pipeline::reconcile::{Decision, Reconciler};
use crate::types::{
    document::{Candidate, DocumentKind, DocumentMetadata},
    source::Source,
};

/// A file handed in by an operator.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,

    /// Defaults to the file stem
    pub title: Option<String>,

    /// Defaults to `upload_{first 12 hex chars of the fingerprint}`
    pub external_id: Option<String>,

    pub kind: Option<DocumentKind>,
    pub metadata: DocumentMetadata,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            title: None,
            external_id: None,
            kind: None,
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// MIME type implied by the file extension.
    pub fn content_type(&self) -> &'static str {
        let ext = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => "application/pdf",
            "html" | "htm" => "text/html",
            "txt" => "text/plain",
            "json" => "application/json",
            "xml" => "application/xml",
            _ => "application/octet-stream",
        }
    }

    /// Build the candidate this upload reconciles as.
    pub fn into_candidate(self) -> Candidate {
        let content_type = self.content_type();
        let file_stem = Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
            .to_string();

        let external_id = match self.external_id {
            Some(id) => id,
            None => {
                let fingerprint = canonicalize(&self.bytes, Some(content_type)).fingerprint;
                format!("upload_{}", &fingerprint[..12])
            }
        };

        Candidate::new(
            external_id,
            self.title.unwrap_or(file_stem),
            format!("upload://{}", self.file_name),
            self.bytes,
        )
        .with_content_type(content_type)
        .with_kind(self.kind.unwrap_or(DocumentKind::Other))
        .with_metadata(self.metadata)
    }
}

impl Reconciler {
    /// Reconcile an operator upload against `source`.
    pub async fn ingest_upload(&self, source: &Source, upload: Upload) -> Decision {
        let file_name = upload.file_name.clone();
        let candidate = upload.into_candidate();
        let decision = self.reconcile(source, &candidate).await;
        info!(
            source = %source.name,
            file = %file_name,
            external_id = %candidate.external_id,
            decision = decision.label(),
            "upload ingested"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryCatalog, MemoryContentStore};
    use crate::testing::ManualClock;
    use crate::traits::clock::Clock;
    use crate::traits::store::SourceCatalog;
    use crate::types::source::NewSource;
    use std::sync::Arc;

    #[test]
    fn test_defaults_from_file_name_and_content() {
        let candidate = Upload::new("reports/Ruling 12.HTML", "<p>x</p>").into_candidate();
        let expected = crate::fingerprint::fingerprint(b"<p>x</p>");

        assert_eq!(candidate.title, "Ruling 12");
        assert_eq!(candidate.external_id, format!("upload_{}", &expected[..12]));
        assert_eq!(candidate.content_type.as_deref(), Some("text/html"));
        assert_eq!(candidate.extension(), "html");
        assert_eq!(candidate.kind, DocumentKind::Other);
    }

    #[test]
    fn test_explicit_fields_win() {
        let candidate = Upload::new("a.pdf", b"%PDF-1.4".to_vec())
            .with_title("Normative act")
            .with_external_id("manual-1")
            .with_kind(DocumentKind::Law)
            .into_candidate();

        assert_eq!(candidate.title, "Normative act");
        assert_eq!(candidate.external_id, "manual-1");
        assert_eq!(candidate.extension(), "pdf");
    }

    #[tokio::test]
    async fn test_reupload_is_unchanged() {
        let catalog = Arc::new(MemoryCatalog::new());
        let clock = ManualClock::default();
        let source = catalog
            .upsert_source(&NewSource::new("uploads", "https://example.gov", "gazette"), clock.now())
            .await
            .unwrap();
        let reconciler = Reconciler::new(catalog.clone(), Arc::new(MemoryContentStore::new()), Arc::new(clock));

        let first = reconciler.ingest_upload(&source, Upload::new("a.txt", "caf\u{e9}")).await;
        let latin1 = reconciler.ingest_upload(&source, Upload::new("a.txt", b"caf\xe9".to_vec())).await;

        assert!(matches!(first, Decision::Created(_)));
        assert!(matches!(latin1, Decision::Unchanged(_)));
        assert_eq!(catalog.run_count(), 0);
    }
}
