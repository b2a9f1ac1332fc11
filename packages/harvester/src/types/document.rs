//! Harvested documents and the candidates adapters discover.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Legal category of a harvested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Law,
    Resolution,
    Ruling,
    Faq,
    DeclaratoryAct,
    Other,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Law => "law",
            DocumentKind::Resolution => "resolution",
            DocumentKind::Ruling => "ruling",
            DocumentKind::Faq => "faq",
            DocumentKind::DeclaratoryAct => "declaratory_act",
            DocumentKind::Other => "other",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "law" => Ok(DocumentKind::Law),
            "resolution" => Ok(DocumentKind::Resolution),
            "ruling" => Ok(DocumentKind::Ruling),
            "faq" => Ok(DocumentKind::Faq),
            "declaratory_act" => Ok(DocumentKind::DeclaratoryAct),
            "other" => Ok(DocumentKind::Other),
            other => Err(format!("invalid document kind: {}", other)),
        }
    }
}

/// Downstream processing state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Harvested,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Harvested => "harvested",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "harvested" => Ok(DocumentStatus::Harvested),
            "processing" => Ok(DocumentStatus::Processing),
            "processed" => Ok(DocumentStatus::Processed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("invalid document status: {}", other)),
        }
    }
}

/// Optional descriptive metadata carried by a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub published_on: Option<NaiveDate>,
    pub issuer: Option<String>,
    pub external_number: Option<String>,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        self.published_on.is_none() && self.issuer.is_none() && self.external_number.is_none()
    }
}

/// A document reference discovered in one harvest pass, with its raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Identifier of the document at its origin; unique per source
    pub external_id: String,

    pub title: String,

    pub origin_url: String,

    /// Raw bytes exactly as downloaded
    #[serde(skip)]
    pub content: Vec<u8>,

    /// MIME type reported by the origin, if any
    pub content_type: Option<String>,

    pub kind: DocumentKind,

    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Candidate {
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        origin_url: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            origin_url: origin_url.into(),
            content: content.into(),
            content_type: None,
            kind: DocumentKind::Other,
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// File extension used when persisting this candidate's content.
    pub fn extension(&self) -> &'static str {
        extension_for(self.content_type.as_deref())
    }
}

/// Map a MIME type onto the extension used by the content store layout.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match mime.as_str() {
        "application/pdf" => "pdf",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "text/plain" => "txt",
        "application/octet-stream" => "bin",
        _ => "html",
    }
}

/// One catalogued document. Unique per `(source_id, external_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub source_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub origin_url: String,

    /// Hex SHA-256 of the content stored at `storage_path`
    pub fingerprint: String,
    pub storage_path: String,
    pub size_bytes: u64,

    /// Starts at 1, bumped by exactly one per content change
    pub version: u32,

    pub published_on: Option<NaiveDate>,
    pub issuer: Option<String>,
    pub external_number: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a first sighting.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub source_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub origin_url: String,
    pub fingerprint: String,
    pub storage_path: String,
    pub size_bytes: u64,
    pub metadata: DocumentMetadata,
    pub created_at: DateTime<Utc>,
}

impl NewDocument {
    pub fn into_record(self) -> DocumentRecord {
        DocumentRecord {
            id: Uuid::now_v7(),
            source_id: self.source_id,
            external_id: self.external_id,
            title: self.title,
            kind: self.kind,
            origin_url: self.origin_url,
            fingerprint: self.fingerprint,
            storage_path: self.storage_path,
            size_bytes: self.size_bytes,
            version: 1,
            published_on: self.metadata.published_on,
            issuer: self.metadata.issuer,
            external_number: self.metadata.external_number,
            status: DocumentStatus::Harvested,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// New-content update, applied only if the record is still at `expected_version`.
///
/// Metadata fields are only overwritten when the candidate supplied them.
#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub id: Uuid,
    pub expected_version: u32,
    pub title: String,
    pub origin_url: String,
    pub fingerprint: String,
    pub storage_path: String,
    pub size_bytes: u64,
    pub metadata: DocumentMetadata,
    pub updated_at: DateTime<Utc>,
}

impl DocumentUpdate {
    /// Apply this update to `record`, producing the next version.
    pub fn apply_to(&self, record: &DocumentRecord) -> DocumentRecord {
        let mut next = record.clone();
        next.title = self.title.clone();
        next.origin_url = self.origin_url.clone();
        next.fingerprint = self.fingerprint.clone();
        next.storage_path = self.storage_path.clone();
        next.size_bytes = self.size_bytes;
        next.version = record.version + 1;
        next.status = DocumentStatus::Harvested;
        next.updated_at = self.updated_at;
        if let Some(date) = self.metadata.published_on {
            next.published_on = Some(date);
        }
        if let Some(issuer) = &self.metadata.issuer {
            next.issuer = Some(issuer.clone());
        }
        if let Some(number) = &self.metadata.external_number {
            next.external_number = Some(number.clone());
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_content_types() {
        assert_eq!(extension_for(Some("text/html; charset=utf-8")), "html");
        assert_eq!(extension_for(Some("application/PDF")), "pdf");
        assert_eq!(extension_for(Some("text/plain")), "txt");
        assert_eq!(extension_for(Some("text/xml")), "xml");
        assert_eq!(extension_for(Some("application/json")), "json");
        assert_eq!(extension_for(Some("application/octet-stream")), "bin");
        assert_eq!(extension_for(None), "html");
    }

    #[test]
    fn test_update_bumps_version_and_keeps_unsupplied_metadata() {
        let now = Utc::now();
        let record = NewDocument {
            source_id: Uuid::now_v7(),
            external_id: "cosit_2024_0001".into(),
            title: "Old".into(),
            kind: DocumentKind::Ruling,
            origin_url: "https://example.gov/1".into(),
            fingerprint: "aa".into(),
            storage_path: "a/2024/01/x.html".into(),
            size_bytes: 3,
            metadata: DocumentMetadata {
                issuer: Some("Issuer".into()),
                ..Default::default()
            },
            created_at: now,
        }
        .into_record();

        let update = DocumentUpdate {
            id: record.id,
            expected_version: 1,
            title: "New".into(),
            origin_url: "https://example.gov/1b".into(),
            fingerprint: "bb".into(),
            storage_path: "a/2024/02/x.html".into(),
            size_bytes: 5,
            metadata: DocumentMetadata {
                external_number: Some("1/2024".into()),
                ..Default::default()
            },
            updated_at: now,
        };

        let next = update.apply_to(&record);
        assert_eq!(next.version, 2);
        assert_eq!(next.title, "New");
        assert_eq!(next.fingerprint, "bb");
        assert_eq!(next.issuer.as_deref(), Some("Issuer"));
        assert_eq!(next.external_number.as_deref(), Some("1/2024"));
        assert_eq!(next.status, DocumentStatus::Harvested);
        assert_eq!(next.id, record.id);
    }
}
