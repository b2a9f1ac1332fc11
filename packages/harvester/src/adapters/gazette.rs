//! Gazette-style adapter.
//!
//! Gazette sources publish one index page per year at `{origin}/{year}`.
//! Each index lists links to individual acts; a link qualifies when its
//! text or href matches the profile's tokens and its text carries a
//! number such as `nº 123` or `n° 45/2023`.
//!
//! Per bucket:
//! 1. Fetch the index. A failure skips the whole bucket.
//! 2. Classify links and build canonical identifiers. Links without a
//!    number are skipped silently; repeated identifiers are dropped.
//! 3. Fetch each candidate. A failure is reported to the sink and the
//!    bucket continues.

use async_trait::async_trait;
use chrono::Datelike;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::traits::adapter::{
    CandidateFailure, CandidateSink, HarvestContext, HarvestReport, SourceAdapter,
};
use crate::types::{
    document::{Candidate, DocumentKind, DocumentMetadata},
    source::{Source, SourceKind},
};

static RE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)n[°º]?\s*(\d+)(?:/(\d{4}))?").unwrap());

const MAX_TITLE_CHARS: usize = 500;

/// What a gazette looks like and how its acts are identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GazetteProfile {
    /// First segment of every identifier, e.g. `cosit` in `cosit_2024_0042`
    pub identifier_prefix: String,

    pub issuer: String,

    pub kind: DocumentKind,

    /// Link text containing any of these qualifies on its own
    pub category_tokens: Vec<String>,

    /// Link text containing one of these qualifies together with a number marker
    pub secondary_tokens: Vec<String>,

    pub number_markers: Vec<String>,

    /// An href ending in one of these qualifies if it also contains an href token
    pub document_suffixes: Vec<String>,

    pub href_tokens: Vec<String>,

    /// Yearly buckets to harvest, counting back from the current year
    pub lookback: u32,
}

impl GazetteProfile {
    /// Federal tax-authority rulings ("Soluções de Consulta").
    pub fn tax_rulings() -> Self {
        Self {
            identifier_prefix: "cosit".to_string(),
            issuer: "COSIT - Receita Federal".to_string(),
            kind: DocumentKind::Ruling,
            category_tokens: vec!["solução de consulta".into(), "solucao de consulta".into()],
            secondary_tokens: vec!["cosit".into()],
            number_markers: vec!["nº".into(), "n°".into(), "no".into()],
            document_suffixes: vec![".pdf".into()],
            href_tokens: vec!["consul".into()],
            lookback: 2,
        }
    }

    pub fn with_lookback(mut self, lookback: u32) -> Self {
        self.lookback = lookback.max(1);
        self
    }

    /// Whether a link looks like one of this gazette's acts.
    pub fn classify(&self, text: &str, href: &str) -> bool {
        let text = text.to_lowercase();
        let href = href.to_lowercase();

        if self.category_tokens.iter().any(|t| text.contains(t.as_str())) {
            return true;
        }

        if self.secondary_tokens.iter().any(|t| text.contains(t.as_str()))
            && self.number_markers.iter().any(|m| text.contains(m.as_str()))
        {
            return true;
        }

        self.document_suffixes.iter().any(|s| href.ends_with(s.as_str()))
            && self.href_tokens.iter().any(|t| href.contains(t.as_str()))
    }

    /// Buckets to harvest for the given current year, newest first.
    pub fn years(&self, current_year: i32) -> Vec<i32> {
        (0..self.lookback.max(1) as i32)
            .map(|back| current_year - back)
            .collect()
    }

    pub fn identifier(&self, year: i32, number: &str) -> String {
        format!("{}_{}_{:0>4}", self.identifier_prefix, year, number)
    }
}

/// Number and year parsed from link text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActNumber {
    pub number: String,
    pub year: i32,
}

/// Parse `nº 123` / `n° 123/2024` from link text. A year suffix overrides
/// the bucket year.
pub fn parse_act_number(text: &str, bucket_year: i32) -> Option<ActNumber> {
    let caps = RE_NUMBER.captures(text)?;
    let number = caps.get(1)?.as_str().to_string();
    let year = caps
        .get(2)
        .and_then(|y| y.as_str().parse().ok())
        .unwrap_or(bucket_year);
    Some(ActNumber { number, year })
}

/// A qualifying link resolved into a candidate reference.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    external_id: String,
    title: String,
    url: String,
    act: ActNumber,
}

#[derive(Debug, Default, Serialize)]
struct BucketReport {
    year: i32,
    links: usize,
    candidates: usize,
    skipped_links: usize,
    duplicates: usize,
}

pub struct GazetteAdapter {
    selector: String,
    profile: GazetteProfile,
}

impl GazetteAdapter {
    pub const SELECTOR: &'static str = "gazette";

    pub fn new(profile: GazetteProfile) -> Self {
        Self {
            selector: Self::SELECTOR.to_string(),
            profile,
        }
    }

    /// Register the same logic under another selector, e.g. for a second profile.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    pub fn profile(&self) -> &GazetteProfile {
        &self.profile
    }

    fn base_url(origin: &str) -> Option<Url> {
        let mut with_slash = origin.trim().trim_end_matches('/').to_string();
        with_slash.push('/');
        match Url::parse(&with_slash) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
            _ => None,
        }
    }

    fn index_url(origin: &str, year: i32) -> String {
        format!("{}/{}", origin.trim().trim_end_matches('/'), year)
    }

    /// Extract qualifying entries from an index page.
    ///
    /// Kept synchronous: the parsed document must not live across an await.
    fn parse_index(
        &self,
        html: &str,
        base: &Url,
        year: i32,
        seen: &mut HashSet<String>,
        report: &mut BucketReport,
    ) -> Vec<IndexEntry> {
        let document = Html::parse_document(html);
        let link_selector = match Selector::parse("a[href]") {
            Ok(s) => s,
            Err(_) => return vec![],
        };

        let mut entries = Vec::new();
        for link in document.select(&link_selector) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            report.links += 1;

            let text = link.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

            if !self.profile.classify(&text, href) {
                continue;
            }

            let Some(act) = parse_act_number(&text, year) else {
                debug!(href = %href, "qualifying link without a number, skipping");
                report.skipped_links += 1;
                continue;
            };

            let Ok(resolved) = base.join(href) else {
                debug!(href = %href, "unresolvable link, skipping");
                report.skipped_links += 1;
                continue;
            };

            let external_id = self.profile.identifier(act.year, &act.number);
            if !seen.insert(external_id.clone()) {
                report.duplicates += 1;
                continue;
            }

            entries.push(IndexEntry {
                external_id,
                title: text.chars().take(MAX_TITLE_CHARS).collect(),
                url: resolved.to_string(),
                act,
            });
        }

        report.candidates = entries.len();
        entries
    }

    fn candidate(&self, entry: IndexEntry, content: Vec<u8>, content_type: Option<String>) -> Candidate {
        let metadata = DocumentMetadata {
            published_on: None,
            issuer: Some(self.profile.issuer.clone()),
            external_number: Some(format!("{}/{}", entry.act.number, entry.act.year)),
        };
        let mut candidate = Candidate::new(entry.external_id, entry.title, entry.url, content)
            .with_kind(self.profile.kind)
            .with_metadata(metadata);
        candidate.content_type = content_type;
        candidate
    }
}

impl Default for GazetteAdapter {
    fn default() -> Self {
        Self::new(GazetteProfile::tax_rulings())
    }
}

#[async_trait]
impl SourceAdapter for GazetteAdapter {
    fn selector(&self) -> &str {
        &self.selector
    }

    fn validate(&self, source: &Source) -> std::result::Result<(), String> {
        if source.kind != SourceKind::Web {
            return Err(format!("expected source kind 'web', got '{}'", source.kind));
        }
        if source.origin.trim().is_empty() {
            return Err("origin is not configured".to_string());
        }
        if Self::base_url(&source.origin).is_none() {
            return Err(format!("origin is not an absolute http(s) URL: {}", source.origin));
        }
        Ok(())
    }

    async fn harvest(
        &self,
        source: &Source,
        ctx: &HarvestContext<'_>,
        sink: &mut dyn CandidateSink,
    ) -> Result<HarvestReport> {
        let base = Self::base_url(&source.origin).ok_or_else(|| {
            crate::error::HarvestError::config(&source.name, "origin is not an absolute http(s) URL")
        })?;

        let years = self.profile.years(ctx.clock.now().year());
        info!(source = %source.name, ?years, "harvesting gazette");

        let mut seen = HashSet::new();
        let mut attempted = 0usize;
        let mut buckets = Vec::new();
        let mut skipped_buckets = Vec::new();

        for year in years {
            if ctx.is_cancelled() {
                break;
            }

            let index_url = Self::index_url(&source.origin, year);
            let index = match ctx.fetcher.fetch(&index_url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(source = %source.name, year, url = %index_url, error = %e, "index fetch failed, skipping bucket");
                    skipped_buckets.push(serde_json::json!({
                        "year": year,
                        "error": e.to_string(),
                    }));
                    continue;
                }
            };

            let mut report = BucketReport {
                year,
                ..Default::default()
            };
            let entries = self.parse_index(&index.text(), &base, year, &mut seen, &mut report);
            info!(source = %source.name, year, found = entries.len(), "parsed index");

            for entry in entries {
                if ctx.is_cancelled() {
                    break;
                }
                attempted += 1;

                match ctx.fetcher.fetch(&entry.url).await {
                    Ok(resource) => {
                        let candidate = self.candidate(entry, resource.body, resource.content_type);
                        sink.accept(candidate).await;
                    }
                    Err(error) => {
                        warn!(source = %source.name, external_id = %entry.external_id, error = %error, "document fetch failed");
                        sink.reject(CandidateFailure {
                            external_id: entry.external_id,
                            origin_url: entry.url,
                            error,
                        })
                        .await;
                    }
                }
            }

            buckets.push(report);
        }

        Ok(HarvestReport::new(attempted).with_metadata(serde_json::json!({
            "buckets": buckets,
            "skipped_buckets": skipped_buckets,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MockFetcher, VecSink};
    use crate::traits::fetcher::FetchedResource;
    use crate::types::source::NewSource;
    use chrono::{TimeZone, Utc};
    use tokio_util::sync::CancellationToken;

    const ORIGIN: &str = "https://www.example.gov/rulings";

    fn source() -> Source {
        NewSource::new("Tax rulings", ORIGIN, "gazette").into_source(Utc::now())
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_classify_links() {
        let p = GazetteProfile::tax_rulings();
        assert!(p.classify("Solução de Consulta nº 12", "/a"));
        assert!(p.classify("SOLUCAO DE CONSULTA 3", "/a"));
        assert!(p.classify("Cosit nº 99", "/a"));
        assert!(p.classify("download", "/files/consulta-99.PDF"));
        assert!(!p.classify("Cosit annual report", "/a"));
        assert!(!p.classify("Home", "/index.html"));
    }

    #[test]
    fn test_parse_act_number() {
        assert_eq!(
            parse_act_number("Solução de Consulta nº 12", 2024),
            Some(ActNumber { number: "12".into(), year: 2024 })
        );
        assert_eq!(
            parse_act_number("Solução de Consulta N° 7/2023", 2024),
            Some(ActNumber { number: "7".into(), year: 2023 })
        );
        assert_eq!(parse_act_number("Solução de Consulta", 2024), None);
    }

    #[test]
    fn test_identifier_is_zero_padded() {
        let p = GazetteProfile::tax_rulings();
        assert_eq!(p.identifier(2024, "12"), "cosit_2024_0012");
        assert_eq!(p.identifier(2024, "12345"), "cosit_2024_12345");
        assert_eq!(p.years(2024), vec![2024, 2023]);
    }

    #[test]
    fn test_validate() {
        let adapter = GazetteAdapter::default();
        assert!(adapter.validate(&source()).is_ok());

        let mut pdf = source();
        pdf.kind = SourceKind::Pdf;
        assert!(adapter.validate(&pdf).unwrap_err().contains("web"));

        let mut relative = source();
        relative.origin = "www.example.gov/rulings".into();
        assert!(!adapter.is_valid(&relative));
    }

    #[tokio::test]
    async fn test_harvest_emits_candidates_and_failures() {
        let index_2024 = r#"
            <ul>
              <li><a href="/rulings/2024/sc-12.html">Solução de Consulta nº 12</a></li>
              <li><a href="sc-13.html">Solução de Consulta nº 13/2023</a></li>
              <li><a href="/rulings/2024/sc-12-copy.html">Solução de Consulta nº 12</a></li>
              <li><a href="/about">Solução de Consulta - about</a></li>
              <li><a href="/contact">Contact</a></li>
            </ul>"#;
        let fetcher = MockFetcher::new()
            .with_page(format!("{ORIGIN}/2024"), index_2024)
            .with_page("https://www.example.gov/rulings/2024/sc-12.html", "<p>twelve</p>")
            .with_status(format!("{ORIGIN}/sc-13.html"), 500)
            .with_timeout(format!("{ORIGIN}/2023"));
        let clock = clock();
        let cancel = CancellationToken::new();
        let ctx = HarvestContext::new(&fetcher, &clock, &cancel);
        let mut sink = VecSink::default();

        let report = GazetteAdapter::default()
            .harvest(&source(), &ctx, &mut sink)
            .await
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(sink.accepted.len(), 1);
        let doc = &sink.accepted[0];
        assert_eq!(doc.external_id, "cosit_2024_0012");
        assert_eq!(doc.title, "Solução de Consulta nº 12");
        assert_eq!(doc.kind, DocumentKind::Ruling);
        assert_eq!(doc.metadata.external_number.as_deref(), Some("12/2024"));
        assert_eq!(doc.metadata.issuer.as_deref(), Some("COSIT - Receita Federal"));
        assert_eq!(doc.content, b"<p>twelve</p>");

        assert_eq!(sink.rejected.len(), 1);
        assert_eq!(sink.rejected[0].external_id, "cosit_2023_0013");
        assert_eq!(sink.rejected[0].origin_url, format!("{ORIGIN}/sc-13.html"));

        assert_eq!(report.metadata["buckets"][0]["skipped_links"], 1);
        assert_eq!(report.metadata["buckets"][0]["duplicates"], 1);
        assert_eq!(report.metadata["skipped_buckets"][0]["year"], 2023);
    }

    #[tokio::test]
    async fn test_latin1_index_is_decoded_before_matching() {
        let index: Vec<u8> = r#"<a href="sc-12.html">Solução de Consulta nº 12</a>"#
            .chars()
            .map(|c| c as u32 as u8)
            .collect();
        let fetcher = MockFetcher::new()
            .with_resource(
                FetchedResource::new(format!("{ORIGIN}/2024"), index)
                    .with_content_type("text/html; charset=iso-8859-1"),
            )
            .with_page(format!("{ORIGIN}/sc-12.html"), "<p>twelve</p>");
        let clock = clock();
        let cancel = CancellationToken::new();
        let ctx = HarvestContext::new(&fetcher, &clock, &cancel);
        let mut sink = VecSink::default();

        let report = GazetteAdapter::default()
            .harvest(&source(), &ctx, &mut sink)
            .await
            .unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(sink.accepted.len(), 1);
        assert_eq!(sink.accepted[0].external_id, "cosit_2024_0012");
        assert_eq!(sink.accepted[0].title, "Solução de Consulta nº 12");
        assert_eq!(report.metadata["buckets"][0]["candidates"], 1);
    }

    #[tokio::test]
    async fn test_cancelled_harvest_stops_before_fetching() {
        let fetcher = MockFetcher::new();
        let clock = clock();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = HarvestContext::new(&fetcher, &clock, &cancel);
        let mut sink = VecSink::default();

        let report = GazetteAdapter::default()
            .harvest(&source(), &ctx, &mut sink)
            .await
            .unwrap();

        assert_eq!(report.attempted, 0);
        assert!(fetcher.calls().is_empty());
    }
}
