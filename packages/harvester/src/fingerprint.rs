//! Change detection.
//!
//! Text content is brought to one canonical encoding (UTF-8, no BOM) before
//! hashing, so the same document served as Latin-1 one day and UTF-8 the
//! next keeps its fingerprint. Binary content is hashed as-is. The canonical
//! bytes are also what gets stored, so a stored file always hashes to its
//! record's fingerprint.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Content in canonical form together with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub bytes: Vec<u8>,
    pub fingerprint: String,
}

impl Canonical {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Normalize `content` and fingerprint the result.
pub fn canonicalize(content: &[u8], content_type: Option<&str>) -> Canonical {
    let bytes = canonical_bytes(content, content_type).into_owned();
    let fingerprint = fingerprint(&bytes);
    Canonical { bytes, fingerprint }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical byte form of `content`.
///
/// A byte order mark wins over the declared charset. Charset labels resolve
/// the way browsers resolve them, so `iso-8859-1` and `latin1` read as
/// windows-1252. Undeclared content that is not valid UTF-8 is read as
/// windows-1252 too.
pub fn canonical_bytes<'a>(content: &'a [u8], content_type: Option<&str>) -> Cow<'a, [u8]> {
    if is_binary(content, content_type) {
        return Cow::Borrowed(content);
    }

    if let Some(rest) = content.strip_prefix(UTF8_BOM) {
        return utf8_or_windows_1252(rest);
    }
    if let Some(rest) = content.strip_prefix(UTF16LE_BOM) {
        return decode_with(UTF_16LE, rest);
    }
    if let Some(rest) = content.strip_prefix(UTF16BE_BOM) {
        return decode_with(UTF_16BE, rest);
    }

    match declared_encoding(content_type) {
        Some(encoding) if encoding != UTF_8 => decode_with(encoding, content),
        _ => utf8_or_windows_1252(content),
    }
}

/// Whether `content` should bypass text normalization.
pub fn is_binary(content: &[u8], content_type: Option<&str>) -> bool {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("application/pdf" | "application/octet-stream" | "application/zip") => true,
        Some(m) if m.starts_with("image/") || m.starts_with("audio/") || m.starts_with("video/") => {
            true
        }
        Some(_) => false,
        None => content.starts_with(b"%PDF-"),
    }
}

fn declared_encoding(content_type: Option<&str>) -> Option<&'static Encoding> {
    content_type?
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, value)| Encoding::for_label(value.trim().trim_matches('"').as_bytes()))
}

fn utf8_or_windows_1252(content: &[u8]) -> Cow<'_, [u8]> {
    match std::str::from_utf8(content) {
        Ok(_) => Cow::Borrowed(content),
        Err(_) => decode_with(WINDOWS_1252, content),
    }
}

fn decode_with<'a>(encoding: &'static Encoding, content: &'a [u8]) -> Cow<'a, [u8]> {
    match encoding.decode_without_bom_handling(content).0 {
        Cow::Borrowed(text) => Cow::Borrowed(text.as_bytes()),
        Cow::Owned(text) => Cow::Owned(text.into_bytes()),
    }
}
