use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Stable identifier assigned at upload time.
///
/// Only canonical UUIDs parse, so an id is always safe to use as a path component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DomainError::invalid(format!("malformed document id: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Pdf,
    Xlsx,
    PlainText,
    Markdown,
}

impl ContentType {
    pub const MIME_PDF: &'static str = "application/pdf";
    pub const MIME_XLSX: &'static str =
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    pub const MIME_TEXT: &'static str = "text/plain";
    pub const MIME_MARKDOWN: &'static str = "text/markdown";

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => Self::MIME_PDF,
            Self::Xlsx => Self::MIME_XLSX,
            Self::PlainText => Self::MIME_TEXT,
            Self::Markdown => Self::MIME_MARKDOWN,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        // Drop parameters such as "; charset=utf-8".
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            Self::MIME_PDF => Some(Self::Pdf),
            Self::MIME_XLSX => Some(Self::Xlsx),
            Self::MIME_TEXT => Some(Self::PlainText),
            Self::MIME_MARKDOWN | "text/x-markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "xlsx" => Some(Self::Xlsx),
            "txt" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// Picks the content type from the declared MIME type, falling back to the
    /// file extension when the client sent nothing or a generic binary type.
    pub fn resolve(declared: Option<&str>, filename: &str) -> Result<Self, DomainError> {
        match declared.map(str::trim).filter(|m| !m.is_empty()) {
            Some(mime) if mime != "application/octet-stream" => Self::from_mime(mime)
                .ok_or_else(|| DomainError::invalid(format!("content type not allowed: {mime}"))),
            _ => Self::from_filename(filename).ok_or_else(|| {
                DomainError::invalid(format!("cannot determine content type of {filename}"))
            }),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Descriptive fields supplied by the uploader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Industry classification codes; `"0"` means relevant to everyone.
    #[serde(default)]
    pub industry_codes: BTreeSet<String>,
    /// Primary references get a reserved share of retrieval slots.
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub source: Option<String>,
}

/// A stored document without its content bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub filename: String,
    pub content_type: ContentType,
    pub size_bytes: u64,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl DocumentRecord {
    pub fn new(
        filename: impl Into<String>,
        content_type: ContentType,
        content: &[u8],
        metadata: DocumentMetadata,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            filename: filename.into(),
            content_type,
            size_bytes: content.len() as u64,
            sha256: content_digest(content),
            uploaded_at: Utc::now(),
            metadata,
        }
    }
}

/// The original uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub record: DocumentRecord,
    pub content: Vec<u8>,
}

impl SourceDocument {
    pub fn id(&self) -> DocumentId {
        self.record.id
    }

    /// True when the bytes still hash to the digest recorded at upload.
    pub fn is_intact(&self) -> bool {
        content_digest(&self.content) == self.record.sha256
    }
}

pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Reduces a client-supplied name to its final path component.
pub fn sanitize_filename(raw: &str) -> Result<String, DomainError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(DomainError::invalid("filename is empty"));
    }
    if name.chars().any(char::is_control) {
        return Err(DomainError::invalid("filename contains control characters"));
    }
    if name.len() > 255 {
        return Err(DomainError::invalid("filename is longer than 255 bytes"));
    }
    Ok(name.to_string())
}
