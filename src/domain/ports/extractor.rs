use crate::domain::{errors::DomainError, ContentType};

/// Plain text of a document, one entry per page or worksheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
}

impl ExtractedText {
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }
}

/// Turns raw uploaded bytes into text. Runs on a blocking thread.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, content: &[u8], content_type: ContentType)
        -> Result<ExtractedText, DomainError>;
}
