use thiserror::Error;

use crate::domain::DocumentId;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Document {0} has no index yet")]
    IndexNotBuilt(DocumentId),

    #[error("Document {0} is already indexed")]
    AlreadyIndexed(DocumentId),

    #[error("Document {0} is already being indexed")]
    IndexingInProgress(DocumentId),

    #[error("Indexing failed for {id}: {reason}")]
    IndexingFailed { id: DocumentId, reason: String },

    #[error("Indexing timed out for {0}")]
    IndexingTimedOut(DocumentId),

    #[error("No documents are indexed yet ({pending} pending)")]
    IndexNotReady { pending: usize },

    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("Corrupt store entry: {0}")]
    Corrupt(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn indexing_failed(id: DocumentId, reason: impl std::fmt::Display) -> Self {
        Self::IndexingFailed {
            id,
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same call later can succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IndexNotBuilt(_)
                | Self::IndexingInProgress(_)
                | Self::IndexingFailed { .. }
                | Self::IndexingTimedOut(_)
                | Self::IndexNotReady { .. }
                | Self::ExternalService(_)
                | Self::Timeout(_)
        )
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::StorageFull(err.to_string())
        } else {
            Self::Io(err)
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_full_is_mapped() {
        let err: DomainError = std::io::Error::from(std::io::ErrorKind::StorageFull).into();
        assert!(matches!(err, DomainError::StorageFull(_)));

        let err: DomainError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, DomainError::Io(_)));
    }

    #[test]
    fn test_retryable_variants() {
        let id = DocumentId::new();
        assert!(DomainError::IndexNotBuilt(id).is_retryable());
        assert!(DomainError::indexing_failed(id, "boom").is_retryable());
        assert!(!DomainError::DocumentNotFound(id).is_retryable());
        assert!(!DomainError::invalid("empty").is_retryable());
    }
}
