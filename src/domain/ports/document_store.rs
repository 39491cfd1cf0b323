use async_trait::async_trait;

use crate::domain::{
    errors::DomainError, DocumentId, DocumentRecord, IndexArtifact, IndexManifest,
    SourceDocument,
};

/// A stored document together with the manifest of its published artifact, if any.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub record: DocumentRecord,
    pub manifest: Option<IndexManifest>,
}

/// Raw persisted state, as found by [`DocumentStore::scan`].
#[derive(Debug, Clone, Default)]
pub struct StoreScan {
    pub entries: Vec<StoreEntry>,
    /// Artifacts whose document is absent.
    pub orphan_indexes: Vec<DocumentId>,
    /// Documents carrying a delete tombstone.
    pub interrupted_deletes: Vec<DocumentId>,
    /// Abandoned temporary and trash directories removed during the scan.
    pub leftovers_removed: usize,
}

/// Persistence of source documents and their index artifacts.
///
/// Every write is published atomically: readers see either the complete previous state
/// or the complete new one. Callers serialize operations on the same id.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_document(&self, doc: &SourceDocument) -> Result<(), DomainError>;
    async fn load_record(&self, id: DocumentId) -> Result<Option<DocumentRecord>, DomainError>;
    async fn load_document(&self, id: DocumentId)
        -> Result<Option<SourceDocument>, DomainError>;
    async fn list_records(&self) -> Result<Vec<DocumentRecord>, DomainError>;

    async fn load_manifest(&self, id: DocumentId)
        -> Result<Option<IndexManifest>, DomainError>;
    async fn load_index(&self, id: DocumentId) -> Result<Option<IndexArtifact>, DomainError>;
    /// Replaces any existing artifact for the same id wholesale.
    async fn publish_index(&self, artifact: &IndexArtifact) -> Result<(), DomainError>;
    async fn remove_index(&self, id: DocumentId) -> Result<bool, DomainError>;

    /// Removes the document and its artifact. Crash-safe: once started, a delete is
    /// either finished by a later scan or never observable as partial.
    async fn remove_document(&self, id: DocumentId) -> Result<bool, DomainError>;

    async fn scan(&self) -> Result<StoreScan, DomainError>;
}
