use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{instrument, Instrument};

use crate::application::locks::{BuildClaim, BuildClaims, IdLocks};
use crate::domain::{
    chunk_pages,
    ports::{DocumentStore, EmbeddingService, TextExtractor},
    sanitize_filename, ContentType, DocumentId, DocumentMetadata, DocumentRecord, DomainError,
    IndexArtifact, IndexManifest, IndexStatus, SourceDocument,
};

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub chunk_size: usize,
    pub timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            timeout: Duration::from_secs(300),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// A stored document and the state of its index.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOverview {
    #[serde(flatten)]
    pub record: DocumentRecord,
    pub index: IndexStatus,
}

/// Owns the document/index pairs: uploads, index builds, deletes and recovery.
///
/// Operations on one id are serialized through [`IdLocks`]; the long part of a build
/// (extraction and embedding) runs without holding the lock, and the result is only
/// published if the document is still there, unchanged.
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    extractor: Arc<dyn TextExtractor>,
    embedding: Arc<dyn EmbeddingService>,
    options: IndexingOptions,
    locks: IdLocks,
    builds: BuildClaims,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TextExtractor>,
        embedding: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self::with_options(store, extractor, embedding, IndexingOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TextExtractor>,
        embedding: Arc<dyn EmbeddingService>,
        options: IndexingOptions,
    ) -> Self {
        Self {
            store,
            extractor,
            embedding,
            options,
            locks: IdLocks::new(),
            builds: BuildClaims::new(),
        }
    }

    pub fn schema_version(&self) -> String {
        self.embedding.schema_version()
    }

    pub fn is_building(&self, id: DocumentId) -> bool {
        self.builds.is_active(id)
    }

    #[instrument(skip(self, content, metadata), fields(size = content.len()))]
    pub async fn put_document(
        &self,
        content: Vec<u8>,
        filename: &str,
        content_type: Option<&str>,
        metadata: DocumentMetadata,
    ) -> Result<DocumentRecord, DomainError> {
        if content.is_empty() {
            return Err(DomainError::invalid("document is empty"));
        }
        if content.len() > self.options.max_upload_bytes {
            return Err(DomainError::invalid(format!(
                "document is {} bytes, the limit is {}",
                content.len(),
                self.options.max_upload_bytes
            )));
        }
        let filename = sanitize_filename(filename)?;
        let content_type = ContentType::resolve(content_type, &filename)?;

        let doc = SourceDocument {
            record: DocumentRecord::new(filename, content_type, &content, metadata),
            content,
        };
        let record = doc.record.clone();

        self.exclusive(record.id, move |store| async move { store.save_document(&doc).await })
            .await?;

        tracing::info!(document_id = %record.id, filename = %record.filename, "document stored");
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get_document(&self, id: DocumentId) -> Result<SourceDocument, DomainError> {
        let _guard = self.locks.read(id).await;
        self.store
            .load_document(id)
            .await?
            .ok_or(DomainError::DocumentNotFound(id))
    }

    #[instrument(skip(self))]
    pub async fn get_record(&self, id: DocumentId) -> Result<DocumentRecord, DomainError> {
        let _guard = self.locks.read(id).await;
        self.store
            .load_record(id)
            .await?
            .ok_or(DomainError::DocumentNotFound(id))
    }

    /// Records ordered by upload time, then id.
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, DomainError> {
        self.store.list_records().await
    }

    /// Every document with its index status.
    pub async fn overview(&self) -> Result<Vec<DocumentOverview>, DomainError> {
        let schema_version = self.schema_version();
        let mut out = Vec::new();
        for record in self.store.list_records().await? {
            let _guard = self.locks.read(record.id).await;
            let manifest = self.store.load_manifest(record.id).await?;
            let index = IndexStatus::of(manifest.as_ref(), &schema_version, &record.sha256);
            out.push(DocumentOverview { record, index });
        }
        Ok(out)
    }

    /// `DocumentNotFound` for an unknown id, `IndexNotBuilt` when nothing is published yet.
    #[instrument(skip(self))]
    pub async fn get_index(&self, id: DocumentId) -> Result<IndexArtifact, DomainError> {
        let _guard = self.locks.read(id).await;
        if self.store.load_record(id).await?.is_none() {
            return Err(DomainError::DocumentNotFound(id));
        }
        self.store
            .load_index(id)
            .await?
            .ok_or(DomainError::IndexNotBuilt(id))
    }

    #[instrument(skip(self))]
    pub async fn index_status(&self, id: DocumentId) -> Result<IndexStatus, DomainError> {
        let _guard = self.locks.read(id).await;
        let record = self
            .store
            .load_record(id)
            .await?
            .ok_or(DomainError::DocumentNotFound(id))?;
        let manifest = self.store.load_manifest(id).await?;
        Ok(IndexStatus::of(
            manifest.as_ref(),
            &self.schema_version(),
            &record.sha256,
        ))
    }

    /// Fails with `AlreadyIndexed` when a current artifact exists.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn build_index(&self, id: DocumentId) -> Result<IndexManifest, DomainError> {
        self.build(id, false).await
    }

    /// Rebuilds and replaces the artifact even when it is current.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn rebuild_index(&self, id: DocumentId) -> Result<IndexManifest, DomainError> {
        self.build(id, true).await
    }

    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn delete(&self, id: DocumentId) -> Result<(), DomainError> {
        let removed = self
            .exclusive(id, move |store| async move { store.remove_document(id).await })
            .await?;
        if !removed {
            return Err(DomainError::DocumentNotFound(id));
        }
        tracing::info!("document deleted");
        Ok(())
    }

    /// Repairs the persisted state and returns the documents that need an index build.
    ///
    /// Finishes interrupted deletes, drops artifacts without a document and abandoned
    /// temporary directories. Documents whose artifact is missing, stale or built from
    /// other content are reported, not treated as errors.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Vec<DocumentId>, DomainError> {
        let scan = self.store.scan().await?;

        for id in scan.interrupted_deletes {
            match self
                .exclusive(id, move |store| async move { store.remove_document(id).await })
                .await
            {
                Ok(_) => tracing::info!(document_id = %id, "finished interrupted delete"),
                Err(e) => tracing::warn!(document_id = %id, error = %e, "could not finish delete"),
            }
        }

        for id in scan.orphan_indexes {
            let removed = self
                .exclusive(id, move |store| async move {
                    if store.load_record(id).await?.is_some() {
                        return Ok(false);
                    }
                    store.remove_index(id).await
                })
                .await;
            match removed {
                Ok(true) => tracing::warn!(document_id = %id, "removed index without document"),
                Ok(false) => {}
                Err(e) => tracing::warn!(document_id = %id, error = %e, "could not remove orphan index"),
            }
        }

        let schema_version = self.schema_version();
        let pending: Vec<DocumentId> = scan
            .entries
            .iter()
            .filter(|entry| {
                IndexStatus::of(entry.manifest.as_ref(), &schema_version, &entry.record.sha256)
                    .needs_build()
            })
            .map(|entry| entry.record.id)
            .collect();

        tracing::info!(
            documents = scan.entries.len(),
            pending = pending.len(),
            leftovers_removed = scan.leftovers_removed,
            "reconciliation finished"
        );
        Ok(pending)
    }

    async fn build(&self, id: DocumentId, force: bool) -> Result<IndexManifest, DomainError> {
        let claim = self
            .builds
            .claim(id)
            .ok_or(DomainError::IndexingInProgress(id))?;
        let started = Instant::now();

        let artifact = match tokio::time::timeout(self.options.timeout, self.derive(id, force)).await
        {
            Ok(artifact) => artifact?,
            Err(_) => {
                tracing::warn!(timeout_secs = self.options.timeout.as_secs(), "index build timed out");
                return Err(DomainError::IndexingTimedOut(id));
            }
        };

        let manifest = self.publish(artifact, claim).await?;
        tracing::info!(
            passages = manifest.passage_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index published"
        );
        Ok(manifest)
    }

    /// Extracts, chunks and embeds the document. Nothing is written.
    async fn derive(&self, id: DocumentId, force: bool) -> Result<IndexArtifact, DomainError> {
        let schema_version = self.schema_version();
        let doc = {
            let _guard = self.locks.read(id).await;
            let doc = self
                .store
                .load_document(id)
                .await?
                .ok_or(DomainError::DocumentNotFound(id))?;
            if !force {
                if let Some(manifest) = self.store.load_manifest(id).await? {
                    if manifest.is_current(&schema_version, &doc.record.sha256) {
                        return Err(DomainError::AlreadyIndexed(id));
                    }
                }
            }
            doc
        };
        if !doc.is_intact() {
            return Err(DomainError::corrupt(format!(
                "content of {id} does not match its checksum"
            )));
        }

        let SourceDocument { record, content } = doc;
        let extractor = self.extractor.clone();
        let content_type = record.content_type;
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&content, content_type))
            .await
            .map_err(|e| DomainError::indexing_failed(id, format!("extraction task failed: {e}")))?
            .map_err(|e| DomainError::indexing_failed(id, e))?;

        if extracted.is_blank() {
            return Err(DomainError::indexing_failed(id, "no extractable text"));
        }
        let passages = chunk_pages(&extracted.pages, self.options.chunk_size);
        tracing::debug!(
            pages = extracted.pages.len(),
            passages = passages.len(),
            "document chunked"
        );

        let texts: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
        let vectors = self
            .embedding
            .embed_batch(&texts)
            .await
            .map_err(|e| DomainError::indexing_failed(id, e))?;
        if vectors.len() != passages.len() {
            return Err(DomainError::indexing_failed(
                id,
                format!("{} embeddings for {} passages", vectors.len(), passages.len()),
            ));
        }

        IndexArtifact::new(id, schema_version, record.sha256, vectors, passages)
            .map_err(|e| DomainError::indexing_failed(id, e))
    }

    /// Publishes unless the document was deleted or changed while the build ran.
    async fn publish(
        &self,
        artifact: IndexArtifact,
        claim: BuildClaim,
    ) -> Result<IndexManifest, DomainError> {
        let id = artifact.document_id();
        self.exclusive(id, move |store| async move {
            let _claim = claim;
            match store.load_record(id).await? {
                Some(record) if record.sha256 == artifact.manifest.source_sha256 => {}
                _ => {
                    tracing::debug!("document removed during build, result discarded");
                    return Err(DomainError::DocumentNotFound(id));
                }
            }
            store.publish_index(&artifact).await?;
            Ok(artifact.manifest)
        })
        .await
    }

    /// Runs `op` under the exclusive lock for `id` on a spawned task, so it completes
    /// and releases the lock even if the caller is dropped midway.
    async fn exclusive<T, F, Fut>(&self, id: DocumentId, op: F) -> Result<T, DomainError>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: Future<Output = Result<T, DomainError>> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.locks.write(id).await;
        let task = op(self.store.clone());
        tokio::spawn(
            async move {
                let result = task.await;
                drop(guard);
                result
            }
            .in_current_span(),
        )
        .await
        .map_err(|e| DomainError::internal(format!("store task failed: {e}")))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::domain::{ports::EmbeddingService, Embedding};
    use crate::infrastructure::{DefaultExtractor, FsDocumentStore, HashedEmbedding};

    pub(crate) struct FailingEmbedding;

    #[async_trait]
    impl EmbeddingService for FailingEmbedding {
        async fn embed(&self, _text: &str) -> Result<Embedding, DomainError> {
            Err(DomainError::external("provider unavailable"))
        }

        async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Embedding>, DomainError> {
            Err(DomainError::external("provider unavailable"))
        }

        fn dimension(&self) -> usize {
            8
        }

        fn schema_version(&self) -> String {
            "hashed:fnv-bow:8".into()
        }
    }

    pub(crate) struct SlowEmbedding {
        pub delay: Duration,
        pub inner: HashedEmbedding,
    }

    #[async_trait]
    impl EmbeddingService for SlowEmbedding {
        async fn embed(&self, text: &str) -> Result<Embedding, DomainError> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, DomainError> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn schema_version(&self) -> String {
            self.inner.schema_version()
        }
    }

    pub(crate) fn open_store(dir: &TempDir) -> Arc<FsDocumentStore> {
        Arc::new(FsDocumentStore::open(dir.path().join("documents"), dir.path().join("embeddings")).unwrap())
    }

    pub(crate) fn service_with(
        dir: &TempDir,
        embedding: Arc<dyn EmbeddingService>,
        options: IndexingOptions,
    ) -> Arc<DocumentService> {
        Arc::new(DocumentService::with_options(
            open_store(dir),
            Arc::new(DefaultExtractor),
            embedding,
            options,
        ))
    }

    pub(crate) fn service(dir: &TempDir) -> Arc<DocumentService> {
        service_with(dir, Arc::new(HashedEmbedding::new(8)), IndexingOptions::default())
    }

    pub(crate) async fn put_text(service: &DocumentService, text: &str) -> DocumentId {
        service
            .put_document(
                text.as_bytes().to_vec(),
                "notes.txt",
                Some("text/plain"),
                DocumentMetadata::default(),
            )
            .await
            .unwrap()
            .id
    }

    fn slow(delay_ms: u64) -> Arc<dyn EmbeddingService> {
        Arc::new(SlowEmbedding {
            delay: Duration::from_millis(delay_ms),
            inner: HashedEmbedding::new(8),
        })
    }

    #[tokio::test]
    async fn test_put_document_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let service = service_with(
            &dir,
            Arc::new(HashedEmbedding::new(8)),
            IndexingOptions {
                max_upload_bytes: 16,
                ..IndexingOptions::default()
            },
        );
        let meta = DocumentMetadata::default;

        let empty = service.put_document(vec![], "a.txt", None, meta()).await;
        let large = service.put_document(vec![b'x'; 17], "a.txt", None, meta()).await;
        let exe = service.put_document(b"MZ".to_vec(), "a.exe", None, meta()).await;
        let unnamed = service.put_document(b"hi".to_vec(), "../", None, meta()).await;

        for result in [empty, large, exe, unnamed] {
            assert!(matches!(result, Err(DomainError::InvalidInput(_))));
        }
        assert!(service.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_then_already_indexed() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let id = put_text(&service, "solar panels on the roof").await;

        assert!(matches!(
            service.get_index(id).await,
            Err(DomainError::IndexNotBuilt(_))
        ));

        let manifest = service.build_index(id).await.unwrap();
        assert_eq!(manifest.passage_count, 1);
        assert!(matches!(
            service.build_index(id).await,
            Err(DomainError::AlreadyIndexed(_))
        ));
        assert_eq!(
            service.index_status(id).await.unwrap(),
            IndexStatus::Current { passages: 1 }
        );

        let rebuilt = service.rebuild_index(id).await.unwrap();
        assert!(rebuilt.built_at >= manifest.built_at);
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let id = DocumentId::new();

        assert!(matches!(service.get_index(id).await, Err(DomainError::DocumentNotFound(_))));
        assert!(matches!(service.build_index(id).await, Err(DomainError::DocumentNotFound(_))));
        assert!(matches!(service.delete(id).await, Err(DomainError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_build_is_reported_by_reconcile() {
        let dir = TempDir::new().unwrap();
        let service = service_with(&dir, Arc::new(FailingEmbedding), IndexingOptions::default());
        let id = put_text(&service, "water usage").await;

        let err = service.build_index(id).await.unwrap_err();
        assert!(matches!(err, DomainError::IndexingFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(service.reconcile().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_blank_document_fails_indexing() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let id = put_text(&service, " \n\x0c \n").await;

        assert!(matches!(
            service.build_index(id).await,
            Err(DomainError::IndexingFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_timed_out_build_leaves_no_index() {
        let dir = TempDir::new().unwrap();
        let service = service_with(
            &dir,
            slow(500),
            IndexingOptions {
                timeout: Duration::from_millis(50),
                ..IndexingOptions::default()
            },
        );
        let id = put_text(&service, "late answer").await;

        assert!(matches!(
            service.build_index(id).await,
            Err(DomainError::IndexingTimedOut(_))
        ));
        assert!(!service.is_building(id));
        assert_eq!(service.index_status(id).await.unwrap(), IndexStatus::Missing);
    }

    #[tokio::test]
    async fn test_concurrent_build_of_same_id_is_refused() {
        let dir = TempDir::new().unwrap();
        let service = service_with(&dir, slow(200), IndexingOptions::default());
        let id = put_text(&service, "shared work").await;

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.build_index(id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            service.build_index(id).await,
            Err(DomainError::IndexingInProgress(_))
        ));
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_delete_during_build_discards_result() {
        let dir = TempDir::new().unwrap();
        let service = service_with(&dir, slow(200), IndexingOptions::default());
        let id = put_text(&service, "short lived").await;

        let build = {
            let service = service.clone();
            tokio::spawn(async move { service.build_index(id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.delete(id).await.unwrap();

        assert!(matches!(
            build.await.unwrap(),
            Err(DomainError::DocumentNotFound(_))
        ));
        assert!(!dir.path().join("embeddings").join(id.to_string()).exists());
        assert!(matches!(service.get_index(id).await, Err(DomainError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphan_index() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let id = put_text(&service, "kept").await;
        service.build_index(id).await.unwrap();

        let orphan = DocumentId::new();
        std::fs::create_dir(dir.path().join("embeddings").join(orphan.to_string())).unwrap();

        assert!(service.reconcile().await.unwrap().is_empty());
        assert!(!dir.path().join("embeddings").join(orphan.to_string()).exists());
        assert!(dir.path().join("embeddings").join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_overview_reports_status() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let built = put_text(&service, "indexed").await;
        let waiting = put_text(&service, "waiting").await;
        service.build_index(built).await.unwrap();

        let overview = service.overview().await.unwrap();
        let status = |id| {
            overview
                .iter()
                .find(|o| o.record.id == id)
                .map(|o| o.index.clone())
                .unwrap()
        };
        assert_eq!(status(built), IndexStatus::Current { passages: 1 });
        assert_eq!(status(waiting), IndexStatus::Missing);
    }
}
