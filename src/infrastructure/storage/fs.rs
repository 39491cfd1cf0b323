use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::{
    ports::{DocumentStore, StoreEntry, StoreScan},
    DocumentId, DocumentRecord, DomainError, Embedding, IndexArtifact, IndexManifest, Passage,
    SourceDocument,
};

const RECORD_FILE: &str = "document.json";
const CONTENT_FILE: &str = "content.bin";
const TOMBSTONE_FILE: &str = "DELETED";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.json";
const PASSAGES_FILE: &str = "passages.json";
const TMP_PREFIX: &str = ".tmp-";
const TRASH_PREFIX: &str = ".trash-";

/// Filesystem-backed store.
///
/// ```text
/// <documents_dir>/<id>/{document.json, content.bin}
/// <embeddings_dir>/<id>/{manifest.json, vectors.json, passages.json}
/// ```
///
/// Entries are assembled in a `.tmp-*` sibling directory, fsynced, and renamed into
/// place. Directories being replaced or deleted are first renamed to `.trash-*`.
#[derive(Clone)]
pub struct FsDocumentStore {
    layout: Arc<Layout>,
}

struct Layout {
    documents_dir: PathBuf,
    embeddings_dir: PathBuf,
    /// Staging and trash directories owned by running operations; scans leave them alone.
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl FsDocumentStore {
    pub fn open(
        documents_dir: impl Into<PathBuf>,
        embeddings_dir: impl Into<PathBuf>,
    ) -> Result<Self, DomainError> {
        let documents_dir = documents_dir.into();
        let embeddings_dir = embeddings_dir.into();
        fs::create_dir_all(&documents_dir)?;
        fs::create_dir_all(&embeddings_dir)?;

        tracing::info!(
            documents = %documents_dir.display(),
            embeddings = %embeddings_dir.display(),
            "document store opened"
        );

        Ok(Self {
            layout: Arc::new(Layout {
                documents_dir,
                embeddings_dir,
                in_flight: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn documents_dir(&self) -> &Path {
        &self.layout.documents_dir
    }

    pub fn embeddings_dir(&self) -> &Path {
        &self.layout.embeddings_dir
    }

    /// Both namespaces exist and accept writes.
    pub fn is_writable(&self) -> bool {
        [self.documents_dir(), self.embeddings_dir()]
            .iter()
            .all(|dir| check_writable(dir).is_ok())
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, DomainError>
    where
        F: FnOnce(&Layout) -> Result<T, DomainError> + Send + 'static,
        T: Send + 'static,
    {
        let layout = self.layout.clone();
        tokio::task::spawn_blocking(move || op(&layout))
            .await
            .map_err(|e| DomainError::internal(format!("storage task failed: {e}")))?
    }
}

impl Layout {
    fn document_dir(&self, id: DocumentId) -> PathBuf {
        self.documents_dir.join(id.to_string())
    }

    fn index_dir(&self, id: DocumentId) -> PathBuf {
        self.embeddings_dir.join(id.to_string())
    }

    fn stage(&self, namespace: &Path, id: DocumentId) -> Result<StagingDir<'_>, DomainError> {
        let path = namespace.join(format!("{TMP_PREFIX}{id}-{}", Uuid::new_v4().simple()));
        // Tracked before it exists so a concurrent scan never sees it untracked.
        self.track(&path);
        if let Err(e) = fs::create_dir(&path) {
            self.untrack(&path);
            return Err(e.into());
        }
        Ok(StagingDir {
            layout: self,
            path,
            committed: false,
        })
    }

    fn track(&self, path: &Path) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.insert(path.to_path_buf());
        }
    }

    fn untrack(&self, path: &Path) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(path);
        }
    }

    fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(path))
            .unwrap_or(true)
    }

    /// Renames `dir` out of its final name, then deletes it.
    fn discard_dir(&self, dir: &Path, id: DocumentId) -> io::Result<bool> {
        let Some(parent) = dir.parent() else {
            return Ok(false);
        };
        let trash = parent.join(format!("{TRASH_PREFIX}{id}-{}", Uuid::new_v4().simple()));
        self.track(&trash);
        match fs::rename(dir, &trash) {
            Ok(()) => {}
            Err(e) => {
                self.untrack(&trash);
                return match e.kind() {
                    io::ErrorKind::NotFound => Ok(false),
                    _ => Err(e),
                };
            }
        }
        let result = sync_dir(parent).and_then(|_| fs::remove_dir_all(&trash));
        self.untrack(&trash);
        result.map(|_| true)
    }

    fn read_record(&self, id: DocumentId) -> Result<Option<DocumentRecord>, DomainError> {
        let dir = self.document_dir(id);
        if dir.join(TOMBSTONE_FILE).exists() {
            return Ok(None);
        }
        match read_optional(&dir.join(RECORD_FILE))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_manifest(&self, id: DocumentId) -> Result<Option<IndexManifest>, DomainError> {
        match read_optional(&self.index_dir(id).join(MANIFEST_FILE))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_document(&self, doc: &SourceDocument) -> Result<(), DomainError> {
        let id = doc.id();
        let target = self.document_dir(id);
        if target.exists() {
            return Err(DomainError::internal(format!("document {id} already stored")));
        }

        let staging = self.stage(&self.documents_dir, id)?;
        write_synced(&staging.path.join(CONTENT_FILE), &doc.content)?;
        write_synced(
            &staging.path.join(RECORD_FILE),
            &serde_json::to_vec_pretty(&doc.record)?,
        )?;
        staging.commit(&target)?;
        Ok(())
    }

    fn write_index(&self, artifact: &IndexArtifact) -> Result<(), DomainError> {
        let id = artifact.document_id();
        let target = self.index_dir(id);

        let staging = self.stage(&self.embeddings_dir, id)?;
        write_synced(
            &staging.path.join(VECTORS_FILE),
            &serde_json::to_vec(&artifact.vectors)?,
        )?;
        write_synced(
            &staging.path.join(PASSAGES_FILE),
            &serde_json::to_vec(&artifact.passages)?,
        )?;
        write_synced(
            &staging.path.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(&artifact.manifest)?,
        )?;

        // A crash between these two steps leaves "document without index".
        self.discard_dir(&target, id)?;
        staging.commit(&target)?;
        Ok(())
    }

    fn read_index(&self, id: DocumentId) -> Result<Option<IndexArtifact>, DomainError> {
        let dir = self.index_dir(id);
        let Some(manifest) = self.read_manifest(id)? else {
            return Ok(None);
        };
        if manifest.document_id != id {
            return Err(DomainError::corrupt(format!(
                "index stored under {id} belongs to document {}",
                manifest.document_id
            )));
        }
        let vectors: Vec<Embedding> = serde_json::from_slice(&fs::read(dir.join(VECTORS_FILE))?)?;
        let passages: Vec<Passage> = serde_json::from_slice(&fs::read(dir.join(PASSAGES_FILE))?)?;

        let artifact = IndexArtifact {
            manifest,
            vectors,
            passages,
        };
        artifact.validate()?;
        Ok(Some(artifact))
    }

    fn delete_document(&self, id: DocumentId) -> Result<bool, DomainError> {
        let dir = self.document_dir(id);
        if !dir.exists() {
            // Nothing to tombstone, but never leave an artifact behind.
            self.discard_dir(&self.index_dir(id), id)?;
            return Ok(false);
        }

        write_synced(&dir.join(TOMBSTONE_FILE), b"")?;
        sync_dir(&dir)?;
        self.discard_dir(&self.index_dir(id), id)?;
        self.discard_dir(&dir, id)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<DocumentRecord>, DomainError> {
        let mut records = Vec::new();
        for id in self.ids_in(&self.documents_dir)? {
            match self.read_record(id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(document_id = %id, error = %e, "skipping unreadable document"),
            }
        }
        records.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Identifiers named by entries of `namespace`, ignoring staging and trash.
    fn ids_in(&self, namespace: &Path) -> Result<Vec<DocumentId>, DomainError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(namespace)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            match name.parse() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!(entry = %name, "ignoring unexpected store entry"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn remove_leftovers(&self, namespace: &Path) -> Result<usize, DomainError> {
        let mut removed = 0;
        for entry in fs::read_dir(namespace)? {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let leftover = name.starts_with(TMP_PREFIX) || name.starts_with(TRASH_PREFIX);
            if !leftover || self.is_in_flight(&path) {
                continue;
            }
            // The owner may have committed or removed it since the listing.
            if remove_path(&path)? {
                tracing::warn!(path = %path.display(), "removed abandoned store directory");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn scan(&self) -> Result<StoreScan, DomainError> {
        let mut scan = StoreScan {
            leftovers_removed: self.remove_leftovers(&self.documents_dir)?
                + self.remove_leftovers(&self.embeddings_dir)?,
            ..StoreScan::default()
        };

        let mut known = BTreeSet::new();
        for id in self.ids_in(&self.documents_dir)? {
            known.insert(id);
            if self.document_dir(id).join(TOMBSTONE_FILE).exists() {
                scan.interrupted_deletes.push(id);
                continue;
            }
            let record = match self.read_record(id) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(document_id = %id, error = %e, "skipping unreadable document");
                    continue;
                }
            };
            let manifest = self.read_manifest(id).unwrap_or_else(|e| {
                tracing::warn!(document_id = %id, error = %e, "unreadable index manifest");
                None
            });
            scan.entries.push(StoreEntry { record, manifest });
        }

        for id in self.ids_in(&self.embeddings_dir)? {
            if !known.contains(&id) {
                scan.orphan_indexes.push(id);
            }
        }

        Ok(scan)
    }
}

/// A directory being assembled under a temporary name. Removed on drop unless committed,
/// which covers both errors and a cancelled caller.
struct StagingDir<'a> {
    layout: &'a Layout,
    path: PathBuf,
    committed: bool,
}

impl StagingDir<'_> {
    fn commit(mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        if let Some(parent) = target.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    }
}

impl Drop for StagingDir<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging directory");
            }
        }
        self.layout.untrack(&self.path);
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Removes a file or directory tree; `false` if it was already gone.
fn remove_path(path: &Path) -> io::Result<bool> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn check_writable(dir: &Path) -> io::Result<()> {
    let marker = dir.join(format!(".write-check-{}", Uuid::new_v4().simple()));
    write_synced(&marker, b"ok")?;
    fs::remove_file(marker)
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn save_document(&self, doc: &SourceDocument) -> Result<(), DomainError> {
        let doc = doc.clone();
        self.blocking(move |layout| layout.write_document(&doc)).await
    }

    async fn load_record(&self, id: DocumentId) -> Result<Option<DocumentRecord>, DomainError> {
        self.blocking(move |layout| layout.read_record(id)).await
    }

    async fn load_document(
        &self,
        id: DocumentId,
    ) -> Result<Option<SourceDocument>, DomainError> {
        self.blocking(move |layout| {
            let Some(record) = layout.read_record(id)? else {
                return Ok(None);
            };
            let content = fs::read(layout.document_dir(id).join(CONTENT_FILE))?;
            let doc = SourceDocument { record, content };
            if !doc.is_intact() {
                return Err(DomainError::corrupt(format!(
                    "document {id}: content does not match its checksum"
                )));
            }
            Ok(Some(doc))
        })
        .await
    }

    async fn list_records(&self) -> Result<Vec<DocumentRecord>, DomainError> {
        self.blocking(|layout| layout.list()).await
    }

    async fn load_manifest(
        &self,
        id: DocumentId,
    ) -> Result<Option<IndexManifest>, DomainError> {
        self.blocking(move |layout| layout.read_manifest(id)).await
    }

    async fn load_index(&self, id: DocumentId) -> Result<Option<IndexArtifact>, DomainError> {
        self.blocking(move |layout| layout.read_index(id)).await
    }

    async fn publish_index(&self, artifact: &IndexArtifact) -> Result<(), DomainError> {
        let artifact = artifact.clone();
        self.blocking(move |layout| layout.write_index(&artifact)).await
    }

    async fn remove_index(&self, id: DocumentId) -> Result<bool, DomainError> {
        self.blocking(move |layout| Ok(layout.discard_dir(&layout.index_dir(id), id)?))
            .await
    }

    async fn remove_document(&self, id: DocumentId) -> Result<bool, DomainError> {
        self.blocking(move |layout| layout.delete_document(id)).await
    }

    async fn scan(&self) -> Result<StoreScan, DomainError> {
        self.blocking(|layout| layout.scan()).await
    }
}
