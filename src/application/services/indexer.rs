use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::application::services::document::DocumentService;
use crate::domain::{DocumentId, DomainError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Latest background build requested for a document.
#[derive(Debug, Clone, Serialize)]
pub struct IndexJob {
    pub job_id: Uuid,
    pub document_id: DocumentId,
    pub force: bool,
    pub status: JobStatus,
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IndexJob {
    fn pending(document_id: DocumentId, force: bool) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            document_id,
            force,
            status: JobStatus::Pending,
            error: None,
            queued_at: Utc::now(),
            completed_at: None,
        }
    }

    fn processing(mut self) -> Self {
        self.status = JobStatus::Processing;
        self
    }

    fn completed(mut self) -> Self {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Runs index builds in the background, at most `concurrency` at a time.
///
/// Job state lives in memory only; after a restart, reconciliation finds the work again.
pub struct IndexScheduler {
    documents: Arc<DocumentService>,
    permits: Arc<Semaphore>,
    jobs: Arc<Mutex<HashMap<DocumentId, IndexJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexScheduler {
    pub fn new(documents: Arc<DocumentService>, concurrency: usize) -> Self {
        Self {
            documents,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Queues a build. An unforced request for a document that already has an
    /// unfinished job returns that job.
    pub fn schedule(&self, id: DocumentId, force: bool) -> IndexJob {
        let job = {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = jobs.get(&id).filter(|j| !j.is_finished() && !force) {
                return existing.clone();
            }
            let job = IndexJob::pending(id, force);
            jobs.insert(id, job.clone());
            job
        };

        let span = tracing::info_span!("index_job", job_id = %job.job_id, document_id = %id);
        let handle = tokio::spawn(
            run(
                self.documents.clone(),
                self.permits.clone(),
                self.jobs.clone(),
                job.clone(),
            )
            .instrument(span),
        );

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        job
    }

    pub fn schedule_all(&self, ids: impl IntoIterator<Item = DocumentId>) -> usize {
        ids.into_iter().map(|id| self.schedule(id, false)).count()
    }

    pub fn job(&self, id: DocumentId) -> Option<IndexJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Drops the job record of a deleted document.
    pub fn forget(&self, id: DocumentId) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Waits for every job scheduled so far.
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "index job panicked");
            }
        }
    }
}

async fn run(
    documents: Arc<DocumentService>,
    permits: Arc<Semaphore>,
    jobs: Arc<Mutex<HashMap<DocumentId, IndexJob>>>,
    job: IndexJob,
) {
    let update = |job: IndexJob| {
        let mut jobs = jobs.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer job for the same document owns the record.
        if jobs.get(&job.document_id).is_some_and(|j| j.job_id == job.job_id) {
            jobs.insert(job.document_id, job);
        }
    };

    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            update(job.failed("scheduler is shut down"));
            return;
        }
    };

    let job = job.processing();
    update(job.clone());
    tracing::debug!("index job started");

    let id = job.document_id;
    let result = if job.force {
        documents.rebuild_index(id).await
    } else {
        documents.build_index(id).await
    };

    match result {
        Ok(_) | Err(DomainError::AlreadyIndexed(_)) => {
            tracing::info!("index job completed");
            update(job.completed());
        }
        Err(e) => {
            tracing::warn!(error = %e, retryable = e.is_retryable(), "index job failed");
            update(job.failed(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::application::services::document::tests::{put_text, service};
    use crate::domain::IndexStatus;

    #[tokio::test]
    async fn test_scheduled_build_completes() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        let id = put_text(&documents, "heat pumps").await;
        let scheduler = IndexScheduler::new(documents.clone(), 2);

        let job = scheduler.schedule(id, false);
        assert_eq!(job.status, JobStatus::Pending);
        scheduler.drain().await;

        assert_eq!(scheduler.job(id).unwrap().status, JobStatus::Completed);
        assert_eq!(
            documents.index_status(id).await.unwrap(),
            IndexStatus::Current { passages: 1 }
        );
    }

    #[tokio::test]
    async fn test_already_indexed_counts_as_completed() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        let id = put_text(&documents, "insulation").await;
        documents.build_index(id).await.unwrap();
        let scheduler = IndexScheduler::new(documents, 1);

        scheduler.schedule(id, false);
        scheduler.drain().await;
        assert_eq!(scheduler.job(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_document_fails_job() {
        let dir = TempDir::new().unwrap();
        let scheduler = IndexScheduler::new(service(&dir), 1);
        let id = DocumentId::new();

        scheduler.schedule(id, true);
        scheduler.drain().await;

        let job = scheduler.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unfinished_job_is_reused() {
        let dir = TempDir::new().unwrap();
        let documents = service(&dir);
        let id = put_text(&documents, "queued").await;
        let scheduler = IndexScheduler::new(documents, 1);

        let first = scheduler.schedule(id, false);
        let second = scheduler.schedule(id, false);
        assert_eq!(first.job_id, second.job_id);

        scheduler.drain().await;
        scheduler.forget(id);
        assert!(scheduler.job(id).is_none());
    }
}
