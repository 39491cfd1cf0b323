use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::application::{DocumentService, IndexScheduler, RagService};
use crate::infrastructure::{AppConfig, FsDocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentService>,
    pub rag: Arc<RagService>,
    pub scheduler: Arc<IndexScheduler>,
    pub store: FsDocumentStore,
    pub config: Arc<AppConfig>,
    reconciled: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        documents: Arc<DocumentService>,
        rag: Arc<RagService>,
        scheduler: Arc<IndexScheduler>,
        store: FsDocumentStore,
        config: AppConfig,
    ) -> Self {
        Self {
            documents,
            rag,
            scheduler,
            store,
            config: Arc::new(config),
            reconciled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Called once startup reconciliation has finished.
    pub fn mark_reconciled(&self) {
        self.reconciled.store(true, Ordering::Release);
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled.load(Ordering::Acquire)
    }

    /// Reconciles the store and schedules the reported builds, retrying with backoff
    /// until a pass succeeds. Readiness flips only after that.
    pub async fn reconcile_until_ready(&self, initial_delay: Duration) {
        let max_delay = Duration::from_secs(60);
        let mut delay = initial_delay;
        let mut attempt = 1u32;

        loop {
            match self.documents.reconcile().await {
                Ok(pending) => {
                    let scheduled = self.scheduler.schedule_all(pending);
                    tracing::info!(scheduled, attempt, "startup reconciliation complete");
                    self.mark_reconciled();
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "startup reconciliation failed"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                    attempt += 1;
                }
            }
        }
    }
}
