use std::sync::Arc;
use std::time::Duration;

use crate::application::{DocumentService, IndexScheduler, IndexingOptions, RagOptions, RagService};
use crate::domain::{ports::LlmService, DomainError};
use crate::infrastructure::{
    create_embedding_service, AppConfig, DefaultExtractor, FsDocumentStore, OpenAiLlm,
};

/// The wired service graph shared by both binaries.
pub struct Services {
    pub store: FsDocumentStore,
    pub documents: Arc<DocumentService>,
    pub rag: Arc<RagService>,
    pub scheduler: Arc<IndexScheduler>,
}

pub fn build_services(app: &AppConfig) -> Result<Services, DomainError> {
    let config = &app.config;
    let store = FsDocumentStore::open(&config.storage.documents_dir, &config.storage.embeddings_dir)?;
    let embedding = create_embedding_service(&config.embedding)?;

    let llm: Option<Arc<dyn LlmService>> = match OpenAiLlm::from_config(&config.llm) {
        Ok(llm) => Some(Arc::new(llm) as Arc<dyn LlmService>),
        Err(e) => {
            tracing::warn!(error = %e, "answer generation disabled");
            None
        }
    };

    let documents = Arc::new(DocumentService::with_options(
        Arc::new(store.clone()),
        Arc::new(DefaultExtractor),
        embedding.clone(),
        IndexingOptions {
            chunk_size: config.indexing.chunk_size,
            timeout: Duration::from_secs(config.indexing.timeout_seconds),
            max_upload_bytes: config.indexing.max_upload_bytes,
        },
    ));
    let rag = Arc::new(RagService::new(
        documents.clone(),
        embedding,
        llm,
        RagOptions {
            top_k: config.rag.top_k,
            query_expansions: config.rag.query_expansions,
            system_prompt: app.prompts.system.clone(),
            expansion_prompt: app.prompts.expansion.clone(),
        },
    ));
    let scheduler = Arc::new(IndexScheduler::new(documents.clone(), config.indexing.concurrency));

    tracing::info!(
        provider = %config.embedding.provider,
        schema_version = %documents.schema_version(),
        "services initialized"
    );

    Ok(Services {
        store,
        documents,
        rag,
        scheduler,
    })
}
