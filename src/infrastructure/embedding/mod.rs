mod hashed;
mod openai;

use std::sync::Arc;

pub use hashed::HashedEmbedding;
pub use openai::OpenAiEmbedding;

use crate::domain::{ports::EmbeddingService, DomainError};
use crate::infrastructure::config::{EmbeddingConfig, EmbeddingProvider};

pub fn create_embedding_service(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingService>, DomainError> {
    Ok(match config.provider {
        EmbeddingProvider::OpenAi => Arc::new(OpenAiEmbedding::from_config(config)?),
        EmbeddingProvider::Hashed => Arc::new(
            HashedEmbedding::new(config.dimension).with_schema_version(config.schema_version()),
        ),
    })
}
