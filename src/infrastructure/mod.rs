pub mod bootstrap;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod storage;
pub mod telemetry;

pub use bootstrap::{build_services, Services};
pub use config::{AppConfig, Config, PromptsConfig};
pub use embedding::{create_embedding_service, HashedEmbedding, OpenAiEmbedding};
pub use extract::DefaultExtractor;
pub use llm::OpenAiLlm;
pub use storage::FsDocumentStore;
