mod document_store;
mod embedding;
mod extractor;
mod llm;

pub use document_store::{DocumentStore, StoreEntry, StoreScan};
pub use embedding::EmbeddingService;
pub use extractor::{ExtractedText, TextExtractor};
pub use llm::LlmService;
