pub mod document;
pub mod indexer;
pub mod rag;

pub use document::{DocumentOverview, DocumentService, IndexingOptions};
pub use indexer::{IndexJob, IndexScheduler, JobStatus};
pub use rag::{Answer, RagOptions, RagService, Retrieval, RetrievalRequest, RetrievedPassage};
