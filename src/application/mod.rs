//! Application layer - Use cases and orchestration.
//!
//! Services depend on domain ports (traits) rather than concrete implementations.

pub mod locks;
pub mod services;

pub use services::{
    Answer, DocumentOverview, DocumentService, IndexJob, IndexScheduler, IndexingOptions,
    JobStatus, RagOptions, RagService, Retrieval, RetrievalRequest, RetrievedPassage,
};
