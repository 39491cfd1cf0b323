mod conversation;
mod document;
mod embedding;
mod index;
pub mod links;
pub mod onace;
mod passage;

pub use conversation::{format_history, Message, MessageRole};
pub use document::{
    content_digest, sanitize_filename, ContentType, DocumentId, DocumentMetadata,
    DocumentRecord, SourceDocument,
};
pub use embedding::Embedding;
pub use index::{IndexArtifact, IndexManifest, IndexStatus, ScoredPassage};
pub use passage::{chunk_pages, Passage};
