use crate::domain::errors::DomainError;
use async_trait::async_trait;

/// Text generation backend used for answers and query expansion.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, DomainError>;
    async fn complete_with_system(&self, system: &str, prompt: &str)
        -> Result<String, DomainError>;

    /// Model identifier reported by readiness checks.
    fn model(&self) -> &str {
        "unknown"
    }
}
