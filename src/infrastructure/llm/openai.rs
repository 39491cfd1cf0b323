use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use std::time::Duration;

use crate::domain::{ports::LlmService, DomainError};
use crate::infrastructure::config::LlmConfig;

pub struct OpenAiLlm {
    client: openai::Client,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl OpenAiLlm {
    pub fn from_config(config: &LlmConfig) -> Result<Self, DomainError> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| DomainError::invalid("llm api key is not configured"))?;

        let client = openai::Client::builder()
            .api_key(api_key.expose())
            .base_url(&config.base_url)
            .build()
            .map_err(|e| DomainError::internal(format!("failed to build LLM client: {e}")))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    async fn run(&self, system: Option<&str>, prompt: &str) -> Result<String, DomainError> {
        let mut builder = self.client.agent(&self.model).temperature(self.temperature);
        if let Some(system) = system {
            builder = builder.preamble(system);
        }
        let agent = builder.build();

        tokio::time::timeout(self.timeout, agent.prompt(prompt))
            .await
            .map_err(|_| DomainError::timeout("Language model call timed out"))?
            .map_err(|e| DomainError::external(format!("Language model failed: {e}")))
    }
}

#[async_trait]
impl LlmService for OpenAiLlm {
    async fn complete(&self, prompt: &str) -> Result<String, DomainError> {
        self.run(None, prompt).await
    }

    async fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<String, DomainError> {
        self.run(Some(system), prompt).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}
