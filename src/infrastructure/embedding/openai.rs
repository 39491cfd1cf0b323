use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::domain::{ports::EmbeddingService, DomainError, Embedding};
use crate::infrastructure::config::{EmbeddingConfig, Secret};

/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// Retries with exponential backoff on HTTP 429, 5xx and transport errors; other
/// client errors fail immediately.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    api_key: Secret,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: u32,
    batch_size: usize,
    schema_version: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, DomainError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| DomainError::invalid("embedding api key is not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| DomainError::internal(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
            schema_version: config.schema_version(),
        })
    }

    fn request_body(&self, texts: &[&str]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        // Only the v3 models accept a reduced output size.
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dimension);
        }
        body
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Embedding>, DomainError> {
        let body = self.request_body(texts);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(self.api_key.expose())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingResponse = response
                        .json()
                        .await
                        .map_err(|e| DomainError::external(format!("bad embedding response: {e}")))?;
                    return parse_response(parsed, texts.len(), self.dimension);
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let err = DomainError::external(format!("embedding API error {status}: {text}"));
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(DomainError::external(format!("embedding request failed: {e}")));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DomainError::external("embedding failed after retries")))
    }
}

fn parse_response(
    response: EmbeddingResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Embedding>, DomainError> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(DomainError::external(format!(
            "embedding API returned {} vectors for {expected} inputs",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);

    data.into_iter()
        .map(|d| {
            if d.embedding.len() != dimension {
                return Err(DomainError::external(format!(
                    "embedding API returned dimension {}, expected {dimension}",
                    d.embedding.len()
                )));
            }
            Ok(Embedding::new(d.embedding))
        })
        .collect()
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding, DomainError> {
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::internal("No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, DomainError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.request(batch).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn schema_version(&self) -> String {
        self.schema_version.clone()
    }
}
