use async_trait::async_trait;

use crate::domain::{ports::EmbeddingService, DomainError, Embedding};

/// Offline bag-of-words embedder using signed feature hashing.
///
/// Deterministic and network-free; texts sharing words get similar vectors. Used for
/// local runs without provider credentials and in tests.
pub struct HashedEmbedding {
    dimension: usize,
    schema_version: String,
}

impl HashedEmbedding {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            schema_version: format!("hashed:fnv-bow:{dimension}"),
        }
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = schema_version.into();
        self
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vec = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }

        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter_mut().for_each(|x| *x /= norm);
        } else {
            // Keep blank text well-formed (non-zero) so artifacts validate.
            vec[0] = 1.0;
        }
        Embedding::new(vec)
    }
}

impl Default for HashedEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingService for HashedEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding, DomainError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, DomainError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn schema_version(&self) -> String {
        self.schema_version.clone()
    }
}
