use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";
const DEFAULT_PROMPTS_PATH: &str = "config/prompts.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the service reads at startup, built once and passed down explicitly.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub config: Config,
    pub prompts: PromptsConfig,
}

impl AppConfig {
    /// Loads the YAML files named by `RAG_CONFIG` / `RAG_PROMPTS` (missing files fall back
    /// to defaults), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("RAG_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let prompts_path =
            std::env::var("RAG_PROMPTS").unwrap_or_else(|_| DEFAULT_PROMPTS_PATH.into());

        let mut app = Self {
            config: read_yaml_or_default(Path::new(&config_path))?,
            prompts: read_yaml_or_default(Path::new(&prompts_path))?,
        };
        app.config.apply_env(|key| std::env::var(key).ok())?;
        app.config.validate()?;
        Ok(app)
    }
}

fn read_yaml_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub indexing: IndexingConfig,
    pub rag: RagConfig,
}

impl Config {
    /// Applies environment overrides. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DOCUMENTS_DIR") {
            self.storage.documents_dir = dir.into();
        }
        if let Some(dir) = lookup("EMBEDDINGS_DIR") {
            self.storage.embeddings_dir = dir.into();
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.embedding.api_key = Some(Secret(key.clone()));
            self.llm.api_key = Some(Secret(key));
        }
        if let Some(key) = lookup("LLM_API_KEY").filter(|k| !k.is_empty()) {
            self.llm.api_key = Some(Secret(key));
        }
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = match provider.to_ascii_lowercase().as_str() {
                "openai" => EmbeddingProvider::OpenAi,
                "hashed" => EmbeddingProvider::Hashed,
                _ => {
                    return Err(ConfigError::Env {
                        key: "EMBEDDING_PROVIDER",
                        value: provider,
                    })
                }
            };
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(version) = lookup("EMBEDDING_SCHEMA_VERSION") {
            self.embedding.schema_version = Some(version);
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(host) = lookup("SERVER_HOST") {
            self.server.host = host;
        }
        // Hosting platforms inject PORT; SERVER_PORT wins when both are set.
        if let Some(port) = lookup("SERVER_PORT").or_else(|| lookup("PORT")) {
            self.server.port = port.parse().map_err(|_| ConfigError::Env {
                key: "SERVER_PORT",
                value: port,
            })?;
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = self.embedding.api_key.clone();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid("embedding.dimension must be positive".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be positive".into()));
        }
        if self.indexing.chunk_size == 0 {
            return Err(ConfigError::Invalid("indexing.chunk_size must be positive".into()));
        }
        if self.indexing.concurrency == 0 {
            return Err(ConfigError::Invalid("indexing.concurrency must be positive".into()));
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi && self.embedding.api_key.is_none()
        {
            return Err(ConfigError::Invalid(
                "embedding.provider openai requires an api key (OPENAI_API_KEY)".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub documents_dir: PathBuf,
    pub embeddings_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("data/documents"),
            embeddings_dir: PathBuf::from("data/embeddings"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Hashed,
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAi => "openai",
            Self::Hashed => "hashed",
        })
    }
}

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(pub String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<Secret>,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub batch_size: usize,
    /// Overrides the derived `<provider>:<model>:<dimension>` tag.
    pub schema_version: Option<String>,
}

impl EmbeddingConfig {
    pub fn schema_version(&self) -> String {
        self.schema_version
            .clone()
            .unwrap_or_else(|| format!("{}:{}:{}", self.provider, self.model, self.dimension))
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            batch_size: 64,
            schema_version: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    /// Falls back to `embedding.api_key` when unset.
    pub api_key: Option<Secret>,
    pub base_url: String,
    pub temperature: f64,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.0,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub chunk_size: usize,
    pub timeout_seconds: u64,
    pub concurrency: usize,
    pub max_upload_bytes: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            timeout_seconds: 300,
            concurrency: 3,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
    pub query_expansions: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            query_expansions: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub system: String,
    pub expansion: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system: "You are an expert assistant answering questions from a document collection.\n\
                1. ONLY use information directly from the provided context documents.\n\
                2. If the documents do not contain sufficient information, say so clearly.\n\
                3. Cite the source filename in parentheses after relevant statements.\n\
                4. Never invent citations or refer to documents that are not in the context.\n\
                5. Present tabular data as markdown tables."
                .to_string(),
            expansion: "You are a query expansion assistant. Generate alternative versions of the \
                user's query that might retrieve additional relevant information. Return ONLY a \
                numbered list of queries, no explanations."
                .to_string(),
        }
    }
}
