//! Configuration
//!
//! A single [`KnowledgeConfig`] covers extraction, retrieval, storage,
//! embeddings and the model provider. It is read from YAML and can be
//! overridden through environment variables.

use crate::embedding::EmbeddingConfig;
use crate::extract::{ExtractorConfig, RelationExtractorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Model provider options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
    Gemini,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAI),
            "ollama" => Ok(LlmProvider::Ollama),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(ConfigError::Invalid(format!("unknown provider {}", other))),
        }
    }
}

/// Remote model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Chat / completion model (e.g., "gpt-4o-mini", "llama3")
    pub model: String,
    /// Embedding model (e.g., "text-embedding-3-small")
    pub embedding_model: String,
    /// API Key (optional, can be loaded from env if None)
    pub api_key: Option<String>,
    /// API Base URL (optional, provider default otherwise)
    pub api_base_url: Option<String>,
    pub system_prompt: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_key: None,
            api_base_url: None,
            system_prompt: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionSettings {
    pub entity: ExtractorConfig,
    pub relation: RelationExtractorConfig,
    /// Units larger than this are skipped as malformed
    pub max_unit_bytes: usize,
    pub allow_self_loops: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            entity: ExtractorConfig::default(),
            relation: RelationExtractorConfig::default(),
            max_unit_bytes: 1024 * 1024,
            allow_self_loops: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    /// Hops around matched entities in local mode
    pub depth: usize,
    /// Reciprocal rank fusion constant for hybrid mode
    pub rrf_k: f64,
    pub max_communities: usize,
    /// Chunk size (chars) for text splitting
    pub chunk_size: usize,
    /// Overlap (chars) between chunks
    pub chunk_overlap: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            depth: 1,
            rrf_k: 60.0,
            max_communities: 3,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    File,
    GraphDb,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory of the file-backed store
    pub root: PathBuf,
    /// RocksDB directory of the graph-database store
    pub graphdb_path: PathBuf,
    /// Use the file store when the primary backend is unreachable
    pub fallback_to_file: bool,
    pub connect_retries: u32,
    pub backoff_ms: u64,
    /// Severe violations a loaded graph may carry before the load fails
    pub integrity_tolerance: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            root: PathBuf::from("./data/graphs"),
            graphdb_path: PathBuf::from("./data/graphdb"),
            fallback_to_file: true,
            connect_retries: 3,
            backoff_ms: 100,
            integrity_tolerance: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub extraction: ExtractionSettings,
    pub search: SearchConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
}

impl KnowledgeConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: KnowledgeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        debug!("Loaded configuration from {:?}", path.as_ref());
        Self::from_yaml_str(&raw)
    }

    /// Apply environment overrides from the process environment
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in
    /// [`apply_env`](Self::apply_env))
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(provider) = lookup("KNOWGRAPH_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = lookup("KNOWGRAPH_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("KNOWGRAPH_LLM_BASE_URL") {
            self.llm.api_base_url = Some(url);
        }
        if let Some(key) = lookup("KNOWGRAPH_LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(root) = lookup("KNOWGRAPH_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(path) = lookup("KNOWGRAPH_GRAPHDB_PATH") {
            self.storage.graphdb_path = PathBuf::from(path);
        }
        self.validate()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.search.chunk_size == 0 {
            return Err(ConfigError::Invalid("search.chunk_size must be positive".into()));
        }
        if self.search.chunk_overlap >= self.search.chunk_size {
            return Err(ConfigError::Invalid(
                "search.chunk_overlap must be smaller than search.chunk_size".into(),
            ));
        }
        if self.search.top_k == 0 {
            return Err(ConfigError::Invalid("search.top_k must be positive".into()));
        }
        self.embedding
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = KnowledgeConfig::from_yaml_str(
            r#"
search:
  top_k: 3
storage:
  backend: graphdb
  integrity_tolerance: 2
"#,
        )
        .unwrap();
        assert_eq!(config.search.top_k, 3);
        assert_eq!(config.search.chunk_size, 1000);
        assert_eq!(config.storage.backend, BackendKind::GraphDb);
        assert_eq!(config.storage.integrity_tolerance, 2);
        assert!(config.storage.fallback_to_file);
    }

    #[test]
    fn test_invalid_chunking_rejected() {
        let err = KnowledgeConfig::from_yaml_str("search:\n  chunk_size: 10\n  chunk_overlap: 10\n");
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KNOWGRAPH_LLM_PROVIDER", "ollama"),
            ("OPENAI_API_KEY", "sk-test"),
            ("KNOWGRAPH_STORAGE_ROOT", "/tmp/kg"),
        ]
        .into_iter()
        .collect();
        let mut config = KnowledgeConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.storage.root, PathBuf::from("/tmp/kg"));
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = KnowledgeConfig::default();
        assert!(config
            .apply_overrides(|k| (k == "KNOWGRAPH_LLM_PROVIDER").then(|| "acme".to_string()))
            .is_err());
    }
}
