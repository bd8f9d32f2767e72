//! ============================================================================
//! Configuration - Backend, embedding and chunking settings
//! ============================================================================
//! `MemoryConfig::default()` reads the process environment. Callers that
//! want `.env` support load it first (the CLI uses dotenvy).
//! ============================================================================

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::memory::{
    EmbeddingProvider, HashingEmbedder, HttpEmbeddingService, LocalVectorStore, MemoryStore,
    QdrantVectorStore, VectorStore, DEFAULT_EMBEDDING_MODEL, EMBEDDING_DIM, MESSAGE_COLLECTION_NAME,
};
use crate::types::{ChunkingOptions, FormatStyle};

/// Default Qdrant gRPC endpoint
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Which vector store holds the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded redb file
    #[default]
    Local,
    /// Remote Qdrant server
    Qdrant,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "redb" => Ok(StoreBackend::Local),
            "qdrant" => Ok(StoreBackend::Qdrant),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Embedding endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL; the offline hashing embedder is used when unset
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    /// Vector length produced by `model`; also the collection dimension
    pub dimension: usize,
}

/// Memory subsystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub backend: StoreBackend,
    /// redb file for the local backend (defaults to ~/.chatmem/memory.redb)
    pub db_path: Option<PathBuf>,
    /// Keep the local store in memory only
    pub temp: bool,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub collection: String,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingOptions,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl MemoryConfig {
    /// Build a config from a variable lookup. Unparseable values fall back
    /// to defaults with a warning.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let defaults = ChunkingOptions::default();

        Self {
            backend: parse_or(get("CHATMEM_BACKEND"), "CHATMEM_BACKEND", StoreBackend::Local),
            db_path: get("CHATMEM_DB_PATH").map(PathBuf::from),
            temp: get("CHATMEM_TEMP")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            qdrant_url: get("QDRANT_URL").unwrap_or_else(|| DEFAULT_QDRANT_URL.to_string()),
            qdrant_api_key: get("QDRANT_API_KEY"),
            collection: get("CHATMEM_COLLECTION")
                .unwrap_or_else(|| MESSAGE_COLLECTION_NAME.to_string()),
            embedding: EmbeddingConfig {
                base_url: get("EMBEDDING_BASE_URL"),
                api_key: get("EMBEDDING_API_KEY").or_else(|| get("OPENAI_API_KEY")),
                model: get("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                dimension: parse_or(get("EMBEDDING_DIM"), "EMBEDDING_DIM", EMBEDDING_DIM),
            },
            chunking: ChunkingOptions {
                window_size: parse_or(get("CHATMEM_WINDOW_SIZE"), "CHATMEM_WINDOW_SIZE", defaults.window_size),
                stride: parse_or(get("CHATMEM_STRIDE"), "CHATMEM_STRIDE", defaults.stride),
                format_style: parse_or::<FormatStyle>(get("CHATMEM_FORMAT"), "CHATMEM_FORMAT", defaults.format_style),
            },
        }
    }

    /// Reject settings that can't produce a working store
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            bail!("Collection name must not be empty");
        }
        if self.chunking.window_size == 0 || self.chunking.stride == 0 {
            bail!(
                "Window size and stride must be positive (got {} and {})",
                self.chunking.window_size,
                self.chunking.stride
            );
        }
        if self.embedding.dimension == 0 {
            bail!("EMBEDDING_DIM must be positive");
        }
        if self.backend == StoreBackend::Qdrant && self.qdrant_url.is_empty() {
            bail!("QDRANT_URL is required for the qdrant backend");
        }
        Ok(())
    }

    /// Embedding provider for this config
    pub fn embedding_provider(&self) -> Arc<dyn EmbeddingProvider> {
        match &self.embedding.base_url {
            Some(base_url) => {
                info!(
                    "Using embedding service at {} ({}, {} dims)",
                    base_url, self.embedding.model, self.embedding.dimension
                );
                Arc::new(
                    HttpEmbeddingService::new(
                        base_url.as_str(),
                        self.embedding.api_key.clone(),
                        self.embedding.model.as_str(),
                    )
                    .with_dimension(self.embedding.dimension),
                )
            }
            None => {
                warn!("EMBEDDING_BASE_URL not set, using offline feature-hashing embedder");
                Arc::new(HashingEmbedder::new(self.embedding.dimension))
            }
        }
    }

    /// Open the configured vector store
    pub fn build_backend(&self, embedder: Arc<dyn EmbeddingProvider>) -> Result<Arc<dyn VectorStore>> {
        let backend: Arc<dyn VectorStore> = match self.backend {
            StoreBackend::Local if self.temp => {
                info!("Using in-memory local store");
                Arc::new(LocalVectorStore::in_memory(embedder).context("Failed to create in-memory store")?)
            }
            StoreBackend::Local => {
                let path = match &self.db_path {
                    Some(path) => path.clone(),
                    None => LocalVectorStore::default_path()?,
                };
                Arc::new(
                    LocalVectorStore::open(&path, embedder)
                        .with_context(|| format!("Failed to open memory store at {}", path.display()))?,
                )
            }
            StoreBackend::Qdrant => Arc::new(
                QdrantVectorStore::connect(&self.qdrant_url, self.qdrant_api_key.clone(), embedder)
                    .with_context(|| format!("Failed to connect to Qdrant at {}", self.qdrant_url))?,
            ),
        };
        Ok(backend)
    }

    /// Construct the embedding provider, backend and memory store
    pub async fn build_store(&self) -> Result<MemoryStore> {
        self.validate()?;

        let embedder = self.embedding_provider();
        let dimension = embedder.dimension();
        let backend = self.build_backend(embedder)?;

        MemoryStore::with_collection(backend, self.collection.as_str(), dimension)
            .await
            .with_context(|| format!("Failed to initialize collection {}", self.collection))
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => match raw.trim().parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring invalid {}={}: {}", key, raw, e);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> MemoryConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MemoryConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.backend, StoreBackend::Local);
        assert_eq!(config.qdrant_url, DEFAULT_QDRANT_URL);
        assert_eq!(config.collection, MESSAGE_COLLECTION_NAME);
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.embedding.dimension, EMBEDDING_DIM);
        assert_eq!(config.chunking, ChunkingOptions::default());
        assert!(config.embedding.base_url.is_none());
        assert!(!config.temp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = config(&[
            ("CHATMEM_BACKEND", "qdrant"),
            ("QDRANT_URL", "http://qdrant:6334"),
            ("CHATMEM_COLLECTION", "chat"),
            ("CHATMEM_WINDOW_SIZE", "5"),
            ("CHATMEM_STRIDE", "2"),
            ("CHATMEM_FORMAT", "md"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);
        assert_eq!(config.backend, StoreBackend::Qdrant);
        assert_eq!(config.qdrant_url, "http://qdrant:6334");
        assert_eq!(config.collection, "chat");
        assert_eq!(config.chunking.window_size, 5);
        assert_eq!(config.chunking.stride, 2);
        assert_eq!(config.chunking.format_style, FormatStyle::Markdown);
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_embedding_key_precedence() {
        let config = config(&[("EMBEDDING_API_KEY", "primary"), ("OPENAI_API_KEY", "fallback")]);
        assert_eq!(config.embedding.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[
            ("CHATMEM_BACKEND", "postgres"),
            ("CHATMEM_WINDOW_SIZE", "three"),
            ("CHATMEM_FORMAT", "html"),
        ]);
        assert_eq!(config.backend, StoreBackend::Local);
        assert_eq!(config.chunking, ChunkingOptions::default());
    }

    #[test]
    fn test_embedding_dimension_reaches_provider() {
        let http = config(&[
            ("EMBEDDING_BASE_URL", "http://localhost:8080/v1"),
            ("EMBEDDING_MODEL", "text-embedding-3-small"),
            ("EMBEDDING_DIM", "1536"),
        ]);
        assert_eq!(http.embedding.dimension, 1536);
        let provider = http.embedding_provider();
        assert_eq!(provider.dimension(), 1536);
        assert_eq!(provider.model(), "text-embedding-3-small");

        let offline = config(&[("EMBEDDING_DIM", "64")]);
        assert_eq!(offline.embedding_provider().dimension(), 64);

        assert!(config(&[("EMBEDDING_DIM", "0")]).validate().is_err());
    }

    #[tokio::test]
    async fn test_build_store_uses_configured_dimension() {
        let config = config(&[("CHATMEM_TEMP", "1"), ("EMBEDDING_DIM", "64")]);
        let memory = config.build_store().await.unwrap();
        assert_eq!(memory.schema().dimension, 64);
    }

    #[test]
    fn test_validate_rejects_zero_stride() {
        let config = config(&[("CHATMEM_STRIDE", "0")]);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_build_temp_store() {
        let config = config(&[("CHATMEM_TEMP", "true")]);
        assert!(config.temp);

        let memory = config.build_store().await.unwrap();
        assert_eq!(memory.collection(), MESSAGE_COLLECTION_NAME);
        assert!(memory.collection_exists().await);
    }

    #[tokio::test]
    async fn test_build_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.redb");
        let config = config(&[("CHATMEM_DB_PATH", path.to_str().unwrap())]);

        let memory = config.build_store().await.unwrap();
        assert_eq!(memory.stats().await.unwrap().points_count, 0);
        assert!(path.exists());
    }
}
