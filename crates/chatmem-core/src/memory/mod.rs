//! ============================================================================
//! Memory Module - Persistent conversation memory
//! ============================================================================
//! Stores chunked chat history in a vector store for semantic recall.
//!
//! ## Architecture
//! ```text
//! Chat history → ChatChunker → chunks + metadata
//!                                    ↓
//!                              MemoryStore
//!                                    ↓
//!                    VectorStore (embeds and persists)
//!                        ↙                    ↘
//!          LocalVectorStore (redb)    QdrantVectorStore
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use chatmem_core::memory::{HashingEmbedder, LocalVectorStore, MemoryStore};
//!
//! let backend = LocalVectorStore::in_memory(Arc::new(HashingEmbedder::default()))?;
//! let memory = MemoryStore::new(Arc::new(backend)).await?;
//!
//! memory.insert_history(&history, "session-1", &ChunkingOptions::default()).await;
//! let hits = memory.query("what did we say about cats", 5).await;
//! ```
//! ============================================================================

mod backend;
mod embeddings;
mod local;
mod qdrant;
mod store;

// Re-export public types
pub use backend::VectorStore;
pub use embeddings::{
    cosine_similarity, EmbeddingProvider, HashingEmbedder, HttpEmbeddingService,
    DEFAULT_EMBEDDING_MODEL, EMBEDDING_DIM,
};
pub use local::LocalVectorStore;
pub use qdrant::QdrantVectorStore;
pub use store::{MemoryStore, MESSAGE_COLLECTION_NAME, SESSION_DELETE_CAP};
