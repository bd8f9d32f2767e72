//! ============================================================================
//! CHATMEM-CORE: Conversational memory
//! ============================================================================
//! This crate persists chat history for semantic recall:
//! - Sliding-window chunking of message histories
//! - Embedding via an OpenAI-compatible service or offline feature hashing
//! - Vector storage in an embedded redb file or a Qdrant server
//! - Session-scoped insert, query and delete through `MemoryStore`
//! ============================================================================

pub mod chunker;
pub mod config;
pub mod memory;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use chunker::ChatChunker;
pub use config::{MemoryConfig, StoreBackend};
pub use memory::MemoryStore;
