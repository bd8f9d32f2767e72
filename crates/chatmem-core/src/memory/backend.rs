//! ============================================================================
//! Vector Store Backend - Collaborator contract for vector persistence
//! ============================================================================
//! The memory store only talks to this trait. Implementations own the
//! embedding step: `add` and `query` take text and embed it themselves.
//! ============================================================================

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{CollectionSchema, MemoryError, MemoryRecord, Payload, PayloadFilter, QueryHit};

/// Persists vectors with JSON payloads and answers nearest-neighbor queries
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn create_collection(&self, name: &str, schema: CollectionSchema) -> Result<(), MemoryError>;

    async fn collection_exists(&self, name: &str) -> Result<bool, MemoryError>;

    /// Schema of an existing collection, `None` if absent
    async fn collection_schema(&self, name: &str) -> Result<Option<CollectionSchema>, MemoryError>;

    /// Embed `documents` and store them under `ids`.
    ///
    /// Each stored payload is the matching `metadata` entry plus a
    /// `document` field holding the text. The three slices have equal length.
    async fn add(
        &self,
        collection: &str,
        ids: &[Uuid],
        documents: &[String],
        metadata: &[Payload],
    ) -> Result<(), MemoryError>;

    /// Embed `text` and return up to `limit` hits, most similar first
    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<QueryHit>, MemoryError>;

    /// Page through records in store-defined order, skipping `offset`
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> Result<(), MemoryError>;

    async fn delete_collection(&self, name: &str) -> Result<(), MemoryError>;

    /// Number of records in a collection
    async fn count(&self, collection: &str) -> Result<u64, MemoryError>;
}

/// Reject batches whose parallel slices disagree in length
pub(crate) fn check_batch(ids: &[Uuid], documents: &[String], metadata: &[Payload]) -> Result<(), MemoryError> {
    if ids.len() != documents.len() || ids.len() != metadata.len() {
        return Err(MemoryError::Store(format!(
            "Batch length mismatch: {} ids, {} documents, {} metadata",
            ids.len(),
            documents.len(),
            metadata.len()
        )));
    }
    Ok(())
}

/// Build the stored payload for one document
pub(crate) fn document_payload(document: &str, metadata: &Payload) -> Payload {
    let mut payload = metadata.clone();
    payload.insert(
        crate::types::DOCUMENT_KEY.to_string(),
        serde_json::Value::String(document.to_string()),
    );
    payload
}
