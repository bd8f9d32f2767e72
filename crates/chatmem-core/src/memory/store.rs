//! ============================================================================
//! Memory Store - Chunked chat history on top of a vector store
//! ============================================================================
//! Owns the lifecycle of the single chat-memory collection and exposes
//! session-scoped insert, query and delete operations.
//!
//! Every operation comes in two forms. `try_*` returns `MemoryError` so
//! callers and tests can see what went wrong. The plain form never fails:
//! errors are logged with the operation and session, and mapped to
//! `None`, an empty `Vec` or `false`.
//! ============================================================================

use chrono::Local;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backend::VectorStore;
use super::embeddings::EMBEDDING_DIM;
use crate::chunker::ChatChunker;
use crate::types::{
    Chunk, ChunkMetadata, ChunkingOptions, CollectionSchema, CollectionStats, Distance, InsertReceipt,
    MemoryError, MemoryRecord, Message, Payload, PayloadFilter, QueryHit, SessionEntry,
    SESSION_ID_KEY,
};

/// Default collection name for chat memory
pub const MESSAGE_COLLECTION_NAME: &str = "memory_collection";

/// Most records removed by one `delete_session_messages` call
pub const SESSION_DELETE_CAP: usize = 1000;

const INSERTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Chat memory over one vector store collection
pub struct MemoryStore {
    backend: Arc<dyn VectorStore>,
    collection: String,
    schema: CollectionSchema,
}

impl MemoryStore {
    /// Open the default collection, creating it if absent
    pub async fn new(backend: Arc<dyn VectorStore>) -> Result<Self, MemoryError> {
        Self::with_collection(backend, MESSAGE_COLLECTION_NAME, EMBEDDING_DIM).await
    }

    /// Open a named collection with the given vector dimension.
    ///
    /// Calling this again for an existing collection is a no-op. A collection
    /// created with a different schema is rejected.
    pub async fn with_collection(
        backend: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, MemoryError> {
        let store = Self {
            backend,
            collection: collection.into(),
            schema: CollectionSchema {
                dimension,
                distance: Distance::Cosine,
            },
        };

        store.ensure_collection().await?;
        Ok(store)
    }

    /// Create the collection if it doesn't exist
    async fn ensure_collection(&self) -> Result<(), MemoryError> {
        match self.backend.collection_schema(&self.collection).await? {
            Some(found) if found == self.schema => {
                debug!("Collection {} already exists", self.collection);
                Ok(())
            }
            Some(found) => Err(MemoryError::SchemaMismatch {
                name: self.collection.clone(),
                found,
            }),
            None => match self.backend.create_collection(&self.collection, self.schema).await {
                Ok(()) => {
                    info!(
                        "Created collection: {} ({} backend)",
                        self.collection,
                        self.backend.name()
                    );
                    Ok(())
                }
                // A concurrent caller may have created it after our check
                Err(e) => match self.backend.collection_schema(&self.collection).await? {
                    Some(found) if found == self.schema => {
                        debug!("Collection {} created concurrently", self.collection);
                        Ok(())
                    }
                    Some(found) => Err(MemoryError::SchemaMismatch {
                        name: self.collection.clone(),
                        found,
                    }),
                    None => Err(e),
                },
            },
        }
    }

    async fn require_collection(&self) -> Result<(), MemoryError> {
        if self.backend.collection_exists(&self.collection).await? {
            Ok(())
        } else {
            Err(MemoryError::CollectionMissing(self.collection.clone()))
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> CollectionSchema {
        self.schema
    }

    pub fn backend(&self) -> &Arc<dyn VectorStore> {
        &self.backend
    }

    // ========================================================================
    // Collection status
    // ========================================================================

    pub async fn try_collection_exists(&self) -> Result<bool, MemoryError> {
        self.backend.collection_exists(&self.collection).await
    }

    /// Whether the collection currently exists
    pub async fn collection_exists(&self) -> bool {
        match self.try_collection_exists().await {
            Ok(true) => true,
            Ok(false) => {
                error!("Collection {} does not exist", self.collection);
                false
            }
            Err(e) => {
                error!("Error checking collection {}: {}", self.collection, e);
                false
            }
        }
    }

    pub async fn try_stats(&self) -> Result<CollectionStats, MemoryError> {
        self.require_collection().await?;
        let points_count = self.backend.count(&self.collection).await?;
        Ok(CollectionStats {
            collection: self.collection.clone(),
            points_count,
        })
    }

    /// Record count for the collection, `None` if absent
    pub async fn stats(&self) -> Option<CollectionStats> {
        settle("stats", None, self.try_stats().await)
    }

    // ========================================================================
    // Insert
    // ========================================================================

    pub async fn try_insert_history(
        &self,
        history: &[Message],
        session_id: &str,
        options: &ChunkingOptions,
    ) -> Result<InsertReceipt, MemoryError> {
        if history.is_empty() {
            return Err(MemoryError::EmptyHistory);
        }

        let chunker = ChatChunker::new(options.window_size, options.stride)?;
        let chunks = chunker.chunk_history(history, session_id, options.format_style, true);
        if chunks.is_empty() {
            return Err(MemoryError::NoChunks);
        }

        let inserted_at = Local::now().format(INSERTED_AT_FORMAT).to_string();
        let batch = prepare_batch(chunks, session_id, &inserted_at)?;

        // Recreates the collection after delete_all_messages
        self.ensure_collection().await?;

        self.backend
            .add(&self.collection, &batch.ids, &batch.documents, &batch.metadata)
            .await?;

        info!(
            "Inserted {} chunks from {} messages for session {}",
            batch.documents.len(),
            history.len(),
            session_id
        );
        debug!("Chunks inserted with metadata: {:?}", batch.metadata);

        Ok(InsertReceipt {
            session_id: session_id.to_string(),
            chunk_count: batch.ids.len(),
            ids: batch.ids,
            message_count: history.len(),
        })
    }

    /// Chunk a history and store every non-empty chunk in one batch.
    ///
    /// Returns `None` for an empty history, when nothing survives chunking,
    /// or on any store or embedding failure.
    pub async fn insert_history(
        &self,
        history: &[Message],
        session_id: &str,
        options: &ChunkingOptions,
    ) -> Option<InsertReceipt> {
        match self.try_insert_history(history, session_id, options).await {
            Ok(receipt) => Some(receipt),
            Err(MemoryError::EmptyHistory) => {
                warn!("Empty history provided, nothing to insert");
                None
            }
            Err(MemoryError::NoChunks) => {
                warn!("No valid chunks created from history for session {}", session_id);
                None
            }
            Err(e) => {
                error!("Error inserting history for session {}: {}", session_id, e);
                None
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn try_query(&self, text: &str, limit: usize) -> Result<Vec<QueryHit>, MemoryError> {
        self.require_collection().await?;
        self.backend.query(&self.collection, text, limit).await
    }

    /// Up to `limit` records most similar to `text`, best first.
    ///
    /// No score cutoff is applied; filter on `QueryHit::score` if needed.
    pub async fn query(&self, text: &str, limit: usize) -> Vec<QueryHit> {
        settle("query", None, self.try_query(text, limit).await).unwrap_or_default()
    }

    pub async fn try_get(&self, limit: usize, offset: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.require_collection().await?;
        self.backend
            .scroll(&self.collection, None, limit, offset)
            .await
    }

    /// Unfiltered page of records in store order, `None` if the collection is absent
    pub async fn get(&self, limit: usize, offset: usize) -> Option<Vec<MemoryRecord>> {
        settle("get", None, self.try_get(limit, offset).await)
    }

    pub async fn try_query_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<SessionEntry>, MemoryError> {
        self.require_collection().await?;

        let records = self
            .backend
            .scroll(&self.collection, Some(&PayloadFilter::session(session_id)), limit, 0)
            .await?;

        Ok(records
            .into_iter()
            .map(|record| SessionEntry {
                text: record.document().to_string(),
                metadata: record.payload,
            })
            .collect())
    }

    /// Records whose `session_id` matches exactly (not a similarity search)
    pub async fn query_by_session(&self, session_id: &str, limit: usize) -> Vec<SessionEntry> {
        settle(
            "query_by_session",
            Some(session_id),
            self.try_query_by_session(session_id, limit).await,
        )
        .unwrap_or_default()
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Delete up to `SESSION_DELETE_CAP` records of a session, returning how
    /// many were removed. Call again until it returns 0 to purge the session.
    pub async fn try_delete_session_messages(&self, session_id: &str) -> Result<usize, MemoryError> {
        self.require_collection().await?;

        let points = self
            .backend
            .scroll(
                &self.collection,
                Some(&PayloadFilter::session(session_id)),
                SESSION_DELETE_CAP,
                0,
            )
            .await?;

        if points.is_empty() {
            debug!("No messages found for session {}", session_id);
            return Ok(0);
        }

        let point_ids: Vec<Uuid> = points.into_iter().map(|p| p.id).collect();
        self.backend.delete(&self.collection, &point_ids).await?;

        info!("Deleted {} messages for session {}", point_ids.len(), session_id);
        Ok(point_ids.len())
    }

    /// Delete one capped batch of a session's records
    pub async fn delete_session_messages(&self, session_id: &str) -> bool {
        settle(
            "delete_session_messages",
            Some(session_id),
            self.try_delete_session_messages(session_id).await,
        )
        .is_some()
    }

    pub async fn try_delete_all_messages(&self) -> Result<(), MemoryError> {
        self.require_collection().await?;
        self.backend.delete_collection(&self.collection).await?;
        info!("Deleted entire collection: {}", self.collection);
        Ok(())
    }

    /// Drop the collection. The next insert recreates it.
    pub async fn delete_all_messages(&self) -> bool {
        settle("delete_all_messages", None, self.try_delete_all_messages().await).is_some()
    }
}

/// Parallel ids, texts and payloads for one `add` call
struct Batch {
    ids: Vec<Uuid>,
    documents: Vec<String>,
    metadata: Vec<Payload>,
}

/// Attach ids and insertion metadata to chunks, skipping blank ones.
///
/// `chunk_index` is the position before filtering.
fn prepare_batch(chunks: Vec<Chunk>, session_id: &str, inserted_at: &str) -> Result<Batch, MemoryError> {
    let total_chunks = chunks.len();
    let mut batch = Batch {
        ids: Vec::with_capacity(total_chunks),
        documents: Vec::with_capacity(total_chunks),
        metadata: Vec::with_capacity(total_chunks),
    };

    for (i, chunk) in chunks.into_iter().enumerate() {
        if chunk.text.trim().is_empty() {
            continue;
        }

        let mut base = Payload::new();
        base.insert(SESSION_ID_KEY.to_string(), session_id.into());
        base.insert("inserted_at".to_string(), inserted_at.into());
        base.insert("chunk_index".to_string(), i.into());
        base.insert("total_chunks".to_string(), total_chunks.into());

        batch.metadata.push(merge_metadata(base, chunk.metadata.as_ref())?);
        batch.documents.push(chunk.text);
        batch.ids.push(Uuid::new_v4());
    }

    if batch.documents.is_empty() {
        return Err(MemoryError::NoChunks);
    }
    Ok(batch)
}

/// Overlay chunk metadata on insertion metadata; chunk fields win
fn merge_metadata(mut base: Payload, chunk: Option<&ChunkMetadata>) -> Result<Payload, MemoryError> {
    if let Some(chunk) = chunk {
        if let serde_json::Value::Object(fields) = serde_json::to_value(chunk)? {
            for (key, value) in fields {
                base.insert(key, value);
            }
        }
    }
    Ok(base)
}

/// Map a result to the fail-soft boundary, logging anything that isn't success
fn settle<T>(operation: &str, session_id: Option<&str>, result: Result<T, MemoryError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(MemoryError::CollectionMissing(name)) => {
            error!("Collection {} does not exist ({})", name, operation);
            None
        }
        Err(e) => {
            match session_id {
                Some(session_id) => error!("Error in {} for session {}: {}", operation, session_id, e),
                None => error!("Error in {}: {}", operation, e),
            }
            None
        }
    }
}
