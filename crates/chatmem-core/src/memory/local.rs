//! ============================================================================
//! Local Vector Store - Embedded redb-backed collections
//! ============================================================================
//! Persistent mode holds the database file under an exclusive lock: a second
//! owner fails at open with `MemoryError::StoreLocked`. In-memory mode backs
//! tests and throwaway sessions. Search is a brute-force cosine scan.
//!
//! Layout:
//!   collections          name -> bincode(CollectionSchema)
//!   points:<collection>  uuid -> bincode(StoredPoint)
//! ============================================================================

use async_trait::async_trait;
use redb::backends::InMemoryBackend;
use redb::{Database, DatabaseError, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{check_batch, document_payload, VectorStore};
use super::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::types::{CollectionSchema, MemoryError, MemoryRecord, Payload, PayloadFilter, QueryHit};

const COLLECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("collections");

/// A vector and its payload as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    /// JSON text; bincode cannot encode arbitrary JSON values
    payload_json: String,
}

/// Embedded vector store
pub struct LocalVectorStore {
    db: Arc<Database>,
    path: Option<PathBuf>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LocalVectorStore {
    /// Open (or create) a store file, taking the exclusive lock
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MemoryError::Store(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        info!("Opening local vector store at: {}", path.display());

        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => MemoryError::StoreLocked(path.display().to_string()),
            other => MemoryError::Store(format!("Failed to open database: {}", other)),
        })?;

        Self::init(db, Some(path.to_path_buf()), embedder)
    }

    /// Create a store that lives only as long as this value
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, MemoryError> {
        debug!("Creating in-memory vector store");

        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(|e| MemoryError::Store(format!("Failed to create in-memory database: {}", e)))?;

        Self::init(db, None, embedder)
    }

    /// Default store path: ~/.chatmem/memory.redb
    pub fn default_path() -> Result<PathBuf, MemoryError> {
        let home = dirs::home_dir()
            .ok_or_else(|| MemoryError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".chatmem").join("memory.redb"))
    }

    fn init(db: Database, path: Option<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, MemoryError> {
        let write_txn = db
            .begin_write()
            .map_err(|e| MemoryError::Store(format!("Failed to begin write: {}", e)))?;
        {
            let _ = write_txn
                .open_table(COLLECTIONS)
                .map_err(|e| MemoryError::Store(format!("Failed to create collections table: {}", e)))?;
        }
        write_txn
            .commit()
            .map_err(|e| MemoryError::Store(format!("Failed to commit init: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            path,
            embedder,
        })
    }

    /// Backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a redb operation on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T, MemoryError>
    where
        F: FnOnce(&Database) -> Result<T, MemoryError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| MemoryError::Store(format!("Store task failed: {}", e)))?
    }
}

fn points_table_name(collection: &str) -> String {
    format!("points:{}", collection)
}

fn read_schema(db: &Database, name: &str) -> Result<Option<CollectionSchema>, MemoryError> {
    let read_txn = db
        .begin_read()
        .map_err(|e| MemoryError::Store(format!("Failed to begin read: {}", e)))?;
    let table = read_txn
        .open_table(COLLECTIONS)
        .map_err(|e| MemoryError::Store(format!("Failed to open collections table: {}", e)))?;

    match table
        .get(name)
        .map_err(|e| MemoryError::Store(format!("Failed to get collection: {}", e)))?
    {
        Some(value) => {
            let schema: CollectionSchema = bincode::deserialize(value.value())
                .map_err(|e| MemoryError::Serialization(format!("Failed to deserialize schema: {}", e)))?;
            Ok(Some(schema))
        }
        None => Ok(None),
    }
}

fn require_schema(db: &Database, name: &str) -> Result<CollectionSchema, MemoryError> {
    read_schema(db, name)?.ok_or_else(|| MemoryError::CollectionMissing(name.to_string()))
}

fn decode_point(key: &str, bytes: &[u8]) -> Result<Option<(Uuid, StoredPoint)>, MemoryError> {
    let id = match Uuid::parse_str(key) {
        Ok(id) => id,
        Err(_) => {
            warn!("Skipping point with non-UUID key: {}", key);
            return Ok(None);
        }
    };
    let point: StoredPoint = bincode::deserialize(bytes)
        .map_err(|e| MemoryError::Serialization(format!("Failed to deserialize point: {}", e)))?;
    Ok(Some((id, point)))
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create_collection(&self, name: &str, schema: CollectionSchema) -> Result<(), MemoryError> {
        let name = name.to_string();
        self.blocking(move |db| {
            if let Some(found) = read_schema(db, &name)? {
                if found == schema {
                    debug!("Collection {} already exists", name);
                    return Ok(());
                }
                return Err(MemoryError::SchemaMismatch { name, found });
            }

            let value = bincode::serialize(&schema)
                .map_err(|e| MemoryError::Serialization(format!("Failed to serialize schema: {}", e)))?;
            let table_name = points_table_name(&name);
            let points_def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);

            let write_txn = db
                .begin_write()
                .map_err(|e| MemoryError::Store(format!("Failed to begin write: {}", e)))?;
            {
                let mut table = write_txn
                    .open_table(COLLECTIONS)
                    .map_err(|e| MemoryError::Store(format!("Failed to open collections table: {}", e)))?;
                table
                    .insert(name.as_str(), value.as_slice())
                    .map_err(|e| MemoryError::Store(format!("Failed to insert collection: {}", e)))?;
                let _ = write_txn
                    .open_table(points_def)
                    .map_err(|e| MemoryError::Store(format!("Failed to create points table: {}", e)))?;
            }
            write_txn
                .commit()
                .map_err(|e| MemoryError::Store(format!("Failed to commit: {}", e)))?;

            info!("Collection {} created", name);
            Ok(())
        })
        .await
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, MemoryError> {
        Ok(self.collection_schema(name).await?.is_some())
    }

    async fn collection_schema(&self, name: &str) -> Result<Option<CollectionSchema>, MemoryError> {
        let name = name.to_string();
        self.blocking(move |db| read_schema(db, &name)).await
    }

    async fn add(
        &self,
        collection: &str,
        ids: &[Uuid],
        documents: &[String],
        metadata: &[Payload],
    ) -> Result<(), MemoryError> {
        check_batch(ids, documents, metadata)?;
        if ids.is_empty() {
            return Ok(());
        }

        let vectors = self.embedder.embed_batch(documents).await?;
        if vectors.len() != documents.len() {
            return Err(MemoryError::Embedding(format!(
                "Expected {} embeddings, got {}",
                documents.len(),
                vectors.len()
            )));
        }

        let mut rows = Vec::with_capacity(ids.len());
        for ((id, document), (meta, vector)) in ids.iter().zip(documents).zip(metadata.iter().zip(vectors)) {
            let payload_json = serde_json::to_string(&document_payload(document, meta))?;
            rows.push((id.to_string(), StoredPoint { vector, payload_json }));
        }

        let collection = collection.to_string();
        self.blocking(move |db| {
            let schema = require_schema(db, &collection)?;
            for (_, point) in &rows {
                if point.vector.len() != schema.dimension {
                    return Err(MemoryError::DimensionMismatch {
                        expected: schema.dimension,
                        actual: point.vector.len(),
                    });
                }
            }

            let table_name = points_table_name(&collection);
            let points_def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);

            let write_txn = db
                .begin_write()
                .map_err(|e| MemoryError::Store(format!("Failed to begin write: {}", e)))?;
            {
                let mut table = write_txn
                    .open_table(points_def)
                    .map_err(|e| MemoryError::Store(format!("Failed to open points table: {}", e)))?;
                for (key, point) in &rows {
                    let value = bincode::serialize(point)
                        .map_err(|e| MemoryError::Serialization(format!("Failed to serialize point: {}", e)))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(|e| MemoryError::Store(format!("Failed to insert point: {}", e)))?;
                }
            }
            write_txn
                .commit()
                .map_err(|e| MemoryError::Store(format!("Failed to commit: {}", e)))?;

            debug!("Stored {} points in {}", rows.len(), collection);
            Ok(())
        })
        .await
    }

    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<QueryHit>, MemoryError> {
        let query_vector = self.embedder.embed(text).await?;

        let collection = collection.to_string();
        self.blocking(move |db| {
            let schema = require_schema(db, &collection)?;
            if query_vector.len() != schema.dimension {
                return Err(MemoryError::DimensionMismatch {
                    expected: schema.dimension,
                    actual: query_vector.len(),
                });
            }

            let table_name = points_table_name(&collection);
            let points_def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);

            let read_txn = db
                .begin_read()
                .map_err(|e| MemoryError::Store(format!("Failed to begin read: {}", e)))?;
            let table = read_txn
                .open_table(points_def)
                .map_err(|e| MemoryError::Store(format!("Failed to open points table: {}", e)))?;

            let mut scored: Vec<(Uuid, f32, String)> = Vec::new();
            let iter = table
                .iter()
                .map_err(|e| MemoryError::Store(format!("Failed to iterate points: {}", e)))?;
            for entry in iter {
                let (key, value) = entry.map_err(|e| MemoryError::Store(format!("Failed to read entry: {}", e)))?;
                if let Some((id, point)) = decode_point(key.value(), value.value())? {
                    let score = cosine_similarity(&query_vector, &point.vector);
                    scored.push((id, score, point.payload_json));
                }
            }

            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(limit);

            scored
                .into_iter()
                .map(|(id, score, payload_json)| {
                    Ok(QueryHit {
                        id,
                        score,
                        metadata: serde_json::from_str(&payload_json)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let collection = collection.to_string();
        let filter = filter.cloned();
        self.blocking(move |db| {
            require_schema(db, &collection)?;

            let table_name = points_table_name(&collection);
            let points_def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);

            let read_txn = db
                .begin_read()
                .map_err(|e| MemoryError::Store(format!("Failed to begin read: {}", e)))?;
            let table = read_txn
                .open_table(points_def)
                .map_err(|e| MemoryError::Store(format!("Failed to open points table: {}", e)))?;

            let mut results = Vec::new();
            let mut skipped = 0;
            let iter = table
                .iter()
                .map_err(|e| MemoryError::Store(format!("Failed to iterate points: {}", e)))?;
            for entry in iter {
                if results.len() >= limit {
                    break;
                }
                let (key, value) = entry.map_err(|e| MemoryError::Store(format!("Failed to read entry: {}", e)))?;
                let Some((id, point)) = decode_point(key.value(), value.value())? else {
                    continue;
                };
                let payload: Payload = serde_json::from_str(&point.payload_json)?;

                if let Some(filter) = &filter {
                    if !filter.accepts(&payload) {
                        continue;
                    }
                }
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                results.push(MemoryRecord { id, payload });
            }
            Ok(results)
        })
        .await
    }

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> Result<(), MemoryError> {
        let collection = collection.to_string();
        let keys: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        self.blocking(move |db| {
            require_schema(db, &collection)?;

            let table_name = points_table_name(&collection);
            let points_def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);

            let write_txn = db
                .begin_write()
                .map_err(|e| MemoryError::Store(format!("Failed to begin write: {}", e)))?;
            let mut removed = 0usize;
            {
                let mut table = write_txn
                    .open_table(points_def)
                    .map_err(|e| MemoryError::Store(format!("Failed to open points table: {}", e)))?;
                for key in &keys {
                    if table
                        .remove(key.as_str())
                        .map_err(|e| MemoryError::Store(format!("Failed to remove point: {}", e)))?
                        .is_some()
                    {
                        removed += 1;
                    }
                }
            }
            write_txn
                .commit()
                .map_err(|e| MemoryError::Store(format!("Failed to commit delete: {}", e)))?;

            debug!("Deleted {} of {} points from {}", removed, keys.len(), collection);
            Ok(())
        })
        .await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), MemoryError> {
        let name = name.to_string();
        self.blocking(move |db| {
            require_schema(db, &name)?;

            let table_name = points_table_name(&name);
            let points_def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);

            let write_txn = db
                .begin_write()
                .map_err(|e| MemoryError::Store(format!("Failed to begin write: {}", e)))?;
            {
                let mut table = write_txn
                    .open_table(COLLECTIONS)
                    .map_err(|e| MemoryError::Store(format!("Failed to open collections table: {}", e)))?;
                table
                    .remove(name.as_str())
                    .map_err(|e| MemoryError::Store(format!("Failed to remove collection: {}", e)))?;
            }
            write_txn
                .delete_table(points_def)
                .map_err(|e| MemoryError::Store(format!("Failed to drop points table: {}", e)))?;
            write_txn
                .commit()
                .map_err(|e| MemoryError::Store(format!("Failed to commit: {}", e)))?;

            info!("Collection {} dropped", name);
            Ok(())
        })
        .await
    }

    async fn count(&self, collection: &str) -> Result<u64, MemoryError> {
        let collection = collection.to_string();
        self.blocking(move |db| {
            require_schema(db, &collection)?;

            let table_name = points_table_name(&collection);
            let points_def: TableDefinition<&str, &[u8]> = TableDefinition::new(&table_name);

            let read_txn = db
                .begin_read()
                .map_err(|e| MemoryError::Store(format!("Failed to begin read: {}", e)))?;
            let table = read_txn
                .open_table(points_def)
                .map_err(|e| MemoryError::Store(format!("Failed to open points table: {}", e)))?;
            table
                .len()
                .map_err(|e| MemoryError::Store(format!("Failed to count points: {}", e)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::embeddings::HashingEmbedder;
    use crate::types::Distance;

    const COLLECTION: &str = "test_collection";

    fn schema(dimension: usize) -> CollectionSchema {
        CollectionSchema {
            dimension,
            distance: Distance::Cosine,
        }
    }

    fn store() -> LocalVectorStore {
        LocalVectorStore::in_memory(Arc::new(HashingEmbedder::new(128))).unwrap()
    }

    fn meta(session_id: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("session_id".to_string(), session_id.into());
        payload
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let store = store();
        assert!(!store.collection_exists(COLLECTION).await.unwrap());

        store.create_collection(COLLECTION, schema(32)).await.unwrap();
        assert!(store.collection_exists(COLLECTION).await.unwrap());
        assert_eq!(store.collection_schema(COLLECTION).await.unwrap(), Some(schema(32)));

        // Same schema again is a no-op
        store.create_collection(COLLECTION, schema(32)).await.unwrap();

        let err = store.create_collection(COLLECTION, schema(64)).await.unwrap_err();
        assert!(matches!(err, MemoryError::SchemaMismatch { .. }));

        store.delete_collection(COLLECTION).await.unwrap();
        assert!(!store.collection_exists(COLLECTION).await.unwrap());
        assert_eq!(
            store.count(COLLECTION).await.unwrap_err(),
            MemoryError::CollectionMissing(COLLECTION.to_string())
        );
    }

    #[tokio::test]
    async fn test_add_query_scroll_delete() {
        let store = store();
        store.create_collection(COLLECTION, schema(128)).await.unwrap();

        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let docs = vec![
            "dogs are better than cats".to_string(),
            "I have a good amount of money".to_string(),
            "what's the capital of France".to_string(),
        ];
        let metas = vec![meta("a"), meta("b"), meta("a")];
        store.add(COLLECTION, &ids, &docs, &metas).await.unwrap();
        assert_eq!(store.count(COLLECTION).await.unwrap(), 3);

        let hits = store.query(COLLECTION, "good amount of money", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, ids[1]);
        assert_eq!(hits[0].metadata["document"], "I have a good amount of money");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let filter = PayloadFilter::session("a");
        let session_a = store.scroll(COLLECTION, Some(&filter), 10, 0).await.unwrap();
        assert_eq!(session_a.len(), 2);
        assert!(session_a.iter().all(|r| r.session_id() == Some("a")));

        let page = store.scroll(COLLECTION, None, 2, 2).await.unwrap();
        assert_eq!(page.len(), 1);

        store.delete(COLLECTION, &ids[..2]).await.unwrap();
        assert_eq!(store.count(COLLECTION).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = store();
        store.create_collection(COLLECTION, schema(384)).await.unwrap();

        let err = store
            .add(COLLECTION, &[Uuid::new_v4()], &["hello".to_string()], &[meta("a")])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MemoryError::DimensionMismatch {
                expected: 384,
                actual: 128
            }
        );
        assert_eq!(store.count(COLLECTION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_length_mismatch_rejected() {
        let store = store();
        store.create_collection(COLLECTION, schema(128)).await.unwrap();

        let err = store
            .add(COLLECTION, &[Uuid::new_v4()], &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Store(_)));
    }

    #[tokio::test]
    async fn test_file_store_persists_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.redb");
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(32));

        {
            let store = LocalVectorStore::open(&path, Arc::clone(&embedder)).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
            store.create_collection(COLLECTION, schema(32)).await.unwrap();
            store
                .add(COLLECTION, &[Uuid::new_v4()], &["persisted".to_string()], &[meta("a")])
                .await
                .unwrap();

            let second = LocalVectorStore::open(&path, Arc::clone(&embedder));
            assert!(matches!(second, Err(MemoryError::StoreLocked(_))));
        }

        let reopened = LocalVectorStore::open(&path, embedder).unwrap();
        assert_eq!(reopened.count(COLLECTION).await.unwrap(), 1);
    }
}
