//! ============================================================================
//! Qdrant Vector Store - Remote collections over gRPC
//! ============================================================================
//! Stores chunk vectors and payloads in a Qdrant server. Writes wait for
//! the server to apply them, so reads observe prior writes.
//! ============================================================================

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, points_selector::PointsSelectorOneOf, value::Kind,
    vectors_config::Config as VectorsConfigKind, Condition, CountPointsBuilder,
    CreateCollectionBuilder, DeletePointsBuilder, Distance as QdrantDistance, Filter, ListValue,
    PointId, PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, Struct,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{check_batch, document_payload, VectorStore};
use super::embeddings::EmbeddingProvider;
use crate::types::{
    CollectionSchema, Distance, MemoryError, MemoryRecord, Payload, PayloadFilter, QueryHit,
};

/// Points fetched per scroll request
const SCROLL_PAGE: u32 = 256;

/// Vector store backed by a Qdrant server
pub struct QdrantVectorStore {
    client: Qdrant,
    url: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl QdrantVectorStore {
    /// Connect to Qdrant (gRPC endpoint, e.g. `http://localhost:6334`)
    pub fn connect(
        url: &str,
        api_key: Option<String>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, MemoryError> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(|e| MemoryError::Store(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            embedder,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if the server is reachable
    pub async fn health_check(&self) -> bool {
        match self.client.health_check().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn create_collection(&self, name: &str, schema: CollectionSchema) -> Result<(), MemoryError> {
        info!("Creating collection: {}", name);

        let distance = match schema.distance {
            Distance::Cosine => QdrantDistance::Cosine,
        };

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(schema.dimension as u64, distance)),
            )
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to create collection: {}", e)))?;

        info!("Collection {} created successfully", name);
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, MemoryError> {
        self.client
            .collection_exists(name)
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to check collection existence: {}", e)))
    }

    async fn collection_schema(&self, name: &str) -> Result<Option<CollectionSchema>, MemoryError> {
        if !self.collection_exists(name).await? {
            return Ok(None);
        }

        let info = self
            .client
            .collection_info(name)
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to get collection info: {}", e)))?;

        let params = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);

        match params {
            Some(VectorsConfigKind::Params(params)) => {
                if params.distance != QdrantDistance::Cosine as i32 {
                    return Err(MemoryError::Store(format!(
                        "Collection {} uses unsupported distance {}",
                        name, params.distance
                    )));
                }
                Ok(Some(CollectionSchema {
                    dimension: params.size as usize,
                    distance: Distance::Cosine,
                }))
            }
            _ => Err(MemoryError::Store(format!(
                "Collection {} has no single unnamed vector config",
                name
            ))),
        }
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

        let points: Vec<PointStruct> = ids
            .iter()
            .zip(documents)
            .zip(metadata.iter().zip(vectors))
            .map(|((id, document), (meta, vector))| {
                PointStruct::new(id.to_string(), vector, to_qdrant_payload(&document_payload(document, meta)))
            })
            .collect();

        debug!("Upserting {} points into {}", points.len(), collection);

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to upsert points: {}", e)))?;

        Ok(())
    }

    async fn query(&self, collection: &str, text: &str, limit: usize) -> Result<Vec<QueryHit>, MemoryError> {
        let query_vector = self.embedder.embed(text).await?;

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, query_vector, limit as u64).with_payload(true),
            )
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to search points: {}", e)))?;

        let hits: Vec<QueryHit> = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let id = extract_uuid_from_point_id(point.id?)?;
                Some(QueryHit {
                    id,
                    score: point.score,
                    metadata: from_qdrant_payload(point.payload),
                })
            })
            .collect();

        debug!("Found {} matching points", hits.len());
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let mut results = Vec::new();
        let mut skipped = 0;
        let mut page_offset: Option<PointId> = None;

        while results.len() < limit {
            let mut request = ScrollPointsBuilder::new(collection)
                .limit(SCROLL_PAGE)
                .with_payload(true);
            if let Some(filter) = filter {
                request = request.filter(Filter::must([Condition::matches(
                    filter.key.clone(),
                    filter.value.clone(),
                )]));
            }
            if let Some(next) = page_offset.take() {
                request = request.offset(next);
            }

            let scroll_result = self
                .client
                .scroll(request)
                .await
                .map_err(|e| MemoryError::Store(format!("Failed to scroll points: {}", e)))?;

            for point in scroll_result.result {
                if results.len() >= limit {
                    break;
                }
                let Some(id) = point.id.and_then(extract_uuid_from_point_id) else {
                    continue;
                };
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                results.push(MemoryRecord {
                    id,
                    payload: from_qdrant_payload(point.payload),
                });
            }

            match scroll_result.next_page_offset {
                Some(next) => page_offset = Some(next),
                None => break,
            }
        }

        Ok(results)
    }

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> Result<(), MemoryError> {
        if ids.is_empty() {
            return Ok(());
        }

        let selector = PointsSelectorOneOf::Points(PointsIdsList {
            ids: ids.iter().map(|id| PointId::from(id.to_string())).collect(),
        });

        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(selector).wait(true))
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to delete points: {}", e)))?;

        debug!("Deleted {} points from {}", ids.len(), collection);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), MemoryError> {
        self.client
            .delete_collection(name)
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to delete collection: {}", e)))?;

        info!("Deleted collection: {}", name);
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64, MemoryError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .map_err(|e| MemoryError::Store(format!("Failed to count points: {}", e)))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

// Helper to extract UUID from PointId
fn extract_uuid_from_point_id(point_id: PointId) -> Option<Uuid> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(uuid_str) => Uuid::parse_str(&uuid_str).ok(),
        PointIdOptions::Num(_) => None, // We use UUID strings, not numeric IDs
    }
}

fn to_qdrant_payload(payload: &Payload) -> HashMap<String, Value> {
    payload
        .iter()
        .map(|(k, v)| (k.clone(), json_to_value(v)))
        .collect()
}

fn from_qdrant_payload(payload: HashMap<String, Value>) -> Payload {
    payload
        .into_iter()
        .map(|(k, v)| (k, value_to_json(v)))
        .collect()
}

fn json_to_value(json: &serde_json::Value) -> Value {
    let kind = match json {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect(),
        }),
    };
    Value { kind: Some(kind) }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}
