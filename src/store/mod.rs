//! Remote vector index
//!
//! This module provides:
//! - The [`VectorIndex`] trait used by sync, prune and semantic search
//! - [`QdrantStore`], the Qdrant implementation (every call retried via [`RetryPolicy`])
//! - [`MemoryIndex`], an exact in-process implementation
//! - Existence-checked sync and stale entry pruning ([`sync`])

mod memory;
mod payload;
pub mod sync;

pub use memory::MemoryIndex;
pub use payload::*;
pub use sync::{prune_stale, sync_embeddings, PruneOptions, PruneStats, SyncStats};

use crate::config::QdrantConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, FieldType, Filter, GetCollectionInfoResponse, GetPointsBuilder, PointId,
    PointStruct, ScrollPointsBuilder, SearchParamsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::qdrant::{Distance, RetrievedPoint};
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Largest HNSW candidate list requested for a query
const MAX_HNSW_EF: u64 = 2000;

/// Parameters for a nearest-neighbour query
#[derive(Debug, Clone)]
pub struct QueryParams {
    pub top_k: usize,
    /// HNSW candidate list size; `min(2 * top_k, 2000)` when unset
    pub ef: Option<u64>,
    pub sermon_uid: Option<String>,
}

impl QueryParams {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ef: None,
            sermon_uid: None,
        }
    }

    pub fn effective_ef(&self) -> u64 {
        self.ef
            .unwrap_or_else(|| (2 * self.top_k as u64).min(MAX_HNSW_EF))
            .max(self.top_k as u64)
    }
}

/// One nearest neighbour; `score` is cosine similarity (higher is closer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub block_uid: String,
    pub paragraph_uid: String,
    pub sermon_uid: String,
    pub score: f32,
}

/// An entry as listed from the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub block_uid: String,
    pub sermon_uid: String,
}

/// Operations the engine needs from a nearest-neighbour index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if missing; fail if it exists with another dimension
    async fn ensure_collection(&self) -> Result<()>;

    /// Which of `block_uids` are already stored
    async fn existing_ids(&self, block_uids: &[String]) -> Result<HashSet<String>>;

    async fn upsert(&self, points: Vec<BlockPoint>) -> Result<()>;

    async fn delete(&self, block_uids: &[String]) -> Result<()>;

    /// Every entry in the index
    async fn list_entries(&self) -> Result<Vec<IndexEntry>>;

    /// Nearest neighbours, best first
    async fn query(&self, vector: &[f32], params: &QueryParams) -> Result<Vec<VectorHit>>;

    /// Number of stored entries (0 when the collection does not exist)
    async fn count(&self) -> Result<u64>;
}

/// Qdrant store handle
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
    hnsw_ef: Option<u64>,
    retry: RetryPolicy,
}

impl QdrantStore {
    /// Connect to Qdrant using config
    pub fn connect(config: &QdrantConfig, dimension: usize) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", config.url);

        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key())
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
            dimension,
            hnsw_ef: config.hnsw_ef,
            retry: RetryPolicy::for_qdrant(config),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn vector_size(&self) -> Result<Option<u64>> {
        let info = self.client.collection_info(&self.collection).await?;
        Ok(extract_vector_size(&info))
    }

    async fn create_collection(&self) -> Result<()> {
        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );
        let vectors_config = VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(vectors_config),
            )
            .await?;
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                "sermon_uid",
                FieldType::Keyword,
            ))
            .await?;
        Ok(())
    }

    async fn get_chunk(&self, ids: Vec<PointId>) -> Result<Vec<RetrievedPoint>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection, ids)
                    .with_payload(false)
                    .with_vectors(false),
            )
            .await?;
        Ok(response.result)
    }

    async fn upsert_chunk(&self, points: Vec<PointStruct>) -> Result<()> {
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn delete_chunk(&self, ids: Vec<PointId>) -> Result<()> {
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(ids).wait(true))
            .await?;
        Ok(())
    }

    async fn scroll_page(
        &self,
        offset: Option<PointId>,
    ) -> Result<(Vec<RetrievedPoint>, Option<PointId>)> {
        let mut builder = ScrollPointsBuilder::new(&self.collection)
            .limit(1000)
            .with_payload(true)
            .with_vectors(false);
        if let Some(o) = offset {
            builder = builder.offset(o);
        }
        let response = self.client.scroll(builder).await?;
        Ok((response.result, response.next_page_offset))
    }

    async fn search_once(&self, vector: &[f32], params: &QueryParams) -> Result<Vec<VectorHit>> {
        let ef = self.hnsw_ef.map(|ef| ef.max(params.top_k as u64));
        let ef = params.ef.or(ef);
        let effective = QueryParams {
            ef,
            ..params.clone()
        }
        .effective_ef();

        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector.to_vec(), params.top_k as u64)
                .with_payload(true)
                .params(SearchParamsBuilder::default().hnsw_ef(effective));
        if let Some(sermon_uid) = &params.sermon_uid {
            builder = builder.filter(Filter::must([Condition::matches(
                "sermon_uid",
                sermon_uid.clone(),
            )]));
        }

        let response = self.client.search_points(builder).await?;
        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = payload_from_qdrant(point.payload)?;
                Some(VectorHit {
                    block_uid: payload.block_uid,
                    paragraph_uid: payload.paragraph_uid,
                    sermon_uid: payload.sermon_uid,
                    score: point.score,
                })
            })
            .collect())
    }

    async fn count_once(&self) -> Result<u64> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .retry
            .run(|| async { Ok(self.client.collection_exists(&self.collection).await?) })
            .await?;

        if !exists {
            return self.retry.run(|| self.create_collection()).await;
        }

        debug!("Collection {} already exists", self.collection);
        match self.retry.run(|| self.vector_size()).await? {
            Some(size) if size as usize != self.dimension => Err(Error::Qdrant(format!(
                "Collection '{}' has vector size {}, but the embedding model produces {}. \
                 Use a new collection name or re-sync with the expected dimension.",
                self.collection, size, self.dimension
            ))),
            _ => Ok(()),
        }
    }

    async fn existing_ids(&self, block_uids: &[String]) -> Result<HashSet<String>> {
        if block_uids.is_empty() {
            return Ok(HashSet::new());
        }

        let by_point: HashMap<String, &String> = block_uids
            .iter()
            .map(|uid| (point_id_for(uid).to_string(), uid))
            .collect();
        let ids: Vec<PointId> = by_point.keys().cloned().map(PointId::from).collect();

        let found = self.retry.run(|| self.get_chunk(ids.clone())).await?;
        Ok(found
            .into_iter()
            .filter_map(|p| point_id_to_string(p.id))
            .filter_map(|id| by_point.get(&id).map(|uid| (*uid).clone()))
            .collect())
    }

    async fn upsert(&self, points: Vec<BlockPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        if let Some(mismatch) = points.iter().find(|p| p.vector.len() != self.dimension) {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch for collection '{}': expected {}, got {} (block {})",
                self.collection,
                self.dimension,
                mismatch.vector.len(),
                mismatch.payload.block_uid
            )));
        }

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );
        let structs: Vec<PointStruct> = points.into_iter().map(|p| p.to_point_struct()).collect();
        self.retry.run(|| self.upsert_chunk(structs.clone())).await
    }

    async fn delete(&self, block_uids: &[String]) -> Result<()> {
        if block_uids.is_empty() {
            return Ok(());
        }

        debug!(
            "Deleting {} points from collection {}",
            block_uids.len(),
            self.collection
        );
        let ids: Vec<PointId> = block_uids
            .iter()
            .map(|uid| PointId::from(point_id_for(uid).to_string()))
            .collect();
        self.retry.run(|| self.delete_chunk(ids.clone())).await
    }

    async fn list_entries(&self) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let (points, next) = self.retry.run(|| self.scroll_page(offset.clone())).await?;
            if points.is_empty() {
                break;
            }
            for point in points {
                if let Some(payload) = payload_from_qdrant(point.payload) {
                    entries.push(IndexEntry {
                        block_uid: payload.block_uid,
                        sermon_uid: payload.sermon_uid,
                    });
                }
            }
            offset = next;
            if offset.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    async fn query(&self, vector: &[f32], params: &QueryParams) -> Result<Vec<VectorHit>> {
        debug!(
            "Searching collection {} with top_k {}",
            self.collection, params.top_k
        );
        self.retry.run(|| self.search_once(vector, params)).await
    }

    async fn count(&self) -> Result<u64> {
        self.retry.run(|| self.count_once()).await
    }
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let config = info
        .result
        .as_ref()?
        .config
        .as_ref()?
        .params
        .as_ref()?
        .vectors_config
        .as_ref()?
        .config
        .as_ref()?;

    match config {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(map) => {
            map.map.values().next().map(|p| p.size)
        }
    }
}

fn payload_from_qdrant(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> Option<BlockPayload> {
    BlockPayload::from_json(
        payload
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect(),
    )
}

/// Convert PointId to string
fn point_id_to_string(id: Option<PointId>) -> Option<String> {
    use qdrant_client::qdrant::point_id::PointIdOptions;

    match id?.point_id_options? {
        PointIdOptions::Uuid(uuid) => Some(uuid),
        PointIdOptions::Num(num) => Some(num.to_string()),
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: qdrant_client::qdrant::Value) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(json_from_qdrant_value).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
    }
}
