use super::{BlockPoint, IndexEntry, QueryParams, VectorHit, VectorIndex};
use crate::embed::cosine_similarity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// In-process vector index with exact cosine search.
///
/// Brute force over every stored point, so only suitable for tests and
/// small dry runs.
pub struct MemoryIndex {
    dimension: usize,
    points: RwLock<HashMap<String, BlockPoint>>,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn existing_ids(&self, block_uids: &[String]) -> Result<HashSet<String>> {
        let points = self.points.read().await;
        Ok(block_uids
            .iter()
            .filter(|uid| points.contains_key(*uid))
            .cloned()
            .collect())
    }

    async fn upsert(&self, points: Vec<BlockPoint>) -> Result<()> {
        if let Some(bad) = points.iter().find(|p| p.vector.len() != self.dimension) {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.vector.len()
            )));
        }
        let mut stored = self.points.write().await;
        for point in points {
            stored.insert(point.payload.block_uid.clone(), point);
        }
        Ok(())
    }

    async fn delete(&self, block_uids: &[String]) -> Result<()> {
        let mut stored = self.points.write().await;
        for uid in block_uids {
            stored.remove(uid);
        }
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<IndexEntry>> {
        let stored = self.points.read().await;
        let mut entries: Vec<IndexEntry> = stored
            .values()
            .map(|p| IndexEntry {
                block_uid: p.payload.block_uid.clone(),
                sermon_uid: p.payload.sermon_uid.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.block_uid.cmp(&b.block_uid));
        Ok(entries)
    }

    async fn query(&self, vector: &[f32], params: &QueryParams) -> Result<Vec<VectorHit>> {
        let stored = self.points.read().await;
        let mut hits: Vec<VectorHit> = stored
            .values()
            .filter(|p| {
                params
                    .sermon_uid
                    .as_ref()
                    .map_or(true, |s| &p.payload.sermon_uid == s)
            })
            .map(|p| VectorHit {
                block_uid: p.payload.block_uid.clone(),
                paragraph_uid: p.payload.paragraph_uid.clone(),
                sermon_uid: p.payload.sermon_uid.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.block_uid.cmp(&b.block_uid))
        });
        hits.truncate(params.top_k);
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.points.read().await.len() as u64)
    }
}
