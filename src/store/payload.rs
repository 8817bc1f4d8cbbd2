//! Payload schema for Qdrant points

use crate::corpus::BlockEmbedding;
use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable point id for a block uid
pub fn point_id_for(block_uid: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, block_uid.as_bytes())
}

/// A point ready to be upserted
#[derive(Debug, Clone)]
pub struct BlockPoint {
    pub vector: Vec<f32>,
    pub payload: BlockPayload,
}

impl BlockPoint {
    pub fn id(&self) -> Uuid {
        point_id_for(&self.payload.block_uid)
    }

    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let id = self.id().to_string();
        PointStruct::new(id, self.vector, self.payload.to_qdrant_payload())
    }
}

impl From<BlockEmbedding> for BlockPoint {
    fn from(embedding: BlockEmbedding) -> Self {
        Self {
            vector: embedding.vector,
            payload: BlockPayload {
                block_uid: embedding.uid,
                paragraph_uid: embedding.paragraph_uid,
                section_uid: embedding.section_uid,
                sermon_uid: embedding.sermon_uid,
            },
        }
    }
}

/// Payload stored with each block vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub block_uid: String,
    #[serde(default)]
    pub paragraph_uid: String,
    #[serde(default)]
    pub section_uid: String,
    #[serde(default)]
    pub sermon_uid: String,
}

impl BlockPayload {
    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();
        map.insert("block_uid".to_string(), string_to_qdrant(self.block_uid));
        map.insert("paragraph_uid".to_string(), string_to_qdrant(self.paragraph_uid));
        map.insert("section_uid".to_string(), string_to_qdrant(self.section_uid));
        map.insert("sermon_uid".to_string(), string_to_qdrant(self.sermon_uid));
        map
    }

    /// Parse a payload read back from the index; `None` without a block uid
    pub fn from_json(map: Map<String, Value>) -> Option<Self> {
        serde_json::from_value::<BlockPayload>(Value::Object(map))
            .ok()
            .filter(|p| !p.block_uid.is_empty())
    }
}

fn string_to_qdrant(s: String) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> BlockPayload {
        BlockPayload {
            block_uid: "p1-b1".to_string(),
            paragraph_uid: "p1".to_string(),
            section_uid: "s1".to_string(),
            sermon_uid: "47-0412".to_string(),
        }
    }

    #[test]
    fn test_point_id_is_stable() {
        assert_eq!(point_id_for("p1-b1"), point_id_for("p1-b1"));
        assert_ne!(point_id_for("p1-b1"), point_id_for("p1-b2"));
        assert_eq!(point_id_for("p1-b1").get_version_num(), 5);
    }

    #[test]
    fn test_qdrant_payload_keys() {
        let map = payload().to_qdrant_payload();
        assert_eq!(map.len(), 4);
        assert!(map.contains_key("sermon_uid"));
    }

    #[test]
    fn test_from_json_requires_block_uid() {
        let mut map = Map::new();
        map.insert("block_uid".into(), Value::String("p1-b1".into()));
        map.insert("sermon_uid".into(), Value::String("47-0412".into()));
        let parsed = BlockPayload::from_json(map).unwrap();
        assert_eq!(parsed.block_uid, "p1-b1");
        assert_eq!(parsed.paragraph_uid, "");

        assert!(BlockPayload::from_json(Map::new()).is_none());
    }
}
