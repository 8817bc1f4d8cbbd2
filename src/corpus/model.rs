//! Corpus row types and the nested sermon document

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Block kinds found in transcripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockType {
    Normal,
    EditorialComment,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockType::Normal => write!(f, "normal"),
            BlockType::EditorialComment => write!(f, "editorial-comment"),
        }
    }
}

impl FromStr for BlockType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "" | "normal" => Ok(BlockType::Normal),
            "editorial-comment" | "editorialcomment" | "editorial" => {
                Ok(BlockType::EditorialComment)
            }
            _ => Err(Error::Ingest(format!("Unknown block type: {}", s))),
        }
    }
}

/// An italicised run inside a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItalicSegment {
    pub text: String,
    pub index: i64,
}

/// A fully nested sermon as returned by `CorpusStore::get_sermon`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sermon {
    pub id: i64,
    pub uid: String,
    pub title: String,
    pub date: Option<String>,
    pub ordered_section_ids: Vec<String>,
    pub sections: BTreeMap<String, SermonSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SermonSection {
    pub number: Option<String>,
    pub order: i64,
    pub ordered_paragraph_ids: Vec<String>,
    pub paragraphs: BTreeMap<String, SermonParagraph>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SermonParagraph {
    pub order: i64,
    pub blocks: Vec<SermonBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SermonBlock {
    pub uid: String,
    pub text: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub order: i64,
    pub indented: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub italic_segments: Vec<ItalicSegment>,
}

impl Sermon {
    /// Sections in display order
    pub fn sections_in_order(&self) -> impl Iterator<Item = (&String, &SermonSection)> {
        self.ordered_section_ids
            .iter()
            .filter_map(|id| self.sections.get(id).map(|s| (id, s)))
    }

    /// Total paragraphs across all sections
    pub fn paragraph_count(&self) -> usize {
        self.sections.values().map(|s| s.paragraphs.len()).sum()
    }

    /// Total blocks across all paragraphs
    pub fn block_count(&self) -> usize {
        self.sections
            .values()
            .flat_map(|s| s.paragraphs.values())
            .map(|p| p.blocks.len())
            .sum()
    }
}

impl SermonSection {
    /// Paragraphs in display order
    pub fn paragraphs_in_order(&self) -> impl Iterator<Item = (&String, &SermonParagraph)> {
        self.ordered_paragraph_ids
            .iter()
            .filter_map(|id| self.paragraphs.get(id).map(|p| (id, p)))
    }
}

/// Sermon root row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SermonHeader {
    pub id: i64,
    pub uid: String,
    pub title: String,
    pub date: Option<String>,
}

/// One row of the ordered sections → paragraphs → blocks scan
#[derive(Debug, Clone, FromRow)]
pub struct ScanRow {
    pub section_uid: String,
    pub section_number: Option<String>,
    pub section_order: i64,
    pub paragraph_uid: Option<String>,
    pub paragraph_order: Option<i64>,
    pub paragraph_sermon_uid: Option<String>,
    pub block_uid: Option<String>,
    pub block_text: Option<String>,
    pub block_type: Option<String>,
    pub block_order: Option<i64>,
    pub block_indented: Option<bool>,
    pub block_italic_segments: Option<String>,
    pub block_section_uid: Option<String>,
    pub block_sermon_uid: Option<String>,
}

/// A row that cannot be placed in its sermon's hierarchy
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Orphan {
    /// "block" or "paragraph"
    pub kind: String,
    pub uid: String,
    pub parent_uid: String,
    pub detail: String,
}

/// Flat block projection with display context
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BlockRow {
    pub uid: String,
    pub paragraph_uid: String,
    pub section_uid: String,
    pub sermon_uid: String,
    pub text: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub order_index: i64,
    pub indented: bool,
    pub section_number: Option<String>,
    pub sermon_title: Option<String>,
    pub sermon_date: Option<String>,
}

impl BlockRow {
    pub fn get_type(&self) -> Result<BlockType> {
        self.block_type.parse()
    }
}

/// Flat paragraph projection with its concatenated text
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParagraphRow {
    pub uid: String,
    pub section_uid: String,
    pub sermon_uid: String,
    pub order_index: i64,
    pub text: String,
    pub section_number: Option<String>,
    pub sermon_title: Option<String>,
    pub sermon_date: Option<String>,
}

/// Block awaiting an embedding
#[derive(Debug, Clone, FromRow)]
pub struct PendingBlock {
    pub uid: String,
    pub text: String,
}

/// A stored embedding together with the keys the vector index needs
#[derive(Debug, Clone)]
pub struct BlockEmbedding {
    pub uid: String,
    pub paragraph_uid: String,
    pub section_uid: String,
    pub sermon_uid: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct EmbeddingRow {
    pub uid: String,
    pub paragraph_uid: String,
    pub section_uid: String,
    pub sermon_uid: String,
    pub embedding: Vec<u8>,
}

/// Listing entry for `list_sermons`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SermonSummary {
    pub id: i64,
    pub uid: String,
    pub title: String,
    pub date: Option<String>,
    pub section_count: i64,
    pub paragraph_count: i64,
    pub block_count: i64,
}

/// Filters for `list_sermons`
#[derive(Debug, Clone, Default)]
pub struct SermonFilter {
    /// Case-insensitive title substring
    pub title: Option<String>,
    /// Year prefix of the sermon date
    pub year: Option<i32>,
}

/// Corpus-wide counts
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct CorpusStats {
    pub sermons: i64,
    pub sections: i64,
    pub paragraphs: i64,
    pub blocks: i64,
    pub embeddable_blocks: i64,
    pub embedded_blocks: i64,
    pub ledger_entries: i64,
    pub windows: i64,
}

/// Encode an embedding as little-endian f32 bytes
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes; `None` if the length is not a multiple of 4
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Build the nested document from an ordered scan.
///
/// Rows must arrive ordered by section, paragraph and block order. Blocks whose
/// denormalized keys disagree with the row they were joined through are skipped
/// and returned as orphans, as are paragraphs claiming a different sermon.
pub fn assemble_sermon(header: SermonHeader, rows: Vec<ScanRow>) -> (Sermon, Vec<Orphan>) {
    let mut sermon = Sermon {
        id: header.id,
        uid: header.uid,
        title: header.title,
        date: header.date,
        ordered_section_ids: Vec::new(),
        sections: BTreeMap::new(),
    };
    let mut orphans = Vec::new();

    for row in rows {
        let section = sermon
            .sections
            .entry(row.section_uid.clone())
            .or_insert_with(|| SermonSection {
                number: row.section_number.clone(),
                order: row.section_order,
                ordered_paragraph_ids: Vec::new(),
                paragraphs: BTreeMap::new(),
            });
        if !sermon.ordered_section_ids.contains(&row.section_uid) {
            sermon.ordered_section_ids.push(row.section_uid.clone());
        }

        let Some(paragraph_uid) = row.paragraph_uid else {
            continue;
        };

        if row.paragraph_sermon_uid.as_deref() != Some(sermon.uid.as_str()) {
            let orphan = Orphan {
                kind: "paragraph".to_string(),
                uid: paragraph_uid.clone(),
                parent_uid: row.section_uid.clone(),
                detail: format!(
                    "paragraph belongs to sermon {:?}",
                    row.paragraph_sermon_uid.as_deref().unwrap_or("")
                ),
            };
            if !orphans.contains(&orphan) {
                orphans.push(orphan);
            }
            continue;
        }

        let paragraph = section
            .paragraphs
            .entry(paragraph_uid.clone())
            .or_insert_with(|| SermonParagraph {
                order: row.paragraph_order.unwrap_or_default(),
                blocks: Vec::new(),
            });
        if !section.ordered_paragraph_ids.contains(&paragraph_uid) {
            section.ordered_paragraph_ids.push(paragraph_uid.clone());
        }

        let Some(block_uid) = row.block_uid else {
            continue;
        };

        let keys_agree = row.block_section_uid.as_deref() == Some(row.section_uid.as_str())
            && row.block_sermon_uid.as_deref() == Some(sermon.uid.as_str());
        if !keys_agree {
            orphans.push(Orphan {
                kind: "block".to_string(),
                uid: block_uid,
                parent_uid: paragraph_uid,
                detail: "denormalized section/sermon keys disagree with paragraph".to_string(),
            });
            continue;
        }

        let italic_segments = row
            .block_italic_segments
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();

        paragraph.blocks.push(SermonBlock {
            uid: block_uid,
            text: row.block_text.unwrap_or_default(),
            block_type: row.block_type.unwrap_or_else(|| BlockType::Normal.to_string()),
            order: row.block_order.unwrap_or_default(),
            indented: row.block_indented.unwrap_or(false),
            italic_segments,
        });
    }

    (sermon, orphans)
}
