//! Sermon document ingestion
//!
//! Sermon JSON files are flattened into rows and written one sermon per
//! transaction. Unchanged files (same blake3 hash) are skipped.
//!
//! [`ingest_path`] is the complete load: it also rebuilds the paragraph
//! windows, which the per-sermon writes leave stale.

use super::model::{BlockType, ItalicSegment};
use super::CorpusStore;
use crate::error::{Error, Result};
use crate::lexical::{WindowIndex, WindowStats};
use chrono::Utc;
use ignore::WalkBuilder;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregate files that are not individual sermons
const SKIPPED_FILES: &[&str] = &["all_sermons.json", "structure.json"];

// ============================================================================
// Source documents
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SermonDocument {
    #[serde(default)]
    pub id: Option<i64>,
    pub uid: String,
    pub title: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub ordered_section_ids: Vec<String>,
    #[serde(default)]
    pub sections: HashMap<String, SectionDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDocument {
    /// Either a JSON number or a string in the source files
    #[serde(default)]
    pub number: Option<serde_json::Value>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub ordered_paragraph_ids: Vec<String>,
    #[serde(default)]
    pub paragraphs: HashMap<String, ParagraphDocument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphDocument {
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub ordered_block_ids: Vec<String>,
    #[serde(default)]
    pub blocks: HashMap<String, BlockDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDocument {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default, rename = "type")]
    pub block_type: Option<String>,
    #[serde(default)]
    pub indented: bool,
    #[serde(default)]
    pub italic_segments: Vec<ItalicSegment>,
}

// ============================================================================
// Flattened rows
// ============================================================================

#[derive(Debug, Clone)]
pub struct FlatSermon {
    pub id: Option<i64>,
    pub uid: String,
    pub title: String,
    pub date: Option<String>,
    pub sections: Vec<FlatSection>,
    pub paragraphs: Vec<FlatParagraph>,
    pub blocks: Vec<FlatBlock>,
}

#[derive(Debug, Clone)]
pub struct FlatSection {
    pub uid: String,
    pub number: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone)]
pub struct FlatParagraph {
    pub uid: String,
    pub section_uid: String,
    pub order_index: i64,
}

#[derive(Debug, Clone)]
pub struct FlatBlock {
    pub uid: String,
    pub paragraph_uid: String,
    pub section_uid: String,
    pub text: String,
    pub block_type: BlockType,
    pub order_index: i64,
    pub indented: bool,
    pub italic_segments: Vec<ItalicSegment>,
}

/// Order children by their position in `ordered_ids`; when the list is
/// absent, fall back to each child's own `order` field.
fn ordered_children<'a, T>(
    parent: &str,
    ordered_ids: &'a [String],
    children: &'a HashMap<String, T>,
    order_of: impl Fn(&T) -> Option<i64>,
) -> Vec<(&'a String, &'a T, i64)> {
    if ordered_ids.is_empty() {
        let mut all: Vec<_> = children
            .iter()
            .map(|(uid, child)| (uid, child, order_of(child).unwrap_or_default()))
            .collect();
        all.sort_by(|a, b| (a.2, a.0).cmp(&(b.2, b.0)));
        return all;
    }

    ordered_ids
        .iter()
        .enumerate()
        .filter_map(|(position, uid)| match children.get(uid) {
            Some(child) => Some((uid, child, position as i64)),
            None => {
                warn!(parent = %parent, uid = %uid, "Listed id has no data, skipping");
                None
            }
        })
        .collect()
}

fn section_number(value: &Option<serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Flatten a nested document into insertable rows
pub fn flatten_sermon(doc: &SermonDocument) -> Result<FlatSermon> {
    if doc.uid.trim().is_empty() {
        return Err(Error::Ingest("sermon uid is empty".to_string()));
    }

    let mut flat = FlatSermon {
        id: doc.id,
        uid: doc.uid.clone(),
        title: doc.title.clone(),
        date: doc.date.clone(),
        sections: Vec::new(),
        paragraphs: Vec::new(),
        blocks: Vec::new(),
    };

    for (section_uid, section, section_order) in
        ordered_children(&doc.uid, &doc.ordered_section_ids, &doc.sections, |s| s.order)
    {
        flat.sections.push(FlatSection {
            uid: section_uid.clone(),
            number: section_number(&section.number),
            order_index: section_order,
        });

        for (paragraph_uid, paragraph, paragraph_order) in ordered_children(
            section_uid,
            &section.ordered_paragraph_ids,
            &section.paragraphs,
            |p| p.order,
        ) {
            flat.paragraphs.push(FlatParagraph {
                uid: paragraph_uid.clone(),
                section_uid: section_uid.clone(),
                order_index: paragraph_order,
            });

            for (block_uid, block, block_order) in ordered_children(
                paragraph_uid,
                &paragraph.ordered_block_ids,
                &paragraph.blocks,
                |b| b.order,
            ) {
                let block_type = match block.block_type.as_deref() {
                    None => BlockType::Normal,
                    Some(raw) => raw.parse().unwrap_or_else(|_| {
                        warn!(block_uid = %block_uid, block_type = %raw, "Unknown block type, storing as normal");
                        BlockType::Normal
                    }),
                };

                flat.blocks.push(FlatBlock {
                    uid: block_uid.clone(),
                    paragraph_uid: paragraph_uid.clone(),
                    section_uid: section_uid.clone(),
                    text: block.text.clone(),
                    block_type,
                    order_index: block_order,
                    indented: block.indented,
                    italic_segments: block.italic_segments.clone(),
                });
            }
        }
    }

    Ok(flat)
}

// ============================================================================
// File discovery
// ============================================================================

/// Sermon JSON files under `path` (or `path` itself), sorted
pub fn discover_sermon_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(Error::Ingest(format!("Path not found: {}", path.display())));
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let walker = WalkBuilder::new(path)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(e) if e.file_type().map(|t| t.is_file()).unwrap_or(false) => {
                let file = e.path();
                if is_sermon_file(file) {
                    files.push(file.to_path_buf());
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Skipping unreadable entry"),
        }
    }

    files.sort();
    info!("Found {} sermon files under {}", files.len(), path.display());
    Ok(files)
}

fn is_sermon_file(path: &Path) -> bool {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    is_json && !SKIPPED_FILES.contains(&name)
}

// ============================================================================
// Writing
// ============================================================================

/// Result of ingesting one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested { blocks: usize },
    Unchanged,
}

/// Statistics from an ingestion run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub files: usize,
    pub ingested: usize,
    pub unchanged: usize,
    pub blocks: usize,
    pub errors: Vec<String>,
}

impl IngestStats {
    pub fn record(&mut self, outcome: IngestOutcome) {
        self.files += 1;
        match outcome {
            IngestOutcome::Ingested { blocks } => {
                self.ingested += 1;
                self.blocks += blocks;
            }
            IngestOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn record_error(&mut self, path: &Path, error: &Error) {
        self.files += 1;
        self.errors.push(format!("{}: {}", path.display(), error));
    }
}

/// Result of [`ingest_path`]
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub stats: IngestStats,
    /// Set when at least one sermon changed
    pub windows: Option<WindowStats>,
}

/// Load every sermon document under `path` (a file or a directory), then
/// rebuild the paragraph windows if anything changed.
///
/// A document that fails to load is recorded in the stats and skipped.
pub async fn ingest_path(
    store: &Arc<CorpusStore>,
    path: &Path,
    force: bool,
    progress: Option<&ProgressBar>,
) -> Result<IngestReport> {
    let files = discover_sermon_files(path)?;
    info!("Found {} sermon documents under {:?}", files.len(), path);
    if let Some(pb) = progress {
        pb.set_length(files.len() as u64);
    }

    let mut stats = IngestStats::default();
    for file in &files {
        match store.ingest_file(file, force).await {
            Ok(outcome) => stats.record(outcome),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Skipping sermon document");
                stats.record_error(file, &e);
            }
        }
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    let windows = if stats.ingested > 0 {
        Some(WindowIndex::new(Arc::clone(store)).rebuild().await?)
    } else {
        None
    };
    store.clear_cache();

    info!(
        ingested = stats.ingested,
        unchanged = stats.unchanged,
        errors = stats.errors.len(),
        "Ingestion finished"
    );
    Ok(IngestReport { stats, windows })
}

impl CorpusStore {
    /// Stored content hash for a sermon
    pub async fn source_hash(&self, uid: &str) -> Result<Option<String>> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT source_hash FROM sermons WHERE uid = ?")
                .bind(uid)
                .fetch_optional(self.pool())
                .await?;
        Ok(hash.flatten())
    }

    /// Ingest a single sermon file; skipped when its hash is unchanged unless `force`.
    ///
    /// Paragraph windows are not touched. Call [`WindowIndex::rebuild`] after
    /// a batch of these, or use [`ingest_path`].
    pub async fn ingest_file(&self, path: &Path, force: bool) -> Result<IngestOutcome> {
        let bytes = std::fs::read(path)?;
        let hash = blake3::hash(&bytes).to_hex().to_string();

        let doc: SermonDocument = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Ingest(format!("{}: {}", path.display(), e)))?;

        if !force && self.source_hash(&doc.uid).await?.as_deref() == Some(hash.as_str()) {
            debug!(sermon_uid = %doc.uid, "Unchanged, skipping");
            return Ok(IngestOutcome::Unchanged);
        }

        let flat = flatten_sermon(&doc)?;
        self.replace_sermon(&flat, &hash).await?;
        Ok(IngestOutcome::Ingested {
            blocks: flat.blocks.len(),
        })
    }

    /// Replace every row of a sermon in one transaction.
    ///
    /// Embeddings of blocks whose uid and text are unchanged are carried over.
    /// Paragraph windows are left as they were; see [`ingest_file`](Self::ingest_file).
    pub async fn replace_sermon(&self, flat: &FlatSermon, source_hash: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let previous: Vec<(String, String, Option<Vec<u8>>)> =
            sqlx::query_as("SELECT uid, text, embedding FROM blocks WHERE sermon_uid = ?")
                .bind(&flat.uid)
                .fetch_all(&mut *tx)
                .await?;
        let previous: HashMap<String, (String, Option<Vec<u8>>)> = previous
            .into_iter()
            .map(|(uid, text, embedding)| (uid, (text, embedding)))
            .collect();

        sqlx::query(
            "DELETE FROM embedding_progress WHERE entity_uid IN (SELECT uid FROM blocks WHERE sermon_uid = ?)",
        )
        .bind(&flat.uid)
        .execute(&mut *tx)
        .await?;

        for table in ["blocks", "paragraphs", "sections"] {
            sqlx::query(&format!("DELETE FROM {} WHERE sermon_uid = ?", table))
                .bind(&flat.uid)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM sermons WHERE uid = ?")
            .bind(&flat.uid)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO sermons (id, uid, title, date, source_hash, ingested_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(flat.id)
        .bind(&flat.uid)
        .bind(&flat.title)
        .bind(&flat.date)
        .bind(source_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for section in &flat.sections {
            sqlx::query(
                "INSERT INTO sections (uid, sermon_uid, number, order_index) VALUES (?, ?, ?, ?)",
            )
            .bind(&section.uid)
            .bind(&flat.uid)
            .bind(&section.number)
            .bind(section.order_index)
            .execute(&mut *tx)
            .await?;
        }

        // Paragraphs go in before blocks so the projection triggers can find them
        for paragraph in &flat.paragraphs {
            sqlx::query(
                "INSERT INTO paragraphs (uid, section_uid, sermon_uid, order_index) VALUES (?, ?, ?, ?)",
            )
            .bind(&paragraph.uid)
            .bind(&paragraph.section_uid)
            .bind(&flat.uid)
            .bind(paragraph.order_index)
            .execute(&mut *tx)
            .await?;
        }

        let mut restored = 0usize;
        let mut stale_vectors = Vec::new();
        for block in &flat.blocks {
            let embedding = match previous.get(&block.uid) {
                Some((text, blob)) if *text == block.text => blob.clone(),
                Some((_, Some(_))) => {
                    // The index may still hold the vector of the old text
                    stale_vectors.push(block.uid.as_str());
                    None
                }
                _ => None,
            };
            if embedding.is_some() {
                restored += 1;
            }

            let italic = if block.italic_segments.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&block.italic_segments)?)
            };

            sqlx::query(
                r#"
                INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, type,
                                    order_index, indented, italic_segments, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&block.uid)
            .bind(&block.paragraph_uid)
            .bind(&block.section_uid)
            .bind(&flat.uid)
            .bind(&block.text)
            .bind(block.block_type.to_string())
            .bind(block.order_index)
            .bind(block.indented)
            .bind(italic)
            .bind(embedding)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Ingest(format!(
                    "sermon {}: cannot insert block {}: {}",
                    flat.uid, block.uid, e
                ))
            })?;
        }

        let now = Utc::now().to_rfc3339();
        for uid in &stale_vectors {
            sqlx::query(
                "INSERT INTO vector_resync (block_uid, marked_at) VALUES (?, ?) \
                 ON CONFLICT(block_uid) DO UPDATE SET marked_at = excluded.marked_at",
            )
            .bind(*uid)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "DELETE FROM vector_resync WHERE NOT EXISTS \
             (SELECT 1 FROM blocks b WHERE b.uid = vector_resync.block_uid)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.evict(&flat.uid);

        info!(
            sermon_uid = %flat.uid,
            sections = flat.sections.len(),
            paragraphs = flat.paragraphs.len(),
            blocks = flat.blocks.len(),
            embeddings_kept = restored,
            vectors_to_refresh = stale_vectors.len(),
            "Ingested sermon"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::{seed_faith_sermon, setup_test_store};
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> SermonDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_flatten_uses_list_positions() {
        let flat = flatten_sermon(&doc(serde_json::json!({
            "uid": "x", "title": "T",
            "orderedSectionIds": ["b", "a", "missing"],
            "sections": {
                "a": {"number": 7, "order": 0},
                "b": {"number": "1", "order": 9}
            }
        })))
        .unwrap();

        let order: Vec<_> = flat
            .sections
            .iter()
            .map(|s| (s.uid.as_str(), s.order_index))
            .collect();
        assert_eq!(order, vec![("b", 0), ("a", 1)]);
        assert_eq!(flat.sections[1].number.as_deref(), Some("7"));
    }

    #[test]
    fn test_flatten_falls_back_to_order_field() {
        let flat = flatten_sermon(&doc(serde_json::json!({
            "uid": "x", "title": "T",
            "orderedSectionIds": ["s"],
            "sections": {"s": {"orderedParagraphIds": ["p"], "paragraphs": {"p": {
                "blocks": {
                    "late": {"text": "second", "order": 5},
                    "early": {"text": "first", "order": 1, "type": "editorial_comment"}
                }
            }}}}
        })))
        .unwrap();

        let texts: Vec<_> = flat.blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(flat.blocks[0].block_type, BlockType::EditorialComment);
    }

    #[test]
    fn test_flatten_rejects_empty_uid() {
        let result = flatten_sermon(&doc(serde_json::json!({"uid": " ", "title": "T"})));
        assert!(matches!(result, Err(Error::Ingest(_))));
    }

    #[test]
    fn test_discover_skips_aggregates() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("47-0412.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("all_sermons.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "").unwrap();

        let files = discover_sermon_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("47-0412.json"));
    }

    #[tokio::test]
    async fn test_ingest_file_skips_unchanged() {
        let (store, tmp) = setup_test_store().await;
        let path = tmp.path().join("s.json");
        std::fs::write(
            &path,
            r#"{"uid": "47-0412", "title": "Faith", "orderedSectionIds": ["s1"],
                "sections": {"s1": {"orderedParagraphIds": ["p1"], "paragraphs": {"p1": {
                    "orderedBlockIds": ["b1"], "blocks": {"b1": {"text": "Have faith"}}}}}}}"#,
        )
        .unwrap();

        let first = store.ingest_file(&path, false).await.unwrap();
        assert_eq!(first, IngestOutcome::Ingested { blocks: 1 });
        assert_eq!(store.ingest_file(&path, false).await.unwrap(), IngestOutcome::Unchanged);
        assert_eq!(
            store.ingest_file(&path, true).await.unwrap(),
            IngestOutcome::Ingested { blocks: 1 }
        );
    }

    fn three_paragraph_sermon(last: &str) -> String {
        serde_json::json!({
            "uid": "47-0412", "title": "Faith", "orderedSectionIds": ["s1"],
            "sections": {"s1": {"orderedParagraphIds": ["p1", "p2", "p3"], "paragraphs": {
                "p1": {"orderedBlockIds": ["p1-b1"], "blocks": {"p1-b1": {"text": "Have faith"}}},
                "p2": {"orderedBlockIds": ["p2-b1"], "blocks": {"p2-b1": {"text": "in God"}}},
                "p3": {"orderedBlockIds": ["p3-b1"], "blocks": {"p3-b1": {"text": last}}}
            }}}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_ingest_path_rebuilds_windows() {
        let (store, _db) = setup_test_store().await;
        let store = Arc::new(store);
        let docs = TempDir::new().unwrap();
        let path = docs.path().join("47-0412.json");
        std::fs::write(&path, three_paragraph_sermon("tonight")).unwrap();

        let report = ingest_path(&store, docs.path(), false, None).await.unwrap();
        assert_eq!(report.stats.ingested, 1);
        // two windows of size 2, one of size 3
        assert_eq!(report.windows.as_ref().unwrap().windows, 3);

        std::fs::write(&path, three_paragraph_sermon("forever")).unwrap();
        let report = ingest_path(&store, &path, false, None).await.unwrap();
        assert_eq!(report.stats.ingested, 1);

        let texts: Vec<String> =
            sqlx::query_scalar("SELECT text FROM paragraph_windows WHERE window_size = 3")
                .fetch_all(store.pool())
                .await
                .unwrap();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].ends_with("forever"));

        let unchanged = ingest_path(&store, &path, false, None).await.unwrap();
        assert_eq!(unchanged.stats.unchanged, 1);
        assert!(unchanged.windows.is_none());
    }

    #[tokio::test]
    async fn test_replace_keeps_embeddings_of_unchanged_blocks() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        store.store_embedding("p1-b1", &[1.0, 0.0, 0.0, 0.0]).await.unwrap();
        store.store_embedding("p2-b1", &[0.0, 1.0, 0.0, 0.0]).await.unwrap();

        let flat = flatten_sermon(&doc(serde_json::json!({
            "uid": "47-0412", "title": "Faith",
            "orderedSectionIds": ["s1"],
            "sections": {"s1": {"orderedParagraphIds": ["p1", "p2"], "paragraphs": {
                "p1": {"orderedBlockIds": ["p1-b1"], "blocks": {"p1-b1": {"text": "You must have faith"}}},
                "p2": {"orderedBlockIds": ["p2-b1"], "blocks": {"p2-b1": {"text": "Then God will answer you."}}}
            }}}
        })))
        .unwrap();

        store.replace_sermon(&flat, "hash-2").await.unwrap();

        assert_eq!(store.embedded_block_uids().await.unwrap(), vec!["p1-b1"]);
        assert!(!store.is_ledgered("p1-b1").await.unwrap());
        let resync = store.vector_resync_uids().await.unwrap();
        assert_eq!(resync.len(), 1);
        assert!(resync.contains("p2-b1"));
        assert_eq!(store.source_hash("47-0412").await.unwrap().as_deref(), Some("hash-2"));

        let sermon = store.get_sermon("47-0412").await.unwrap().unwrap();
        assert_eq!(sermon.ordered_section_ids, vec!["s1"]);
        assert_eq!(sermon.block_count(), 2);
    }
}
