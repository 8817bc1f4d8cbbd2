//! Corpus storage using SQLite
//!
//! This module owns the canonical transcript data:
//! - Sermons, sections, paragraphs and blocks
//! - Block embeddings and the embedding progress ledger
//! - Reconstruction of nested sermon documents (cached per uid)

mod ingest;
mod model;
mod schema;

pub use ingest::*;
pub use model::*;
pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Bound parameters per IN (...) list
const IN_CHUNK: usize = 500;

/// Owned handle to the corpus database
pub struct CorpusStore {
    pool: SqlitePool,
    dimension: usize,
    cache: RwLock<HashMap<String, Arc<Sermon>>>,
}

impl CorpusStore {
    /// Connect using config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file, config.embedding.dimension).await
    }

    /// Open (creating if missing) the database at `db_path`
    pub async fn open(db_path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!("Opening corpus database at {:?}", db_path);

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            dimension,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Private in-memory database (single connection, so every query sees the same data)
    pub async fn open_in_memory(dimension: usize) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            dimension,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Close the pool; outstanding connections are drained
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        debug!("Applying corpus schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if the schema exists
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='blocks'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Configured embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // ===== Sermon Reconstruction =====

    /// Get a fully nested sermon, or `None` when the uid is unknown
    pub async fn get_sermon(&self, uid: &str) -> Result<Option<Arc<Sermon>>> {
        if let Some(hit) = self.cached(uid) {
            return Ok(Some(hit));
        }

        let header: Option<SermonHeader> =
            sqlx::query_as("SELECT id, uid, title, date FROM sermons WHERE uid = ?")
                .bind(uid)
                .fetch_optional(&self.pool)
                .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let rows: Vec<ScanRow> = sqlx::query_as(
            r#"
            SELECT sec.uid AS section_uid, sec.number AS section_number,
                   sec.order_index AS section_order,
                   p.uid AS paragraph_uid, p.order_index AS paragraph_order,
                   p.sermon_uid AS paragraph_sermon_uid,
                   b.uid AS block_uid, b.text AS block_text, b.type AS block_type,
                   b.order_index AS block_order, b.indented AS block_indented,
                   b.italic_segments AS block_italic_segments,
                   b.section_uid AS block_section_uid, b.sermon_uid AS block_sermon_uid
            FROM sections sec
            LEFT JOIN paragraphs p ON p.section_uid = sec.uid
            LEFT JOIN blocks b ON b.paragraph_uid = p.uid
            WHERE sec.sermon_uid = ?
            ORDER BY sec.order_index, sec.id, p.order_index, p.id, b.order_index, b.id
            "#,
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        let (sermon, orphans) = assemble_sermon(header, rows);
        for orphan in &orphans {
            warn!(
                sermon_uid = %uid,
                kind = %orphan.kind,
                orphan_uid = %orphan.uid,
                "Skipping orphan row: {}",
                orphan.detail
            );
        }

        let sermon = Arc::new(sermon);
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid.to_string(), Arc::clone(&sermon));
        Ok(Some(sermon))
    }

    fn cached(&self, uid: &str) -> Option<Arc<Sermon>> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(uid)
            .cloned()
    }

    /// Drop cached sermons (after re-ingestion)
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub(crate) fn evict(&self, uid: &str) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uid);
    }

    /// Rows of a sermon that cannot be placed in its hierarchy
    pub async fn find_orphans(&self, sermon_uid: &str) -> Result<Vec<Orphan>> {
        let orphans = sqlx::query_as::<_, Orphan>(
            r#"
            SELECT 'block' AS kind, b.uid AS uid, b.paragraph_uid AS parent_uid,
                   'paragraph does not exist' AS detail
            FROM blocks b LEFT JOIN paragraphs p ON p.uid = b.paragraph_uid
            WHERE b.sermon_uid = ?1 AND p.uid IS NULL
            UNION ALL
            SELECT 'paragraph', p.uid, p.section_uid, 'section does not exist'
            FROM paragraphs p LEFT JOIN sections s ON s.uid = p.section_uid
            WHERE p.sermon_uid = ?1 AND s.uid IS NULL
            UNION ALL
            SELECT 'block', b.uid, b.paragraph_uid,
                   'denormalized section/sermon keys disagree with paragraph'
            FROM blocks b JOIN paragraphs p ON p.uid = b.paragraph_uid
            WHERE (b.sermon_uid = ?1 OR p.sermon_uid = ?1)
              AND (b.section_uid != p.section_uid OR b.sermon_uid != p.sermon_uid)
            "#,
        )
        .bind(sermon_uid)
        .fetch_all(&self.pool)
        .await?;
        Ok(orphans)
    }

    // ===== Batch Projections =====

    /// Blocks for the given uids (unknown uids are ignored)
    pub async fn get_blocks_by_uids(&self, uids: &[String]) -> Result<Vec<BlockRow>> {
        let mut rows = Vec::new();
        for chunk in uids.chunks(IN_CHUNK) {
            let sql = format!(
                r#"
                SELECT b.uid, b.paragraph_uid, b.section_uid, b.sermon_uid, b.text,
                       b.type AS block_type, b.order_index, b.indented,
                       sec.number AS section_number, ser.title AS sermon_title,
                       ser.date AS sermon_date
                FROM blocks b
                LEFT JOIN sections sec ON sec.uid = b.section_uid
                LEFT JOIN sermons ser ON ser.uid = b.sermon_uid
                WHERE b.uid IN ({})
                "#,
                placeholders(chunk.len())
            );
            let mut query = sqlx::query_as::<_, BlockRow>(&sql);
            for uid in chunk {
                query = query.bind(uid);
            }
            rows.extend(query.fetch_all(&self.pool).await?);
        }
        rows.sort_by(|a, b| {
            (&a.sermon_uid, &a.paragraph_uid, a.order_index, &a.uid)
                .cmp(&(&b.sermon_uid, &b.paragraph_uid, b.order_index, &b.uid))
        });
        Ok(rows)
    }

    /// Paragraphs for the given paragraph uids
    pub async fn get_paragraphs_by_uids(&self, uids: &[String]) -> Result<Vec<ParagraphRow>> {
        self.paragraph_rows("p.uid IN ({})", uids).await
    }

    /// Distinct paragraphs containing any of the given blocks
    pub async fn get_paragraphs_by_block_uids(
        &self,
        block_uids: &[String],
    ) -> Result<Vec<ParagraphRow>> {
        self.paragraph_rows(
            "p.uid IN (SELECT paragraph_uid FROM blocks WHERE uid IN ({}))",
            block_uids,
        )
        .await
    }

    async fn paragraph_rows(&self, condition: &str, uids: &[String]) -> Result<Vec<ParagraphRow>> {
        let mut by_uid: HashMap<String, (i64, ParagraphRow)> = HashMap::new();
        for chunk in uids.chunks(IN_CHUNK) {
            let sql = format!(
                r#"
                SELECT p.uid, p.section_uid, p.sermon_uid, p.order_index,
                       COALESCE(pt.text, '') AS text,
                       sec.number AS section_number, ser.title AS sermon_title,
                       ser.date AS sermon_date,
                       COALESCE(sec.order_index, 0) AS section_order
                FROM paragraphs p
                LEFT JOIN paragraphs_text pt ON pt.uid = p.uid
                LEFT JOIN sections sec ON sec.uid = p.section_uid
                LEFT JOIN sermons ser ON ser.uid = p.sermon_uid
                WHERE {}
                "#,
                condition.replace("{}", &placeholders(chunk.len()))
            );
            let mut query = sqlx::query_as::<_, ParagraphWithOrder>(&sql);
            for uid in chunk {
                query = query.bind(uid);
            }
            for row in query.fetch_all(&self.pool).await? {
                by_uid
                    .entry(row.row.uid.clone())
                    .or_insert((row.section_order, row.row));
            }
        }

        let mut rows: Vec<(i64, ParagraphRow)> = by_uid.into_values().collect();
        rows.sort_by(|(sa, a), (sb, b)| {
            (&a.sermon_uid, *sa, a.order_index, &a.uid).cmp(&(&b.sermon_uid, *sb, b.order_index, &b.uid))
        });
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    // ===== Listing & Stats =====

    /// List sermons ordered by date
    pub async fn list_sermons(&self, filter: &SermonFilter) -> Result<Vec<SermonSummary>> {
        let title = filter.title.as_ref().map(|t| format!("%{}%", t));
        let year = filter.year.map(|y| format!("{:04}", y));

        let sermons = sqlx::query_as::<_, SermonSummary>(
            r#"
            SELECT s.id, s.uid, s.title, s.date,
                   (SELECT COUNT(*) FROM sections sec WHERE sec.sermon_uid = s.uid) AS section_count,
                   (SELECT COUNT(*) FROM paragraphs p WHERE p.sermon_uid = s.uid) AS paragraph_count,
                   (SELECT COUNT(*) FROM blocks b WHERE b.sermon_uid = s.uid) AS block_count
            FROM sermons s
            WHERE (?1 IS NULL OR s.title LIKE ?1 COLLATE NOCASE)
              AND (?2 IS NULL OR substr(s.date, 1, 4) = ?2)
            ORDER BY s.date ASC, s.uid ASC
            "#,
        )
        .bind(title)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;
        Ok(sermons)
    }

    /// Corpus-wide counts
    pub async fn corpus_stats(&self) -> Result<CorpusStats> {
        let stats = sqlx::query_as::<_, CorpusStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sermons) AS sermons,
                (SELECT COUNT(*) FROM sections) AS sections,
                (SELECT COUNT(*) FROM paragraphs) AS paragraphs,
                (SELECT COUNT(*) FROM blocks) AS blocks,
                (SELECT COUNT(*) FROM blocks WHERE trim(text) != '') AS embeddable_blocks,
                (SELECT COUNT(*) FROM blocks WHERE embedding IS NOT NULL) AS embedded_blocks,
                (SELECT COUNT(*) FROM embedding_progress) AS ledger_entries,
                (SELECT COUNT(*) FROM paragraph_windows) AS windows
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    // ===== Embedding Operations =====

    /// Blocks lacking an embedding that the ledger has not seen
    pub async fn pending_embedding_work(&self) -> Result<Vec<PendingBlock>> {
        let pending = sqlx::query_as::<_, PendingBlock>(
            r#"
            SELECT b.uid, b.text FROM blocks b
            WHERE b.embedding IS NULL
              AND trim(b.text) != ''
              AND NOT EXISTS (SELECT 1 FROM embedding_progress e WHERE e.entity_uid = b.uid)
            ORDER BY b.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(pending)
    }

    /// Write an embedding and its ledger entry atomically.
    ///
    /// Returns `false` when the block no longer exists.
    pub async fn store_embedding(&self, uid: &str, vector: &[f32]) -> Result<bool> {
        if vector.len() != self.dimension {
            return Err(Error::Embedding(format!(
                "Refusing to store embedding for block {}: expected dimension {}, got {}",
                uid,
                self.dimension,
                vector.len()
            )));
        }

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE blocks SET embedding = ? WHERE uid = ?")
            .bind(encode_embedding(vector))
            .bind(uid)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO embedding_progress (entity_uid, processed_at, status)
            VALUES (?, ?, 'completed')
            ON CONFLICT(entity_uid) DO UPDATE SET
                processed_at = excluded.processed_at,
                status = excluded.status
            "#,
        )
        .bind(uid)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Whether an entity is already in the progress ledger
    pub async fn is_ledgered(&self, uid: &str) -> Result<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM embedding_progress WHERE entity_uid = ?")
                .bind(uid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Empty the progress ledger
    pub async fn clear_progress(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embedding_progress")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of blocks carrying an embedding
    pub async fn count_embedded(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Number of blocks with non-blank text
    pub async fn count_embeddable(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE trim(text) != ''")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Uids of every embedded block
    pub async fn embedded_block_uids(&self) -> Result<Vec<String>> {
        let uids: Vec<String> = sqlx::query_scalar(
            "SELECT uid FROM blocks WHERE embedding IS NOT NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(uids)
    }

    /// Blocks whose text changed after their vector was uploaded
    pub async fn vector_resync_uids(&self) -> Result<HashSet<String>> {
        let uids: Vec<String> = sqlx::query_scalar("SELECT block_uid FROM vector_resync")
            .fetch_all(&self.pool)
            .await?;
        Ok(uids.into_iter().collect())
    }

    /// Forget resync marks once the fresh vectors are in the index
    pub async fn clear_vector_resync(&self, uids: &[String]) -> Result<u64> {
        let mut cleared = 0;
        for chunk in uids.chunks(IN_CHUNK) {
            let sql = format!(
                "DELETE FROM vector_resync WHERE block_uid IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for uid in chunk {
                query = query.bind(uid);
            }
            cleared += query.execute(&self.pool).await?.rows_affected();
        }
        Ok(cleared)
    }

    /// Stored embeddings for the given blocks; blocks without one are omitted
    pub async fn get_embeddings(&self, uids: &[String]) -> Result<Vec<BlockEmbedding>> {
        let mut out = Vec::with_capacity(uids.len());
        for chunk in uids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT uid, paragraph_uid, section_uid, sermon_uid, embedding FROM blocks \
                 WHERE embedding IS NOT NULL AND uid IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query_as::<_, EmbeddingRow>(&sql);
            for uid in chunk {
                query = query.bind(uid);
            }
            for row in query.fetch_all(&self.pool).await? {
                match decode_embedding(&row.embedding) {
                    Some(vector) => out.push(BlockEmbedding {
                        uid: row.uid,
                        paragraph_uid: row.paragraph_uid,
                        section_uid: row.section_uid,
                        sermon_uid: row.sermon_uid,
                        vector,
                    }),
                    None => warn!(block_uid = %row.uid, "Ignoring malformed embedding blob"),
                }
            }
        }
        Ok(out)
    }
}

#[derive(sqlx::FromRow)]
struct ParagraphWithOrder {
    #[sqlx(flatten)]
    row: ParagraphRow,
    section_order: i64,
}

/// "?, ?, ?" for an IN list of `n` items
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) const TEST_DIMENSION: usize = 4;

    pub(crate) async fn setup_test_store() -> (CorpusStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = CorpusStore::open(&tmp.path().join("test.db"), TEST_DIMENSION)
            .await
            .unwrap();
        store.init_schema().await.unwrap();
        (store, tmp)
    }

    /// Sermon "47-0412 Faith": P1, P2 in S1; P3 in S2. The document maps list
    /// keys out of order; only the `ordered*Ids` arrays carry the sequence.
    pub(crate) async fn seed_faith_sermon(store: &CorpusStore) {
        let doc: SermonDocument = serde_json::from_value(serde_json::json!({
            "id": 1,
            "uid": "47-0412",
            "title": "Faith",
            "date": "1947-04-12",
            "orderedSectionIds": ["s1", "s2"],
            "sections": {
                "s2": {
                    "number": "2",
                    "orderedParagraphIds": ["p3"],
                    "paragraphs": {
                        "p3": {
                            "orderedBlockIds": ["p3-b1"],
                            "blocks": {
                                "p3-b1": {"text": "The healing came through faith alone."}
                            }
                        }
                    }
                },
                "s1": {
                    "number": "1",
                    "orderedParagraphIds": ["p1", "p2"],
                    "paragraphs": {
                        "p2": {
                            "orderedBlockIds": ["p2-b1"],
                            "blocks": {
                                "p2-b1": {"text": "Then God will answer."}
                            }
                        },
                        "p1": {
                            "orderedBlockIds": ["p1-b1", "p1-b2"],
                            "blocks": {
                                "p1-b2": {"text": "in God tonight.", "type": "normal"},
                                "p1-b1": {"text": "You must have faith", "indented": true}
                            }
                        }
                    }
                }
            }
        }))
        .unwrap();
        let flat = flatten_sermon(&doc).unwrap();
        store.replace_sermon(&flat, "hash-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_sermon_nesting_and_order() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        let sermon = store.get_sermon("47-0412").await.unwrap().unwrap();
        assert_eq!(sermon.title, "Faith");
        assert_eq!(sermon.ordered_section_ids, vec!["s1", "s2"]);
        let s1 = &sermon.sections["s1"];
        assert_eq!(s1.ordered_paragraph_ids, vec!["p1", "p2"]);
        let blocks: Vec<_> = s1.paragraphs["p1"].blocks.iter().map(|b| b.uid.as_str()).collect();
        assert_eq!(blocks, vec!["p1-b1", "p1-b2"]);
        assert!(s1.paragraphs["p1"].blocks[0].indented);
        assert_eq!(sermon.sections["s2"].number.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_get_sermon_follows_order_index_not_insertion_order() {
        let (store, _tmp) = setup_test_store().await;
        let statements = [
            "INSERT INTO sermons (uid, title, ingested_at) VALUES ('53-0729', 'Shuffled', '2024-01-01T00:00:00Z')",
            // row ids run opposite to document order at every level
            "INSERT INTO sections (uid, sermon_uid, number, order_index) VALUES ('sc', '53-0729', '3', 2)",
            "INSERT INTO sections (uid, sermon_uid, number, order_index) VALUES ('sa', '53-0729', '1', 0)",
            "INSERT INTO sections (uid, sermon_uid, number, order_index) VALUES ('sb', '53-0729', '2', 1)",
            "INSERT INTO paragraphs (uid, section_uid, sermon_uid, order_index) VALUES ('pa3', 'sa', '53-0729', 2)",
            "INSERT INTO paragraphs (uid, section_uid, sermon_uid, order_index) VALUES ('pa1', 'sa', '53-0729', 0)",
            "INSERT INTO paragraphs (uid, section_uid, sermon_uid, order_index) VALUES ('pa2', 'sa', '53-0729', 1)",
            "INSERT INTO paragraphs (uid, section_uid, sermon_uid, order_index) VALUES ('pb1', 'sb', '53-0729', 0)",
            "INSERT INTO paragraphs (uid, section_uid, sermon_uid, order_index) VALUES ('pc1', 'sc', '53-0729', 0)",
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) VALUES ('pa1-b3', 'pa1', 'sa', '53-0729', 'three', 2)",
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) VALUES ('pc1-b1', 'pc1', 'sc', '53-0729', 'last', 0)",
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) VALUES ('pa1-b1', 'pa1', 'sa', '53-0729', 'one', 0)",
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) VALUES ('pa3-b1', 'pa3', 'sa', '53-0729', 'third', 0)",
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) VALUES ('pb1-b1', 'pb1', 'sb', '53-0729', 'middle', 0)",
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) VALUES ('pa1-b2', 'pa1', 'sa', '53-0729', 'two', 1)",
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) VALUES ('pa2-b1', 'pa2', 'sa', '53-0729', 'second', 0)",
        ];
        for sql in statements {
            sqlx::query(sql).execute(store.pool()).await.unwrap();
        }

        let sermon = store.get_sermon("53-0729").await.unwrap().unwrap();
        assert_eq!(sermon.ordered_section_ids, vec!["sa", "sb", "sc"]);
        let sa = &sermon.sections["sa"];
        assert_eq!(sa.ordered_paragraph_ids, vec!["pa1", "pa2", "pa3"]);
        let blocks: Vec<_> = sa.paragraphs["pa1"].blocks.iter().map(|b| b.uid.as_str()).collect();
        assert_eq!(blocks, vec!["pa1-b1", "pa1-b2", "pa1-b3"]);
        assert_eq!(sermon.sections["sc"].ordered_paragraph_ids, vec!["pc1"]);
        assert_eq!(sermon.block_count(), 7);
        assert!(store.find_orphans("53-0729").await.unwrap().is_empty());

        let (text,): (String,) =
            sqlx::query_as("SELECT text FROM paragraphs_text WHERE uid = 'pa1'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(text, "one two three");
    }

    #[tokio::test]
    async fn test_get_sermon_missing_is_none() {
        let (store, _tmp) = setup_test_store().await;
        assert!(store.get_sermon("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_sermon_is_cached() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        let first = store.get_sermon("47-0412").await.unwrap().unwrap();
        sqlx::query("UPDATE sermons SET title = 'Changed'")
            .execute(store.pool())
            .await
            .unwrap();
        let second = store.get_sermon("47-0412").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.title, "Faith");

        store.clear_cache();
        let third = store.get_sermon("47-0412").await.unwrap().unwrap();
        assert_eq!(third.title, "Changed");
    }

    #[tokio::test]
    async fn test_orphans_are_skipped_and_reported() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        sqlx::query(
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) \
             VALUES ('ghost', 'p-missing', 's1', '47-0412', 'lost words', 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) \
             VALUES ('crossed', 'p1', 's2', '47-0412', 'wrong section', 9)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let sermon = store.get_sermon("47-0412").await.unwrap().unwrap();
        assert_eq!(sermon.block_count(), 4);

        let orphans = store.find_orphans("47-0412").await.unwrap();
        let uids: Vec<_> = orphans.iter().map(|o| o.uid.as_str()).collect();
        assert!(uids.contains(&"ghost"));
        assert!(uids.contains(&"crossed"));
    }

    #[tokio::test]
    async fn test_batch_projections() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        let blocks = store
            .get_blocks_by_uids(&["p1-b2".to_string(), "p3-b1".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].sermon_title.as_deref(), Some("Faith"));

        let paragraphs = store
            .get_paragraphs_by_block_uids(&["p1-b1".to_string(), "p1-b2".to_string()])
            .await
            .unwrap();
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].uid, "p1");
        assert_eq!(paragraphs[0].text, "You must have faith in God tonight.");

        assert!(store.get_blocks_by_uids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_embedding_pairs_with_ledger() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        assert_eq!(store.pending_embedding_work().await.unwrap().len(), 4);

        assert!(store.store_embedding("p1-b1", &[0.1, 0.2, 0.3, 0.4]).await.unwrap());
        assert!(store.is_ledgered("p1-b1").await.unwrap());
        assert_eq!(store.count_embedded().await.unwrap(), 1);
        assert_eq!(store.pending_embedding_work().await.unwrap().len(), 3);

        assert!(!store.store_embedding("missing", &[0.0; 4]).await.unwrap());
        assert!(!store.is_ledgered("missing").await.unwrap());

        let err = store.store_embedding("p1-b2", &[0.0; 3]).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(!store.is_ledgered("p1-b2").await.unwrap());

        let stored = store.get_embeddings(&["p1-b1".to_string()]).await.unwrap();
        assert_eq!(stored[0].vector, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(stored[0].paragraph_uid, "p1");
    }

    #[tokio::test]
    async fn test_list_sermons_and_stats() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        let all = store.list_sermons(&SermonFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].paragraph_count, 3);

        let filtered = store
            .list_sermons(&SermonFilter {
                title: Some("fai".to_string()),
                year: Some(1947),
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let none = store
            .list_sermons(&SermonFilter {
                title: None,
                year: Some(1965),
            })
            .await
            .unwrap();
        assert!(none.is_empty());

        let stats = store.corpus_stats().await.unwrap();
        assert_eq!(stats.sermons, 1);
        assert_eq!(stats.blocks, 4);
        assert_eq!(stats.embedded_blocks, 0);
    }
}
