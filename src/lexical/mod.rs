//! Full-text search over the corpus
//!
//! Three FTS5 indexes are maintained by triggers on the corpus tables:
//! - `blocks_fts` over block text
//! - `paragraphs_fts` over the paragraph text projection
//! - `paragraph_windows_fts` over 2-3 paragraph windows (see [`windows`])
//!
//! Ranking is bm25, a cost: lower is better.

mod query;
pub mod windows;

pub use query::{LexicalQuery, Term};
pub use windows::{plan_windows, PlannedWindow, WindowIndex, WindowSource, WindowStats};

use crate::corpus::CorpusStore;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// How many ranked rows to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Every match (audit and debugging)
    All,
    Top { n: usize, offset: usize },
}

impl Limit {
    /// `-1` means all matches
    pub fn from_raw(limit: i64, offset: usize) -> Result<Self> {
        match limit {
            -1 => Ok(Limit::All),
            n if n >= 0 => Ok(Limit::Top {
                n: n as usize,
                offset,
            }),
            n => Err(Error::InvalidQuery(format!("invalid limit: {}", n))),
        }
    }

    fn sql_bounds(self) -> (i64, i64) {
        match self {
            Limit::All => (-1, 0),
            Limit::Top { n, offset } => (n as i64, offset as i64),
        }
    }
}

/// Which index to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Paragraphs,
    Blocks,
    Windows,
}

impl Target {
    fn select_sql(self) -> &'static str {
        match self {
            Target::Paragraphs => {
                r#"
                SELECT pt.uid AS uid, pt.uid AS paragraph_uid, pt.section_uid, pt.sermon_uid,
                       pt.text, bm25(paragraphs_fts) AS rank,
                       sec.number AS section_number, ser.title AS sermon_title,
                       ser.date AS sermon_date
                FROM paragraphs_fts
                JOIN paragraphs_text pt ON pt.id = paragraphs_fts.rowid
                LEFT JOIN sections sec ON sec.uid = pt.section_uid
                LEFT JOIN sermons ser ON ser.uid = pt.sermon_uid
                WHERE paragraphs_fts MATCH ?1 AND (?2 IS NULL OR pt.sermon_uid = ?2)
                ORDER BY bm25(paragraphs_fts) ASC, pt.id ASC
                LIMIT ?3 OFFSET ?4
                "#
            }
            Target::Blocks => {
                r#"
                SELECT b.uid AS uid, b.paragraph_uid, b.section_uid, b.sermon_uid,
                       b.text, bm25(blocks_fts) AS rank,
                       sec.number AS section_number, ser.title AS sermon_title,
                       ser.date AS sermon_date
                FROM blocks_fts
                JOIN blocks b ON b.id = blocks_fts.rowid
                LEFT JOIN sections sec ON sec.uid = b.section_uid
                LEFT JOIN sermons ser ON ser.uid = b.sermon_uid
                WHERE blocks_fts MATCH ?1 AND (?2 IS NULL OR b.sermon_uid = ?2)
                ORDER BY bm25(blocks_fts) ASC, b.id ASC
                LIMIT ?3 OFFSET ?4
                "#
            }
            Target::Windows => {
                r#"
                SELECT w.uid AS uid, json_extract(w.paragraph_uids, '$[0]') AS paragraph_uid,
                       w.section_uid, w.sermon_uid, w.text,
                       bm25(paragraph_windows_fts) AS rank,
                       sec.number AS section_number, ser.title AS sermon_title,
                       ser.date AS sermon_date
                FROM paragraph_windows_fts
                JOIN paragraph_windows w ON w.id = paragraph_windows_fts.rowid
                LEFT JOIN sections sec ON sec.uid = w.section_uid
                LEFT JOIN sermons ser ON ser.uid = w.sermon_uid
                WHERE paragraph_windows_fts MATCH ?1 AND (?2 IS NULL OR w.sermon_uid = ?2)
                ORDER BY bm25(paragraph_windows_fts) ASC, w.id ASC
                LIMIT ?3 OFFSET ?4
                "#
            }
        }
    }

    fn count_sql(self) -> &'static str {
        match self {
            Target::Paragraphs => {
                r#"
                SELECT COUNT(*) FROM paragraphs_fts
                JOIN paragraphs_text pt ON pt.id = paragraphs_fts.rowid
                WHERE paragraphs_fts MATCH ?1 AND (?2 IS NULL OR pt.sermon_uid = ?2)
                "#
            }
            Target::Blocks => {
                r#"
                SELECT COUNT(*) FROM blocks_fts
                JOIN blocks b ON b.id = blocks_fts.rowid
                WHERE blocks_fts MATCH ?1 AND (?2 IS NULL OR b.sermon_uid = ?2)
                "#
            }
            Target::Windows => {
                r#"
                SELECT COUNT(*) FROM paragraph_windows_fts
                JOIN paragraph_windows w ON w.id = paragraph_windows_fts.rowid
                WHERE paragraph_windows_fts MATCH ?1 AND (?2 IS NULL OR w.sermon_uid = ?2)
                "#
            }
        }
    }
}

/// One ranked lexical match
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct LexicalHit {
    /// Paragraph, block or window uid depending on the target
    pub uid: String,
    pub paragraph_uid: String,
    pub section_uid: String,
    pub sermon_uid: String,
    pub text: String,
    /// bm25 cost; lower is better
    pub rank: f64,
    pub section_number: Option<String>,
    pub sermon_title: Option<String>,
    pub sermon_date: Option<String>,
}

/// Ranked queries over the FTS5 indexes
#[derive(Clone)]
pub struct LexicalIndex {
    store: Arc<CorpusStore>,
}

impl LexicalIndex {
    pub fn new(store: Arc<CorpusStore>) -> Self {
        Self { store }
    }

    /// Ranked matches, ascending bm25 with ties broken by insertion order
    pub async fn search(
        &self,
        target: Target,
        query: &LexicalQuery,
        limit: Limit,
        sermon_uid: Option<&str>,
    ) -> Result<Vec<LexicalHit>> {
        let expr = query.to_match_expr();
        let (n, offset) = limit.sql_bounds();
        debug!(?target, expr = %expr, n, offset, "Lexical search");

        sqlx::query_as::<_, LexicalHit>(target.select_sql())
            .bind(&expr)
            .bind(sermon_uid)
            .bind(n)
            .bind(offset)
            .fetch_all(self.store.pool())
            .await
            .map_err(|e| Error::from(e).into_query_error())
    }

    /// Total matches, for pagination
    pub async fn count(
        &self,
        target: Target,
        query: &LexicalQuery,
        sermon_uid: Option<&str>,
    ) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(target.count_sql())
            .bind(query.to_match_expr())
            .bind(sermon_uid)
            .fetch_one(self.store.pool())
            .await
            .map_err(|e| Error::from(e).into_query_error())?;
        Ok(count.max(0) as usize)
    }

    pub async fn search_paragraphs(
        &self,
        query: &LexicalQuery,
        limit: Limit,
        sermon_uid: Option<&str>,
    ) -> Result<Vec<LexicalHit>> {
        self.search(Target::Paragraphs, query, limit, sermon_uid).await
    }

    pub async fn search_blocks(
        &self,
        query: &LexicalQuery,
        limit: Limit,
        sermon_uid: Option<&str>,
    ) -> Result<Vec<LexicalHit>> {
        self.search(Target::Blocks, query, limit, sermon_uid).await
    }

    pub async fn search_windows(
        &self,
        query: &LexicalQuery,
        limit: Limit,
        sermon_uid: Option<&str>,
    ) -> Result<Vec<LexicalHit>> {
        self.search(Target::Windows, query, limit, sermon_uid).await
    }

    /// Re-derive the paragraph projection and both text indexes from `blocks`
    pub async fn rebuild(&self) -> Result<usize> {
        let mut tx = self.store.pool().begin().await?;

        sqlx::query("DELETE FROM paragraphs_text")
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO paragraphs_text (uid, section_uid, sermon_uid, order_index, text)
            SELECT p.uid, p.section_uid, p.sermon_uid, p.order_index,
                   (SELECT group_concat(t.text, ' ') FROM
                       (SELECT b.text FROM blocks b WHERE b.paragraph_uid = p.uid
                        ORDER BY b.order_index, b.id) t)
            FROM paragraphs p
            WHERE EXISTS (SELECT 1 FROM blocks b WHERE b.paragraph_uid = p.uid)
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        for index in ["blocks_fts", "paragraphs_fts"] {
            sqlx::query(&format!("INSERT INTO {0}({0}) VALUES ('rebuild')", index))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!("Rebuilt paragraph text for {} paragraphs", inserted);
        Ok(inserted as usize)
    }
}
