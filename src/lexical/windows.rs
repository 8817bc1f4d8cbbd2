//! Paragraph windows
//!
//! Two and three consecutive paragraphs of the same section indexed as one
//! document, so terms that straddle a paragraph boundary still match.

use crate::corpus::CorpusStore;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub const WINDOW_SIZES: &[usize] = &[2, 3];

/// A paragraph as input to window planning
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WindowSource {
    pub uid: String,
    pub section_uid: String,
    pub sermon_uid: String,
    pub order_index: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedWindow {
    pub uid: String,
    pub paragraph_uids: Vec<String>,
    pub section_uid: String,
    pub sermon_uid: String,
    pub window_size: usize,
    pub start_order_index: i64,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub paragraphs: usize,
    pub windows: usize,
}

/// Plan every window over `paragraphs`.
///
/// Input must be ordered by (sermon_uid, section_uid, order_index). A window
/// is emitted only when all of its paragraphs share the start paragraph's
/// section and sermon.
pub fn plan_windows(paragraphs: &[WindowSource], sizes: &[usize]) -> Vec<PlannedWindow> {
    let mut windows = Vec::new();

    for (start, first) in paragraphs.iter().enumerate() {
        for &size in sizes {
            let Some(slice) = paragraphs.get(start..start + size) else {
                continue;
            };
            let same_section = slice
                .iter()
                .all(|p| p.section_uid == first.section_uid && p.sermon_uid == first.sermon_uid);
            if !same_section {
                continue;
            }

            windows.push(PlannedWindow {
                uid: format!("{}_w{}", first.uid, size),
                paragraph_uids: slice.iter().map(|p| p.uid.clone()).collect(),
                section_uid: first.section_uid.clone(),
                sermon_uid: first.sermon_uid.clone(),
                window_size: size,
                start_order_index: first.order_index,
                text: slice
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            });
        }
    }

    windows
}

/// Owner of the `paragraph_windows` table
#[derive(Clone)]
pub struct WindowIndex {
    store: Arc<CorpusStore>,
}

impl WindowIndex {
    pub fn new(store: Arc<CorpusStore>) -> Self {
        Self { store }
    }

    /// Replace every window in one transaction
    pub async fn rebuild(&self) -> Result<WindowStats> {
        let paragraphs = sqlx::query_as::<_, WindowSource>(
            r#"
            SELECT p.uid, p.section_uid, p.sermon_uid, p.order_index,
                   COALESCE(pt.text, '') AS text
            FROM paragraphs p
            LEFT JOIN paragraphs_text pt ON pt.uid = p.uid
            ORDER BY p.sermon_uid, p.section_uid, p.order_index, p.uid
            "#,
        )
        .fetch_all(self.store.pool())
        .await?;

        let planned = plan_windows(&paragraphs, WINDOW_SIZES);

        let mut tx = self.store.pool().begin().await?;
        sqlx::query("DELETE FROM paragraph_windows")
            .execute(&mut *tx)
            .await?;

        for window in &planned {
            sqlx::query(
                r#"
                INSERT INTO paragraph_windows
                    (uid, paragraph_uids, section_uid, sermon_uid, window_size, start_order_index, text)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&window.uid)
            .bind(serde_json::to_string(&window.paragraph_uids)?)
            .bind(&window.section_uid)
            .bind(&window.sermon_uid)
            .bind(window.window_size as i64)
            .bind(window.start_order_index)
            .bind(&window.text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            "Rebuilt {} windows over {} paragraphs",
            planned.len(),
            paragraphs.len()
        );
        Ok(WindowStats {
            paragraphs: paragraphs.len(),
            windows: planned.len(),
        })
    }

    /// Uids of the paragraphs a window covers
    pub async fn paragraph_uids(&self, window_uid: &str) -> Result<Option<Vec<String>>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT paragraph_uids FROM paragraph_windows WHERE uid = ?")
                .bind(window_uid)
                .fetch_optional(self.store.pool())
                .await?;
        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    /// Member paragraphs for many windows at once; unknown uids are absent
    pub async fn members(&self, window_uids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        if window_uids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT uid, paragraph_uids FROM paragraph_windows \
             WHERE uid IN (SELECT value FROM json_each(?))",
        )
        .bind(serde_json::to_string(window_uids)?)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter()
            .map(|(uid, json)| Ok((uid, serde_json::from_str(&json)?)))
            .collect()
    }
}
