//! Sermon reconstruction and listing commands

use crate::corpus::{CorpusStore, Orphan, Sermon, SermonFilter, SermonSummary};
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct SermonReport {
    pub sermon: Arc<Sermon>,
    /// Filled only when an integrity check was requested
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphans: Vec<Orphan>,
}

/// Rebuild one sermon, optionally listing rows that could not be placed
pub async fn cmd_sermon(store: &CorpusStore, uid: &str, check: bool) -> Result<Option<SermonReport>> {
    let Some(sermon) = store.get_sermon(uid).await? else {
        return Ok(None);
    };
    let orphans = if check {
        store.find_orphans(uid).await?
    } else {
        Vec::new()
    };
    Ok(Some(SermonReport { sermon, orphans }))
}

pub async fn cmd_sermons(store: &CorpusStore, filter: &SermonFilter) -> Result<Vec<SermonSummary>> {
    store.list_sermons(filter).await
}

pub fn print_sermon_report(report: &SermonReport) {
    let sermon = &report.sermon;
    match &sermon.date {
        Some(date) => println!("{} {} ({})", sermon.uid, sermon.title, date),
        None => println!("{} {}", sermon.uid, sermon.title),
    }

    for (section_uid, section) in sermon.sections_in_order() {
        let label = section.number.as_deref().unwrap_or(section_uid.as_str());
        println!("\n§ {}", label);
        for (paragraph_uid, paragraph) in section.paragraphs_in_order() {
            let text = paragraph
                .blocks
                .iter()
                .map(|b| b.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            println!("  [{}] {}", paragraph_uid, text);
        }
    }

    if !report.orphans.is_empty() {
        println!("\n⚠ {} rows could not be placed:", report.orphans.len());
        for orphan in &report.orphans {
            println!(
                "  {} {} (parent {}): {}",
                orphan.kind, orphan.uid, orphan.parent_uid, orphan.detail
            );
        }
    }
}

pub fn print_sermon_list(sermons: &[SermonSummary]) {
    if sermons.is_empty() {
        println!("No sermons found.");
        return;
    }

    println!(
        "{:<12} {:<40} {:<12} {:>8} {:>10} {:>8}",
        "UID", "TITLE", "DATE", "SECTIONS", "PARAGRAPHS", "BLOCKS"
    );
    println!("{}", "-".repeat(95));
    for sermon in sermons {
        let title: String = sermon.title.chars().take(38).collect();
        println!(
            "{:<12} {:<40} {:<12} {:>8} {:>10} {:>8}",
            sermon.uid,
            title,
            sermon.date.as_deref().unwrap_or("-"),
            sermon.section_count,
            sermon.paragraph_count,
            sermon.block_count
        );
    }
    println!("\n{} sermons", sermons.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::{seed_faith_sermon, setup_test_store};

    #[tokio::test]
    async fn test_sermon_report_with_check() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        let clean = cmd_sermon(&store, "47-0412", true).await.unwrap().unwrap();
        assert!(clean.orphans.is_empty());
        assert_eq!(clean.sermon.paragraph_count(), 3);

        sqlx::query(
            "INSERT INTO blocks (uid, paragraph_uid, section_uid, sermon_uid, text, order_index) \
             VALUES ('ghost', 'p-missing', 's1', '47-0412', 'lost words', 0)",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let unchecked = cmd_sermon(&store, "47-0412", false).await.unwrap().unwrap();
        assert!(unchecked.orphans.is_empty());
        let checked = cmd_sermon(&store, "47-0412", true).await.unwrap().unwrap();
        assert_eq!(checked.orphans.len(), 1);
        assert_eq!(checked.orphans[0].uid, "ghost");

        let json = serde_json::to_value(&checked).unwrap();
        assert_eq!(json["sermon"]["orderedSectionIds"][0], "s1");
        assert_eq!(json["orphans"][0]["kind"], "block");
    }

    #[tokio::test]
    async fn test_unknown_sermon_is_none() {
        let (store, _tmp) = setup_test_store().await;
        assert!(cmd_sermon(&store, "65-1127", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sermons_by_title() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;

        let filter = SermonFilter {
            title: Some("FAITH".to_string()),
            year: None,
        };
        let sermons = cmd_sermons(&store, &filter).await.unwrap();
        assert_eq!(sermons.len(), 1);
        assert_eq!(sermons[0].block_count, 4);
    }
}
