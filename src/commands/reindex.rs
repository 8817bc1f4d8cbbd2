//! Derived index rebuild commands

use crate::corpus::CorpusStore;
use crate::error::Result;
use crate::lexical::{LexicalIndex, WindowIndex, WindowStats};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Statistics from a text reindex
#[derive(Debug, Clone, Serialize)]
pub struct ReindexStats {
    pub paragraphs: usize,
    pub windows: WindowStats,
}

/// Rebuild the paragraph window table
pub async fn cmd_windows(store: &Arc<CorpusStore>) -> Result<WindowStats> {
    WindowIndex::new(Arc::clone(store)).rebuild().await
}

/// Re-derive paragraph text, both FTS indexes and the windows from `blocks`
pub async fn cmd_reindex_text(store: &Arc<CorpusStore>) -> Result<ReindexStats> {
    info!("Rebuilding lexical indexes");
    let paragraphs = LexicalIndex::new(Arc::clone(store)).rebuild().await?;
    let windows = cmd_windows(store).await?;
    store.clear_cache();
    Ok(ReindexStats {
        paragraphs,
        windows,
    })
}

pub fn print_window_stats(stats: &WindowStats) {
    println!("✓ Rebuilt {} windows over {} paragraphs", stats.windows, stats.paragraphs);
}

pub fn print_reindex_stats(stats: &ReindexStats) {
    println!("✓ Reindexed text for {} paragraphs", stats.paragraphs);
    print_window_stats(&stats.windows);
}
