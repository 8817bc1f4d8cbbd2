//! Ingest command implementation

use crate::corpus::{ingest_path, CorpusStore, IngestReport};
use crate::error::Result;
use crate::progress::{finish_progress, start_progress_bar};
use std::path::Path;
use std::sync::Arc;

/// Load every sermon document under `path` (a file or a directory)
pub async fn cmd_ingest(
    store: &Arc<CorpusStore>,
    path: &Path,
    force: bool,
    show_progress: bool,
) -> Result<IngestReport> {
    // Length is set once the documents are discovered
    let progress = show_progress.then(|| start_progress_bar(0, "Ingesting sermons"));

    let report = ingest_path(store, path, force, progress.as_ref()).await?;

    if let Some(pb) = &progress {
        finish_progress(pb, "Sermons ingested");
    }
    Ok(report)
}

pub fn print_ingest_report(report: &IngestReport) {
    let stats = &report.stats;
    println!("\n✓ Ingestion complete");
    println!("  Documents: {}", stats.files);
    println!("  Ingested: {}", stats.ingested);
    println!("  Unchanged: {}", stats.unchanged);
    println!("  Blocks written: {}", stats.blocks);
    if let Some(windows) = &report.windows {
        println!("  Paragraph windows: {}", windows.windows);
    }
    if !stats.errors.is_empty() {
        println!("\n⚠ {} documents failed:", stats.errors.len());
        for error in &stats.errors {
            println!("  {}", error);
        }
    }
}
