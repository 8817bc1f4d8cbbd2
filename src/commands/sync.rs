//! Vector index sync and prune commands

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::error::{Error, Result};
use crate::progress::{finish_progress, start_progress_bar};
use crate::store::{
    prune_stale, sync_embeddings, PruneOptions, PruneStats, QdrantStore, SyncStats, VectorIndex,
};
use regex::Regex;

/// Upload embedded blocks missing from Qdrant. Run one instance at a time.
pub async fn cmd_sync(
    config: &Config,
    store: &CorpusStore,
    show_progress: bool,
) -> Result<SyncStats> {
    let index = QdrantStore::connect(&config.qdrant, config.embedding.dimension)?;
    sync_with(config, store, &index, show_progress).await
}

async fn sync_with(
    config: &Config,
    store: &CorpusStore,
    index: &dyn VectorIndex,
    show_progress: bool,
) -> Result<SyncStats> {
    let progress = show_progress.then(|| start_progress_bar(0, "Uploading vectors"));
    let stats = sync_embeddings(
        store,
        index,
        config.qdrant.check_batch_size,
        config.qdrant.insert_batch_size,
        progress.as_ref(),
    )
    .await?;
    if let Some(pb) = &progress {
        finish_progress(pb, "Vectors uploaded");
    }
    Ok(stats)
}

/// Remove retired (and optionally orphaned) entries from Qdrant
pub async fn cmd_prune(
    config: &Config,
    store: &CorpusStore,
    dry_run: bool,
    include_orphans: bool,
) -> Result<PruneStats> {
    let index = QdrantStore::connect(&config.qdrant, config.embedding.dimension)?;
    let options = prune_options(config, dry_run, include_orphans)?;
    prune_stale(store, &index, &options).await
}

fn prune_options(config: &Config, dry_run: bool, include_orphans: bool) -> Result<PruneOptions> {
    let stale_pattern = Regex::new(&config.qdrant.stale_uid_pattern).map_err(|e| {
        Error::Config(format!(
            "qdrant.stale_uid_pattern is not a valid regex: {}",
            e
        ))
    })?;
    Ok(PruneOptions {
        stale_pattern,
        include_orphans,
        batch_size: config.qdrant.insert_batch_size,
        dry_run,
    })
}

pub fn print_sync_stats(stats: &SyncStats) {
    println!("\n✓ Sync complete");
    println!("  Embedded locally: {}", stats.local);
    println!("  Already in index: {}", stats.present);
    println!("  Uploaded: {}", stats.inserted);
    if stats.refreshed > 0 {
        println!("  Refreshed after text changes: {}", stats.refreshed);
    }
}

pub fn print_prune_stats(stats: &PruneStats) {
    if stats.dry_run {
        println!("\n🔍 Dry run - nothing was deleted");
    } else {
        println!("\n✓ Prune complete");
    }
    println!("  Entries scanned: {}", stats.scanned);
    println!("  Retired entries: {}", stats.stale);
    println!("  Orphaned entries: {}", stats.orphans);
    if !stats.dry_run {
        println!("  Deleted: {}", stats.deleted);
    }
}
