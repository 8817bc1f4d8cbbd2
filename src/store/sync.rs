//! Keeping the vector index in step with the corpus
//!
//! Sync is existence-checked: the remote side is asked which local ids it
//! already holds and only the difference is uploaded, so repeated runs are
//! idempotent. Pruning removes retired entries by uid pattern and,
//! optionally, entries whose block is no longer embedded locally.

use super::{BlockPoint, VectorIndex};
use crate::corpus::CorpusStore;
use crate::error::Result;
use indicatif::ProgressBar;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Statistics from a sync run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Locally embedded blocks
    pub local: usize,
    /// Already present in the index
    pub present: usize,
    pub inserted: usize,
    /// Present entries re-uploaded because their block text changed
    pub refreshed: usize,
}

/// Upload every locally embedded block the index does not hold yet, plus
/// blocks re-embedded after a text change
pub async fn sync_embeddings(
    store: &CorpusStore,
    index: &dyn VectorIndex,
    check_batch_size: usize,
    insert_batch_size: usize,
    progress: Option<&ProgressBar>,
) -> Result<SyncStats> {
    index.ensure_collection().await?;

    let local = store.embedded_block_uids().await?;
    let mut stats = SyncStats {
        local: local.len(),
        ..SyncStats::default()
    };

    let resync = store.vector_resync_uids().await?;

    let mut missing = Vec::new();
    let mut outdated = HashSet::new();
    for chunk in local.chunks(check_batch_size.max(1)) {
        let present = index.existing_ids(chunk).await?;
        stats.present += present.len();
        for uid in chunk {
            if !present.contains(uid) {
                missing.push(uid.clone());
            } else if resync.contains(uid) {
                outdated.insert(uid.clone());
                missing.push(uid.clone());
            }
        }
    }
    debug!(
        local = stats.local,
        present = stats.present,
        missing = missing.len(),
        outdated = outdated.len(),
        "Existence check finished"
    );

    if let Some(pb) = progress {
        pb.set_length(missing.len() as u64);
    }

    for chunk in missing.chunks(insert_batch_size.max(1)) {
        let points: Vec<BlockPoint> = store
            .get_embeddings(chunk)
            .await?
            .into_iter()
            .map(BlockPoint::from)
            .collect();
        let uploaded: Vec<String> = points.iter().map(|p| p.payload.block_uid.clone()).collect();
        index.upsert(points).await?;
        for uid in &uploaded {
            if outdated.contains(uid) {
                stats.refreshed += 1;
            } else {
                stats.inserted += 1;
            }
        }
        // Marks on blocks the index never held are settled by the first upload too
        store.clear_vector_resync(&uploaded).await?;
        if let Some(pb) = progress {
            pb.inc(chunk.len() as u64);
        }
    }

    info!(
        local = stats.local,
        present = stats.present,
        inserted = stats.inserted,
        refreshed = stats.refreshed,
        "Sync finished"
    );
    Ok(stats)
}

/// What `prune_stale` should remove
#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Block uids matching this pattern are retired
    pub stale_pattern: Regex,
    /// Also remove entries whose block is no longer embedded locally
    pub include_orphans: bool,
    pub batch_size: usize,
    pub dry_run: bool,
}

/// Statistics from a prune run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneStats {
    pub scanned: usize,
    pub stale: usize,
    pub orphans: usize,
    pub deleted: usize,
    pub dry_run: bool,
}

/// Remove retired entries from the index
pub async fn prune_stale(
    store: &CorpusStore,
    index: &dyn VectorIndex,
    options: &PruneOptions,
) -> Result<PruneStats> {
    let entries = index.list_entries().await?;
    let mut stats = PruneStats {
        scanned: entries.len(),
        dry_run: options.dry_run,
        ..PruneStats::default()
    };

    let embedded: HashSet<String> = if options.include_orphans {
        store.embedded_block_uids().await?.into_iter().collect()
    } else {
        HashSet::new()
    };

    let mut doomed = Vec::new();
    for entry in entries {
        if options.stale_pattern.is_match(&entry.block_uid) {
            stats.stale += 1;
            doomed.push(entry.block_uid);
        } else if options.include_orphans && !embedded.contains(&entry.block_uid) {
            stats.orphans += 1;
            doomed.push(entry.block_uid);
        }
    }

    if options.dry_run {
        info!(
            stale = stats.stale,
            orphans = stats.orphans,
            "Dry run, nothing deleted"
        );
        return Ok(stats);
    }

    for chunk in doomed.chunks(options.batch_size.max(1)) {
        index.delete(chunk).await?;
        stats.deleted += chunk.len();
    }

    info!(
        scanned = stats.scanned,
        deleted = stats.deleted,
        "Prune finished"
    );
    Ok(stats)
}
