//! Resumable block embedding job
//!
//! Work is every non-blank block without an embedding that the progress
//! ledger has not seen. Batches run through a [`WorkerPool`]; each block's
//! vector and ledger entry are written together, so an interrupted run
//! loses at most the batches that were in flight.

use super::Embedder;
use crate::corpus::{CorpusStore, PendingBlock};
use crate::error::{Error, Result};
use crate::pool::WorkerPool;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Statistics from an embedding run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbedStats {
    pub pending: usize,
    pub batches: usize,
    pub embedded: usize,
    /// Blocks deleted between planning and writing
    pub vanished: usize,
    pub failed_batches: usize,
    pub skipped_batches: usize,
    pub total_embedded: i64,
    pub total_embeddable: i64,
    pub ledger_cleared: bool,
}

pub struct EmbeddingPipeline {
    store: Arc<CorpusStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    pool: WorkerPool,
}

struct BatchOutcome {
    embedded: usize,
    vanished: usize,
}

impl EmbeddingPipeline {
    pub fn new(
        store: Arc<CorpusStore>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
            pool: WorkerPool::new(concurrency),
        }
    }

    /// Embed all pending blocks. A fatal provider or storage error is
    /// returned once in-flight batches have finished.
    pub async fn run(&self, progress: Option<&ProgressBar>) -> Result<EmbedStats> {
        if self.embedder.dimension() != self.store.dimension() {
            return Err(Error::Config(format!(
                "embedder produces {} dimensions but the store expects {}",
                self.embedder.dimension(),
                self.store.dimension()
            )));
        }

        let pending = self.store.pending_embedding_work().await?;
        let batches: Vec<Vec<PendingBlock>> = pending
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let mut stats = EmbedStats {
            pending: pending.len(),
            batches: batches.len(),
            ..EmbedStats::default()
        };
        drop(pending);

        if let Some(pb) = progress {
            pb.set_length(stats.pending as u64);
        }
        info!(
            pending = stats.pending,
            batches = stats.batches,
            workers = self.pool.workers(),
            model = self.embedder.model_name(),
            "Starting embedding run"
        );

        let report = self
            .pool
            .run(batches, |batch| self.embed_batch(batch, progress))
            .await;

        for outcome in &report.completed {
            stats.embedded += outcome.embedded;
            stats.vanished += outcome.vanished;
        }
        stats.failed_batches = report.failed.len();
        stats.skipped_batches = report.skipped;
        for err in &report.failed {
            warn!(error = %err, "Batch left for the next run");
        }

        stats.total_embedded = self.store.count_embedded().await?;
        stats.total_embeddable = self.store.count_embeddable().await?;

        if let Some(fatal) = report.fatal {
            warn!(
                embedded = stats.embedded,
                skipped_batches = stats.skipped_batches,
                "Embedding run aborted"
            );
            return Err(fatal);
        }

        if stats.total_embedded >= stats.total_embeddable {
            let cleared = self.store.clear_progress().await?;
            stats.ledger_cleared = true;
            info!(entries = cleared, "All blocks embedded, progress ledger cleared");
        }

        info!(
            embedded = stats.embedded,
            failed_batches = stats.failed_batches,
            total_embedded = stats.total_embedded,
            total_embeddable = stats.total_embeddable,
            "Embedding run finished"
        );
        Ok(stats)
    }

    async fn embed_batch(
        &self,
        batch: Vec<PendingBlock>,
        progress: Option<&ProgressBar>,
    ) -> Result<BatchOutcome> {
        let texts: Vec<String> = batch.iter().map(|b| b.text.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "provider returned {} vectors for a batch of {}",
                vectors.len(),
                batch.len()
            )));
        }

        let mut outcome = BatchOutcome {
            embedded: 0,
            vanished: 0,
        };
        for (block, vector) in batch.iter().zip(vectors) {
            if self.store.store_embedding(&block.uid, &vector).await? {
                outcome.embedded += 1;
            } else {
                outcome.vanished += 1;
            }
        }

        if let Some(pb) = progress {
            pb.inc(batch.len() as u64);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::{seed_faith_sermon, setup_test_store};
    use crate::embed::tests::FakeEmbedder;

    #[tokio::test]
    async fn test_run_embeds_everything_and_clears_ledger() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);
        let embedder = Arc::new(FakeEmbedder::new());

        let pipeline = EmbeddingPipeline::new(Arc::clone(&store), embedder.clone(), 2, 2);
        let stats = pipeline.run(None).await.unwrap();

        assert_eq!(stats.pending, 4);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.embedded, 4);
        assert_eq!(stats.total_embedded, 4);
        assert!(stats.ledger_cleared);
        assert_eq!(store.corpus_stats().await.unwrap().ledger_entries, 0);

        // Nothing left to do
        let again = pipeline.run(None).await.unwrap();
        assert_eq!(again.pending, 0);
        assert_eq!(embedder.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_restart_after_fatal_error_embeds_each_block_once() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);

        let broken = Arc::new(FakeEmbedder::failing_on("Then God will answer.", || {
            Error::Embedding("HTTP 400".into())
        }));
        let first = EmbeddingPipeline::new(Arc::clone(&store), broken.clone(), 1, 1);
        assert!(matches!(first.run(None).await, Err(Error::Embedding(_))));
        let embedded_before = store.count_embedded().await.unwrap();
        assert!(embedded_before < 4);
        assert!(store.corpus_stats().await.unwrap().ledger_entries > 0);

        let healthy = Arc::new(FakeEmbedder::new());
        let second = EmbeddingPipeline::new(Arc::clone(&store), healthy.clone(), 1, 1);
        let stats = second.run(None).await.unwrap();
        assert!(stats.ledger_cleared);

        let mut all_calls = broken.calls();
        all_calls.extend(healthy.calls());
        let mut deduped = all_calls.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(all_calls.len(), 4);
        assert_eq!(deduped.len(), 4);
    }

    #[tokio::test]
    async fn test_ledgered_blocks_are_not_resent() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        sqlx::query(
            "INSERT INTO embedding_progress (entity_uid, processed_at) VALUES ('p3-b1', 'now')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        let store = Arc::new(store);
        let embedder = Arc::new(FakeEmbedder::new());

        let stats = EmbeddingPipeline::new(Arc::clone(&store), embedder.clone(), 10, 4)
            .run(None)
            .await
            .unwrap();

        assert_eq!(stats.pending, 3);
        assert!(!embedder
            .calls()
            .contains(&"The healing came through faith alone.".to_string()));
        // p3-b1 still lacks an embedding, so the ledger stays
        assert!(!stats.ledger_cleared);
    }

    #[tokio::test]
    async fn test_exhausted_batches_stay_eligible() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);
        let flaky = Arc::new(FakeEmbedder::failing_on("Then God will answer.", || {
            Error::Transient("HTTP 503".into())
        }));

        let stats = EmbeddingPipeline::new(Arc::clone(&store), flaky, 1, 2)
            .run(None)
            .await
            .unwrap();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.embedded, 3);
        assert!(!stats.ledger_cleared);

        let pending = store.pending_embedding_work().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].uid, "p2-b1");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_refused_up_front() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = CorpusStore::open(&tmp.path().join("x.db"), 8).await.unwrap();
        store.init_schema().await.unwrap();

        let result = EmbeddingPipeline::new(Arc::new(store), Arc::new(FakeEmbedder::new()), 1, 1)
            .run(None)
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
