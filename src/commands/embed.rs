//! Embed command implementation

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::embed::{create_embedder, EmbedStats, EmbeddingPipeline};
use crate::error::Result;
use crate::progress::{finish_progress, start_progress_bar};
use crate::rate_limit::ProviderRateLimiter;
use std::sync::Arc;

/// Overrides for the configured batch size and concurrency
#[derive(Debug, Clone, Default)]
pub struct EmbedOptions {
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub show_progress: bool,
}

/// Embed every pending block. Run one instance at a time per database.
pub async fn cmd_embed(
    config: &Config,
    store: &Arc<CorpusStore>,
    options: EmbedOptions,
) -> Result<EmbedStats> {
    let limiter = ProviderRateLimiter::new(config.embedding.requests_per_second);
    let embedder = create_embedder(&config.embedding, limiter)?;

    let pipeline = EmbeddingPipeline::new(
        Arc::clone(store),
        embedder,
        options.batch_size.unwrap_or(config.embedding.batch_size),
        options.concurrency.unwrap_or(config.embedding.concurrency),
    );

    let progress = options
        .show_progress
        .then(|| start_progress_bar(0, "Embedding blocks"));
    let result = pipeline.run(progress.as_ref()).await;
    if let Some(pb) = &progress {
        finish_progress(pb, if result.is_ok() { "Embedding done" } else { "Embedding aborted" });
    }
    result
}

pub fn print_embed_stats(stats: &EmbedStats) {
    println!("\n✓ Embedding run finished");
    println!("  Pending at start: {}", stats.pending);
    println!("  Embedded: {}", stats.embedded);
    if stats.vanished > 0 {
        println!("  Deleted during run: {}", stats.vanished);
    }
    if stats.failed_batches > 0 {
        println!(
            "  Failed batches: {} (retried on the next run)",
            stats.failed_batches
        );
    }
    println!(
        "  Corpus: {}/{} blocks embedded",
        stats.total_embedded, stats.total_embeddable
    );
    if stats.ledger_cleared {
        println!("  Progress ledger cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::{seed_faith_sermon, setup_test_store, TEST_DIMENSION};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_embed_against_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3, 0.4]}]
            })))
            .expect(4)
            .mount(&server)
            .await;

        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);

        let mut config = Config::default();
        config.embedding.base_url = server.uri();
        config.embedding.api_key_env = "LECTERN_TEST_UNSET_KEY".to_string();
        config.embedding.dimension = TEST_DIMENSION;
        config.embedding.requests_per_second = 1000;

        let stats = cmd_embed(
            &config,
            &store,
            EmbedOptions {
                batch_size: Some(1),
                concurrency: Some(2),
                show_progress: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(stats.embedded, 4);
        assert!(stats.ledger_cleared);
        assert_eq!(store.count_embedded().await.unwrap(), 4);
    }
}
