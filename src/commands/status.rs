//! Status command implementation

use crate::config::Config;
use crate::corpus::{CorpusStats, CorpusStore};
use crate::error::Result;
use crate::store::{QdrantStore, VectorIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub qdrant_url: String,
    pub collection_name: String,
    pub embedding_model: String,
    pub qdrant_connected: bool,
    pub qdrant_points: u64,
    pub corpus: CorpusStats,
}

/// Get system status
pub async fn cmd_status(config: &Config, store: &CorpusStore) -> Result<StatusInfo> {
    let index = match QdrantStore::connect(&config.qdrant, config.embedding.dimension) {
        Ok(index) => Some(index),
        Err(e) => {
            debug!("Qdrant client error: {:?}", e);
            None
        }
    };
    status_with(
        config,
        store,
        index.as_ref().map(|i| i as &dyn VectorIndex),
    )
    .await
}

async fn status_with(
    config: &Config,
    store: &CorpusStore,
    index: Option<&dyn VectorIndex>,
) -> Result<StatusInfo> {
    info!("Getting status");

    let corpus = store.corpus_stats().await?;

    let (qdrant_connected, qdrant_points) = match index {
        Some(index) => match index.count().await {
            Ok(points) => (true, points),
            Err(e) => {
                debug!("Qdrant connection error: {:?}", e);
                (false, 0)
            }
        },
        None => (false, 0),
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        qdrant_url: config.qdrant.url.clone(),
        collection_name: config.qdrant.collection.clone(),
        embedding_model: config.embedding.model.clone(),
        qdrant_connected,
        qdrant_points,
        corpus,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    let corpus = &status.corpus;
    println!("\n📊 lectern Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("\nQdrant:");
    println!("  URL: {}", status.qdrant_url);
    println!("  Collection: {}", status.collection_name);
    let connection_status = if status.qdrant_connected {
        "✓ Connected"
    } else {
        "✗ Not connected"
    };
    println!("  Status: {}", connection_status);
    println!("  Points: {}", status.qdrant_points);
    println!("\nEmbedding Model: {}", status.embedding_model);
    println!("\nCorpus:");
    println!("  Sermons: {}", corpus.sermons);
    println!("  Sections: {}", corpus.sections);
    println!("  Paragraphs: {}", corpus.paragraphs);
    println!("  Blocks: {}", corpus.blocks);
    println!("  Paragraph windows: {}", corpus.windows);
    println!(
        "  Embedded: {}/{} blocks",
        corpus.embedded_blocks, corpus.embeddable_blocks
    );
    if corpus.ledger_entries > 0 && corpus.embedded_blocks < corpus.embeddable_blocks {
        println!("  ⚠ Embedding run in progress or interrupted ('lectern embed' resumes it)");
    }
    if status.qdrant_connected && (status.qdrant_points as i64) < corpus.embedded_blocks {
        println!("  ⚠ Index is behind the corpus (run 'lectern sync')");
    }
}
