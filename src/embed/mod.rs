//! Embedding generation
//!
//! This module provides:
//! - The [`Embedder`] trait and an HTTP implementation for OpenAI-compatible APIs
//! - The resumable block embedding job ([`EmbeddingPipeline`])
//! - Vector helpers shared by re-ranking and the in-memory index

mod http_backend;
mod pipeline;

pub use http_backend::*;
pub use pipeline::*;

use crate::config::EmbeddingConfig;
use crate::error::Result;
use crate::rate_limit::ProviderRateLimiter;
use async_trait::async_trait;
use std::sync::Arc;

pub fn normalize_embedding(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Cosine similarity in [-1, 1]; 0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; output order matches input order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(
    config: &EmbeddingConfig,
    limiter: ProviderRateLimiter,
) -> Result<Arc<dyn Embedder>> {
    let embedder = HttpEmbedder::new(config, limiter)?;
    Ok(Arc::new(embedder))
}

/// Embed a single query string
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(vec![text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| crate::error::Error::Embedding("provider returned no vector".to_string()))
}
