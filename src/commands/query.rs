//! Search command implementation

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::embed::create_embedder;
use crate::error::Result;
use crate::rank::Tier;
use crate::rate_limit::ProviderRateLimiter;
use crate::search::{SearchEngine, SearchPage, SearchRequest};
use crate::store::{QdrantStore, VectorIndex};
use std::sync::Arc;

const PREVIEW_CHARS: usize = 200;

/// Run one search. Semantic modes connect to the embedding provider and Qdrant.
pub async fn cmd_search(
    config: &Config,
    store: &Arc<CorpusStore>,
    request: &SearchRequest,
) -> Result<SearchPage> {
    let mut engine = SearchEngine::new(Arc::clone(store), config.search.clone());

    if request.mode.uses_semantic() {
        let limiter = ProviderRateLimiter::new(config.embedding.requests_per_second);
        let embedder = create_embedder(&config.embedding, limiter)?;
        let index: Arc<dyn VectorIndex> = Arc::new(QdrantStore::connect(
            &config.qdrant,
            config.embedding.dimension,
        )?);
        engine = engine.with_semantic(embedder, index);
    }

    engine.search(request).await
}

fn preview(text: &str) -> String {
    let flat = text.trim().replace('\n', " ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", flat[..cut].trim_end()),
        None => flat,
    }
}

pub fn print_search_page(query: &str, page: &SearchPage) {
    let pagination = &page.pagination;
    println!("\n🔍 Query: {}\n", query);
    println!(
        "Page {} ({} per page), {} results total:\n",
        pagination.page, pagination.page_size, pagination.total
    );

    let first = (pagination.page - 1) * pagination.page_size;
    for (i, row) in page.data.iter().enumerate() {
        let score = match (row.tier, row.rank, row.distance) {
            (Tier::Lexical, Some(rank), _) => format!("bm25: {:.3}", rank),
            (Tier::Semantic, _, Some(distance)) => format!("similarity: {:.3}", distance),
            _ => String::new(),
        };
        println!("{}. [{}] {}", first + i + 1, score, row.uid);

        let mut origin = row.sermon_uid.clone();
        if let Some(title) = &row.sermon_title {
            origin.push_str(&format!(" {}", title));
        }
        if let Some(date) = &row.sermon_date {
            origin.push_str(&format!(" ({})", date));
        }
        if let Some(number) = &row.section_number {
            origin.push_str(&format!(", section {}", number));
        }
        println!("   {}", origin);
        println!("   {}\n", preview(&row.text));
    }

    if page.data.is_empty() {
        println!("No results.");
    }
    if page.semantic_skipped {
        println!("⚠ No semantic index yet; showing lexical matches only (run 'lectern embed' and 'lectern sync')");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::{seed_faith_sermon, setup_test_store};
    use crate::error::Error;
    use crate::search::SearchMode;

    #[tokio::test]
    async fn test_lexical_search_needs_no_services() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);
        let mut config = Config::default();
        // Nothing listens here; lexical modes must not connect
        config.qdrant.url = "http://127.0.0.1:9".to_string();

        let request = SearchRequest::new("faith", SearchMode::General);
        let page = cmd_search(&config, &store, &request).await.unwrap();
        assert_eq!(page.pagination.total, 2);
        assert!(page.data.iter().all(|r| r.tier == Tier::Lexical));
    }

    #[tokio::test]
    async fn test_similar_search_without_embeddings() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);
        let config = Config::default();

        let request = SearchRequest::new("faith", SearchMode::Similar);
        let err = cmd_search(&config, &store, &request).await.unwrap_err();
        assert!(matches!(err, Error::NoSemanticIndex));
    }

    #[test]
    fn test_preview_is_char_safe() {
        let long = "é".repeat(300);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short\nline"), "short line");
    }
}
