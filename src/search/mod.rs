//! Query entry point
//!
//! Combines the lexical index, the vector index and the ranker into one
//! paginated search API.
//!
//! ```ignore
//! let engine = SearchEngine::new(store, config.search.clone())
//!     .with_semantic(embedder, index);
//!
//! // Lexical only
//! let page = engine.search(&SearchRequest::new("have faith", SearchMode::Phrase)).await?;
//!
//! // Lexical tier first, semantic tier whenever it arrives
//! let request = SearchRequest::new("faith", SearchMode::Hybrid);
//! let exact = engine.lexical_tier(&request).await?;
//! let similar = engine.semantic_tier(&request).await?;
//! ```

use crate::config::SearchConfig;
use crate::corpus::CorpusStore;
use crate::embed::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::lexical::{LexicalIndex, LexicalQuery, Limit, Target, WindowIndex};
use crate::rank::{fuse, Ranker, Tier};
use crate::store::{QueryParams, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use crate::rank::ResultRow;

/// How the query text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Every word must match as a whole token
    #[default]
    General,
    /// Exact contiguous phrase
    Phrase,
    /// Any word may match
    Any,
    /// FTS5 boolean syntax
    Boolean,
    /// Nearest neighbours of the query embedding
    Similar,
    /// Lexical tier followed by semantic tier
    Hybrid,
}

impl SearchMode {
    /// The lexical interpretation for this mode; `None` for `Similar`
    pub fn lexical_query(self, input: &str) -> Result<Option<LexicalQuery>> {
        match self {
            SearchMode::General | SearchMode::Hybrid => LexicalQuery::all_terms(input).map(Some),
            SearchMode::Phrase => LexicalQuery::phrase(input).map(Some),
            SearchMode::Any => LexicalQuery::any_terms(input).map(Some),
            SearchMode::Boolean => LexicalQuery::raw(input).map(Some),
            SearchMode::Similar => Ok(None),
        }
    }

    pub fn uses_semantic(self) -> bool {
        matches!(self, SearchMode::Similar | SearchMode::Hybrid)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchMode::General => "general",
            SearchMode::Phrase => "phrase",
            SearchMode::Any => "any",
            SearchMode::Boolean => "boolean",
            SearchMode::Similar => "similar",
            SearchMode::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "general" => Ok(SearchMode::General),
            "phrase" => Ok(SearchMode::Phrase),
            "any" => Ok(SearchMode::Any),
            "boolean" => Ok(SearchMode::Boolean),
            "similar" | "semantic" => Ok(SearchMode::Similar),
            "hybrid" => Ok(SearchMode::Hybrid),
            _ => Err(Error::InvalidQuery(format!("Unknown search mode: {}", s))),
        }
    }
}

/// One search call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Page size; the configured default when unset
    pub limit: Option<usize>,
    pub mode: SearchMode,
    pub sermon_uid: Option<String>,
    /// 1-based
    pub page: usize,
    /// Search paragraph windows instead of single paragraphs
    pub near: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query: query.into(),
            limit: None,
            mode,
            sermon_uid: None,
            page: 1,
            near: false,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn sermon(mut self, sermon_uid: impl Into<String>) -> Self {
        self.sermon_uid = Some(sermon_uid.into());
        self
    }

    pub fn near(mut self, near: bool) -> Self {
        self.near = near;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
    pub total: usize,
}

/// One page of fused results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub data: Vec<ResultRow>,
    pub pagination: Pagination,
    /// Hybrid search ran without a semantic index; `data` is lexical only
    #[serde(
        rename = "semanticSkipped",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub semantic_skipped: bool,
}

/// Stateless per request; share it behind an `Arc`
pub struct SearchEngine {
    store: Arc<CorpusStore>,
    lexical: LexicalIndex,
    windows: WindowIndex,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn VectorIndex>>,
    ranker: Ranker,
    config: SearchConfig,
}

impl SearchEngine {
    /// Lexical search only; semantic modes report [`Error::NoSemanticIndex`]
    pub fn new(store: Arc<CorpusStore>, config: SearchConfig) -> Self {
        Self {
            lexical: LexicalIndex::new(Arc::clone(&store)),
            windows: WindowIndex::new(Arc::clone(&store)),
            store,
            embedder: None,
            index: None,
            ranker: Ranker::from_config(&config),
            config,
        }
    }

    pub fn with_semantic(mut self, embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    pub fn with_ranker(mut self, ranker: Ranker) -> Self {
        self.ranker = ranker;
        self
    }

    /// Run a search and return the requested page of the fused order
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let page_size = self.page_size(request)?;
        if request.page == 0 {
            return Err(Error::InvalidQuery("page numbers start at 1".to_string()));
        }
        let offset = (request.page - 1).saturating_mul(page_size);

        info!(
            mode = %request.mode,
            page = request.page,
            page_size,
            near = request.near,
            "Searching: {}",
            request.query
        );

        let mut semantic_skipped = false;
        let (data, total) = match request.mode {
            SearchMode::Similar => {
                let rows = self.semantic_tier(request).await?;
                let total = rows.len();
                (paginate(rows, offset, page_size), total)
            }
            SearchMode::Hybrid => {
                let lexical = self.lexical_tier(request).await?;
                let semantic = match self.semantic_tier(request).await {
                    Ok(rows) => rows,
                    Err(Error::NoSemanticIndex) => {
                        warn!("No semantic index available, returning lexical results only");
                        semantic_skipped = true;
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                };
                let members = if request.near {
                    let uids: Vec<String> = lexical.iter().map(|r| r.uid.clone()).collect();
                    self.windows.members(&uids).await?
                } else {
                    HashMap::new()
                };
                let fused = fuse(lexical, semantic, &members);
                let total = fused.len();
                (paginate(fused, offset, page_size), total)
            }
            _ => {
                let query = self.parse(request)?;
                let target = target_for(request);
                let sermon = request.sermon_uid.as_deref();
                let total = self.lexical.count(target, &query, sermon).await?;
                let hits = self
                    .lexical
                    .search(
                        target,
                        &query,
                        Limit::Top {
                            n: page_size,
                            offset,
                        },
                        sermon,
                    )
                    .await?;
                (hits.into_iter().map(ResultRow::from).collect(), total)
            }
        };

        debug!(returned = data.len(), total, "Search finished");
        Ok(SearchPage {
            data,
            pagination: Pagination {
                page: request.page,
                page_size,
                total,
            },
            semantic_skipped,
        })
    }

    /// Lexical candidates for fusion, best first (at most `lexical_candidates`)
    pub async fn lexical_tier(&self, request: &SearchRequest) -> Result<Vec<ResultRow>> {
        let query = self.parse(request)?;
        let hits = self
            .lexical
            .search(
                target_for(request),
                &query,
                Limit::Top {
                    n: self.config.lexical_candidates,
                    offset: 0,
                },
                request.sermon_uid.as_deref(),
            )
            .await?;
        Ok(hits.into_iter().map(ResultRow::from).collect())
    }

    /// Re-ranked semantic candidates, most similar first
    pub async fn semantic_tier(&self, request: &SearchRequest) -> Result<Vec<ResultRow>> {
        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            return Err(Error::NoSemanticIndex);
        };
        if request.query.trim().is_empty() {
            return Err(Error::InvalidQuery("query is empty".to_string()));
        }
        if self.store.count_embedded().await? == 0 || index.count().await? == 0 {
            return Err(Error::NoSemanticIndex);
        }

        let vector = embed_query(embedder.as_ref(), &request.query).await?;
        let params = QueryParams {
            top_k: self.config.semantic_candidates,
            ef: None,
            sermon_uid: request.sermon_uid.clone(),
        };
        let hits = index.query(&vector, &params).await?;
        debug!(candidates = hits.len(), "Vector index returned candidates");

        let stored: HashMap<String, Vec<f32>> = if self.ranker.strategy().needs_local_vectors() {
            let uids: Vec<String> = hits.iter().map(|h| h.block_uid.clone()).collect();
            self.store
                .get_embeddings(&uids)
                .await?
                .into_iter()
                .map(|e| (e.uid, e.vector))
                .collect()
        } else {
            HashMap::new()
        };

        let scored = self.ranker.rank(hits, &vector, &stored);
        let uids: Vec<String> = scored.iter().map(|h| h.block_uid.clone()).collect();
        let mut blocks: HashMap<String, _> = self
            .store
            .get_blocks_by_uids(&uids)
            .await?
            .into_iter()
            .map(|b| (b.uid.clone(), b))
            .collect();

        let mut rows = Vec::with_capacity(scored.len());
        for hit in scored {
            let Some(block) = blocks.remove(&hit.block_uid) else {
                debug!(block_uid = %hit.block_uid, "Index entry has no local block, skipping");
                continue;
            };
            rows.push(ResultRow {
                uid: block.uid.clone(),
                paragraph_uid: block.paragraph_uid,
                section_uid: block.section_uid,
                sermon_uid: block.sermon_uid,
                section_number: block.section_number,
                text: block.text,
                rank: None,
                distance: Some(hit.score),
                sermon_title: block.sermon_title,
                sermon_date: block.sermon_date,
                block_uid: Some(block.uid),
                tier: Tier::Semantic,
            });
        }
        Ok(rows)
    }

    fn parse(&self, request: &SearchRequest) -> Result<LexicalQuery> {
        request
            .mode
            .lexical_query(&request.query)?
            .ok_or_else(|| Error::InvalidQuery(format!("{} mode has no lexical form", request.mode)))
    }

    fn page_size(&self, request: &SearchRequest) -> Result<usize> {
        match request.limit {
            None => Ok(self.config.page_size),
            Some(0) => Err(Error::InvalidQuery("limit must be at least 1".to_string())),
            Some(n) => Ok(n.min(self.config.max_page_size)),
        }
    }
}

fn target_for(request: &SearchRequest) -> Target {
    if request.near {
        Target::Windows
    } else {
        Target::Paragraphs
    }
}

fn paginate(rows: Vec<ResultRow>, offset: usize, page_size: usize) -> Vec<ResultRow> {
    rows.into_iter().skip(offset).take(page_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::tests::{seed_faith_sermon, setup_test_store, TEST_DIMENSION};
    use crate::embed::tests::FakeEmbedder;
    use crate::lexical::tests::{faith_texts, seed_paragraphs};
    use crate::store::{sync_embeddings, MemoryIndex};

    async fn embed_faith_sermon(store: &CorpusStore) {
        for (uid, text) in [
            ("p1-b1", "You must have faith"),
            ("p1-b2", "in God tonight."),
            ("p2-b1", "Then God will answer."),
            ("p3-b1", "The healing came through faith alone."),
        ] {
            store
                .store_embedding(uid, &FakeEmbedder::vector_for(text))
                .await
                .unwrap();
        }
    }

    async fn semantic_engine() -> (SearchEngine, Arc<MemoryIndex>, tempfile::TempDir) {
        let (store, tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        embed_faith_sermon(&store).await;
        let index = Arc::new(MemoryIndex::new(TEST_DIMENSION));
        sync_embeddings(&store, index.as_ref(), 10, 10, None)
            .await
            .unwrap();

        let config = SearchConfig {
            min_similarity: 0.0,
            ..SearchConfig::default()
        };
        let engine = SearchEngine::new(Arc::new(store), config)
            .with_semantic(Arc::new(FakeEmbedder::new()), index.clone());
        (engine, index, tmp)
    }

    #[tokio::test]
    async fn test_general_pages_tile_without_overlap() {
        let (store, _tmp) = setup_test_store().await;
        seed_paragraphs(&store, "x", &faith_texts(45)).await;
        let engine = SearchEngine::new(Arc::new(store), SearchConfig::default());

        let request = SearchRequest::new("faith", SearchMode::General).limit(20);
        let first = engine.search(&request).await.unwrap();
        let second = engine.search(&request.clone().page(2)).await.unwrap();
        let third = engine.search(&request.clone().page(3)).await.unwrap();

        assert_eq!(first.pagination.total, 45);
        assert_eq!(first.data.len(), 20);
        assert_eq!(second.data.len(), 20);
        assert_eq!(third.data.len(), 5);

        let all = engine
            .lexical
            .search_paragraphs(&LexicalQuery::all_terms("faith").unwrap(), Limit::All, None)
            .await
            .unwrap();
        let expected: Vec<&str> = all.iter().take(40).map(|h| h.uid.as_str()).collect();
        let paged: Vec<&str> = first
            .data
            .iter()
            .chain(second.data.iter())
            .map(|r| r.uid.as_str())
            .collect();
        assert_eq!(paged, expected);
    }

    #[tokio::test]
    async fn test_phrase_mode_and_pagination_shape() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let engine = SearchEngine::new(Arc::new(store), SearchConfig::default());

        let page = engine
            .search(&SearchRequest::new("have faith", SearchMode::Phrase))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].uid, "p1");
        assert_eq!(page.data[0].tier, Tier::Lexical);

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pagination"]["pageSize"], 20);
        assert_eq!(json["pagination"]["total"], 1);
        assert!(json["data"][0].get("distance").is_none());
    }

    #[tokio::test]
    async fn test_invalid_boolean_query_is_rejected() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let engine = SearchEngine::new(Arc::new(store), SearchConfig::default());

        let err = engine
            .search(&SearchRequest::new("faith AND (grace", SearchMode::Boolean))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));

        let err = engine
            .search(&SearchRequest::new("faith", SearchMode::General).page(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_similar_without_embeddings_reports_no_index() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);

        let lexical_only = SearchEngine::new(Arc::clone(&store), SearchConfig::default());
        let err = lexical_only
            .search(&SearchRequest::new("faith", SearchMode::Similar))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSemanticIndex));

        let engine = SearchEngine::new(Arc::clone(&store), SearchConfig::default()).with_semantic(
            Arc::new(FakeEmbedder::new()),
            Arc::new(MemoryIndex::new(TEST_DIMENSION)),
        );
        // Similar has nothing to fall back on
        let err = engine
            .search(&SearchRequest::new("faith", SearchMode::Similar))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSemanticIndex));

        // Embedded locally but never synced
        embed_faith_sermon(&store).await;
        let err = engine
            .search(&SearchRequest::new("faith", SearchMode::Similar))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSemanticIndex));
    }

    #[tokio::test]
    async fn test_hybrid_without_semantic_index_keeps_lexical_rows() {
        let (store, _tmp) = setup_test_store().await;
        seed_faith_sermon(&store).await;
        let store = Arc::new(store);
        let request = SearchRequest::new("faith", SearchMode::Hybrid);

        let lexical_only = SearchEngine::new(Arc::clone(&store), SearchConfig::default());
        let page = lexical_only.search(&request).await.unwrap();
        assert!(page.semantic_skipped);
        assert_eq!(page.pagination.total, 2);
        assert!(page.data.iter().all(|r| r.tier == Tier::Lexical));

        // Semantic side wired up but the index is empty
        let engine = SearchEngine::new(Arc::clone(&store), SearchConfig::default()).with_semantic(
            Arc::new(FakeEmbedder::new()),
            Arc::new(MemoryIndex::new(TEST_DIMENSION)),
        );
        let page = engine.search(&request).await.unwrap();
        assert!(page.semantic_skipped);
        assert_eq!(page.pagination.total, 2);

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["semanticSkipped"], true);

        let general = engine
            .search(&SearchRequest::new("faith", SearchMode::General))
            .await
            .unwrap();
        assert!(!general.semantic_skipped);
        assert!(serde_json::to_value(&general).unwrap().get("semanticSkipped").is_none());
    }

    #[tokio::test]
    async fn test_similar_rows_carry_block_details() {
        let (engine, _index, _tmp) = semantic_engine().await;

        let page = engine
            .search(&SearchRequest::new("The healing came through faith alone.", SearchMode::Similar))
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 4);
        let top = &page.data[0];
        assert_eq!(top.uid, "p3-b1");
        assert_eq!(top.block_uid.as_deref(), Some("p3-b1"));
        assert_eq!(top.paragraph_uid, "p3");
        assert_eq!(top.sermon_title.as_deref(), Some("Faith"));
        assert!(top.rank.is_none());
        assert!(page
            .data
            .windows(2)
            .all(|w| w[0].distance >= w[1].distance));
    }

    #[tokio::test]
    async fn test_hybrid_lexical_tier_first_without_duplicates() {
        let (engine, _index, _tmp) = semantic_engine().await;

        let page = engine
            .search(&SearchRequest::new("faith", SearchMode::Hybrid))
            .await
            .unwrap();

        let tiers: Vec<Tier> = page.data.iter().map(|r| r.tier).collect();
        assert_eq!(tiers, vec![Tier::Lexical, Tier::Lexical, Tier::Semantic]);
        let mut lexical: Vec<&str> = page.data[..2].iter().map(|r| r.uid.as_str()).collect();
        lexical.sort();
        assert_eq!(lexical, vec!["p1", "p3"]);
        // p1 and p3 already matched lexically; only p2's block survives
        assert_eq!(page.data[2].uid, "p2-b1");
        assert_eq!(page.pagination.total, 3);

        let second = engine
            .search(&SearchRequest::new("faith", SearchMode::Hybrid).limit(2).page(2))
            .await
            .unwrap();
        assert_eq!(second.data.len(), 1);
        assert_eq!(second.data[0].uid, "p2-b1");
    }

    #[tokio::test]
    async fn test_hybrid_near_windows_cover_members() {
        let (engine, _index, _tmp) = semantic_engine().await;
        WindowIndex::new(Arc::clone(&engine.store))
            .rebuild()
            .await
            .unwrap();

        let page = engine
            .search(&SearchRequest::new("faith answer", SearchMode::Hybrid).near(true))
            .await
            .unwrap();
        assert_eq!(page.data[0].uid, "p1_w2");
        // The window covers p1 and p2, so only p3 remains for the semantic tier
        let semantic: Vec<&str> = page
            .data
            .iter()
            .filter(|r| r.tier == Tier::Semantic)
            .map(|r| r.paragraph_uid.as_str())
            .collect();
        assert_eq!(semantic, vec!["p3"]);
    }

    #[tokio::test]
    async fn test_lexical_tier_available_on_its_own() {
        let (engine, _index, _tmp) = semantic_engine().await;
        let request = SearchRequest::new("faith", SearchMode::Hybrid).sermon("47-0412");

        let exact = engine.lexical_tier(&request).await.unwrap();
        assert_eq!(exact.len(), 2);
        let similar = engine.semantic_tier(&request).await.unwrap();
        assert_eq!(similar.len(), 4);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Phrase".parse::<SearchMode>().unwrap(), SearchMode::Phrase);
        assert_eq!("semantic".parse::<SearchMode>().unwrap(), SearchMode::Similar);
        assert!("fuzzy".parse::<SearchMode>().is_err());
        assert_eq!(SearchMode::Hybrid.to_string(), "hybrid");
        assert!(SearchMode::Similar.lexical_query("faith").unwrap().is_none());
    }
}
