//! Default values for configuration

/// Default OpenAI-compatible embedding endpoint
pub fn default_embedding_base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/".to_string())
}

/// Default environment variable holding the embedding API key
pub fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    std::env::var("OPENAI_EMBEDDING_MODEL")
        .unwrap_or_else(|_| "text-embedding-3-small".to_string())
}

/// Dimension of text-embedding-3-small
pub fn default_embedding_dimension() -> usize {
    1536
}

/// Blocks per provider request
pub fn default_embedding_batch_size() -> usize {
    100
}

/// Concurrent in-flight provider requests
pub fn default_embedding_concurrency() -> usize {
    16
}

/// Provider requests per second across all workers
pub fn default_embedding_requests_per_second() -> u32 {
    50
}

/// Provider request timeout in seconds
pub fn default_embedding_timeout() -> u64 {
    30
}

/// Attempts for transient failures (timeouts, 5xx)
pub fn default_embedding_max_retries() -> u32 {
    3
}

/// Attempts while the provider keeps answering 429
pub fn default_embedding_max_rate_limit_retries() -> u32 {
    8
}

/// Linear backoff step for transient failures (ms)
pub fn default_transient_backoff_ms() -> u64 {
    2_000
}

/// Linear backoff step for rate limiting (ms)
pub fn default_rate_limit_backoff_ms() -> u64 {
    30_000
}

/// Ceiling for rate limit backoff (ms)
pub fn default_rate_limit_backoff_max_ms() -> u64 {
    120_000
}

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

/// Default collection name
pub fn default_collection_name() -> String {
    "sermon_blocks".to_string()
}

/// Points per upsert request
pub fn default_insert_batch_size() -> usize {
    50
}

/// Ids per existence-check request
pub fn default_check_batch_size() -> usize {
    1_000
}

/// Attempts for remote index calls
pub fn default_qdrant_max_retries() -> u32 {
    3
}

/// Exponential backoff base (ms)
pub fn default_qdrant_backoff_base_ms() -> u64 {
    1_000
}

/// Exponential backoff ceiling (ms)
pub fn default_qdrant_backoff_max_ms() -> u64 {
    8_000
}

/// Block uids carrying the retired paragraph-level suffix
pub fn default_stale_uid_pattern() -> String {
    "-b0$".to_string()
}

/// Results per page
pub fn default_page_size() -> usize {
    20
}

/// Largest page a caller may request
pub fn default_max_page_size() -> usize {
    200
}

/// Nearest neighbours fetched before re-ranking
pub fn default_semantic_candidates() -> usize {
    500
}

/// Semantic hits kept after re-ranking
pub fn default_semantic_limit() -> usize {
    50
}

/// Minimum cosine similarity for a semantic hit
pub fn default_min_similarity() -> f32 {
    0.3
}

/// Lexical hits fed into hybrid fusion
pub fn default_lexical_candidates() -> usize {
    1_000
}

/// Weight of the local cosine score in blend mode
pub fn default_blend_weight() -> f32 {
    0.5
}
