//! Configuration management for lectern
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Override for the corpus database location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Remote vector index configuration
    #[serde(default)]
    pub qdrant: QdrantConfig,

    /// Query configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer token
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Blocks per provider request
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Concurrent in-flight requests
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,

    /// Requests per second across all workers
    #[serde(default = "default_embedding_requests_per_second")]
    pub requests_per_second: u32,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retries after a transient failure
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,

    /// Retries while rate limited
    #[serde(default = "default_embedding_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    #[serde(default = "default_transient_backoff_ms")]
    pub transient_backoff_ms: u64,

    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    #[serde(default = "default_rate_limit_backoff_max_ms")]
    pub rate_limit_backoff_max_ms: u64,
}

/// Qdrant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub api_key_env: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection: String,

    /// Points per upsert request
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,

    /// Ids per existence-check request
    #[serde(default = "default_check_batch_size")]
    pub check_batch_size: usize,

    #[serde(default = "default_qdrant_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_qdrant_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_qdrant_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Regex matching block uids of retired entries
    #[serde(default = "default_stale_uid_pattern")]
    pub stale_uid_pattern: String,

    /// HNSW candidate list size; derived from top-k when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hnsw_ef: Option<u64>,
}

/// How semantic candidates are scored before fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankMode {
    /// Trust the similarity reported by the remote index
    RemoteDistance,
    /// Recompute exact cosine against locally stored embeddings
    LocalCosine,
    /// Weighted mix of local and remote scores
    Blend,
}

impl std::fmt::Display for RerankMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RerankMode::RemoteDistance => write!(f, "remote-distance"),
            RerankMode::LocalCosine => write!(f, "local-cosine"),
            RerankMode::Blend => write!(f, "blend"),
        }
    }
}

impl FromStr for RerankMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "remote-distance" | "remote" => Ok(RerankMode::RemoteDistance),
            "local-cosine" | "local" => Ok(RerankMode::LocalCosine),
            "blend" => Ok(RerankMode::Blend),
            _ => Err(Error::Config(format!("Unknown rerank mode: {}", s))),
        }
    }
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default results per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum results per page
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Nearest neighbours fetched from the vector index
    #[serde(default = "default_semantic_candidates")]
    pub semantic_candidates: usize,

    /// Semantic hits kept after re-ranking
    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,

    /// Minimum similarity score (0.0 - 1.0)
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Lexical hits fed into hybrid fusion
    #[serde(default = "default_lexical_candidates")]
    pub lexical_candidates: usize,

    /// Re-ranking strategy for semantic candidates
    #[serde(default = "default_rerank_mode")]
    pub rerank: RerankMode,

    /// Weight of the local score when `rerank = "blend"` (0.0 - 1.0)
    #[serde(default = "default_blend_weight")]
    pub blend_weight: f32,
}

fn default_rerank_mode() -> RerankMode {
    RerankMode::LocalCosine
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for lectern data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite corpus database
    pub db_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            embedding: EmbeddingConfig::default(),
            qdrant: QdrantConfig::default(),
            search: SearchConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_api_key_env(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            concurrency: default_embedding_concurrency(),
            requests_per_second: default_embedding_requests_per_second(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_max_retries(),
            max_rate_limit_retries: default_embedding_max_rate_limit_retries(),
            transient_backoff_ms: default_transient_backoff_ms(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            rate_limit_backoff_max_ms: default_rate_limit_backoff_max_ms(),
        }
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key_env: default_qdrant_api_key_env(),
            collection: default_collection_name(),
            insert_batch_size: default_insert_batch_size(),
            check_batch_size: default_check_batch_size(),
            max_retries: default_qdrant_max_retries(),
            backoff_base_ms: default_qdrant_backoff_base_ms(),
            backoff_max_ms: default_qdrant_backoff_max_ms(),
            stale_uid_pattern: default_stale_uid_pattern(),
            hnsw_ef: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            semantic_candidates: default_semantic_candidates(),
            semantic_limit: default_semantic_limit(),
            min_similarity: default_min_similarity(),
            lexical_candidates: default_lexical_candidates(),
            rerank: default_rerank_mode(),
            blend_weight: default_blend_weight(),
        }
    }
}

impl EmbeddingConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

impl QdrantConfig {
    /// Read the Qdrant API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

impl Config {
    /// Get the default base directory for lectern (~/.lectern)
    pub fn default_base_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("LECTERN_HOME") {
            return PathBuf::from(dir);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lectern")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: self.resolve_db_file(&base),
            base_dir: base,
        };
    }

    fn resolve_db_file(&self, base: &Path) -> PathBuf {
        if let Ok(path) = std::env::var("LECTERN_DB_PATH") {
            return PathBuf::from(path);
        }
        match &self.database_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base.join(path),
            None => base.join("corpus.db"),
        }
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: config.resolve_db_file(&base),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            let base = config.paths.base_dir.clone();
            loaded.init_paths(Some(base));
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if lectern is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 || self.embedding.concurrency == 0 {
            return Err(Error::Config(
                "embedding.batch_size and embedding.concurrency must be positive".to_string(),
            ));
        }

        if self.embedding.requests_per_second == 0 {
            return Err(Error::Config(
                "embedding.requests_per_second must be positive".to_string(),
            ));
        }

        if self.qdrant.insert_batch_size == 0 || self.qdrant.check_batch_size == 0 {
            return Err(Error::Config(
                "qdrant batch sizes must be positive".to_string(),
            ));
        }

        if regex::Regex::new(&self.qdrant.stale_uid_pattern).is_err() {
            return Err(Error::Config(format!(
                "qdrant.stale_uid_pattern is not a valid regex: {}",
                self.qdrant.stale_uid_pattern
            )));
        }

        if self.search.page_size == 0 || self.search.page_size > self.search.max_page_size {
            return Err(Error::Config(
                "search.page_size must be between 1 and search.max_page_size".to_string(),
            ));
        }

        if self.search.min_similarity < 0.0 || self.search.min_similarity > 1.0 {
            return Err(Error::Config(
                "search.min_similarity must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.search.blend_weight < 0.0 || self.search.blend_weight > 1.0 {
            return Err(Error::Config(
                "search.blend_weight must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.search.semantic_limit > self.search.semantic_candidates {
            return Err(Error::Config(
                "search.semantic_limit must be <= search.semantic_candidates".to_string(),
            ));
        }

        Ok(())
    }
}
