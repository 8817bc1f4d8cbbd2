//! Init command implementation

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::error::{Error, Result};
use crate::store::{QdrantStore, VectorIndex};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Base directory; `~/.lectern` when unset
    pub base_dir: Option<PathBuf>,
    /// Overwrite an existing config file
    pub force: bool,
    /// Also create the Qdrant collection
    pub connect_qdrant: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub collection_ready: bool,
}

/// Write a default config and create the corpus schema
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths(options.base_dir);

    if config.paths.config_file.exists() && !options.force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;

    let store = CorpusStore::connect(&config).await?;
    store.init_schema().await?;
    store.close().await;
    info!("Created database at {:?}", config.paths.db_file);

    let mut collection_ready = false;
    if options.connect_qdrant {
        match QdrantStore::connect(&config.qdrant, config.embedding.dimension) {
            Ok(index) => match index.ensure_collection().await {
                Ok(()) => {
                    info!("Qdrant collection '{}' ready", config.qdrant.collection);
                    collection_ready = true;
                }
                Err(e) => warn!(
                    "Could not create Qdrant collection: {}. 'lectern sync' will create it.",
                    e
                ),
            },
            Err(e) => warn!(
                "Could not connect to Qdrant at {}: {}. Make sure Qdrant is running.",
                config.qdrant.url, e
            ),
        }
    }

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        collection_ready,
    })
}

pub fn print_init_report(report: &InitReport) {
    println!("✓ Initialized lectern");
    println!("  Config: {}", report.config_path);
    println!("  Database: {}", report.db_path);
    if !report.collection_ready {
        println!("  Qdrant collection: not created yet");
    }
    println!("\nNext steps:");
    println!("  lectern ingest ./sermons        # Load sermon JSON documents");
    println!("  lectern embed && lectern sync   # Build the semantic index");
    println!("  lectern search \"have faith\" --mode phrase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open_corpus;
    use tempfile::TempDir;

    fn options(tmp: &TempDir, force: bool) -> InitOptions {
        InitOptions {
            base_dir: Some(tmp.path().to_path_buf()),
            force,
            connect_qdrant: false,
        }
    }

    #[tokio::test]
    async fn test_init_creates_config_and_schema() {
        let tmp = TempDir::new().unwrap();
        let report = cmd_init(options(&tmp, false)).await.unwrap();
        assert!(tmp.path().join("config.toml").exists());
        assert!(report.db_path.ends_with("corpus.db"));

        let config = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        let store = open_corpus(&config).await.unwrap();
        assert_eq!(store.corpus_stats().await.unwrap().sermons, 0);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        cmd_init(options(&tmp, false)).await.unwrap();

        let err = cmd_init(options(&tmp, false)).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(cmd_init(options(&tmp, true)).await.is_ok());
    }

    #[tokio::test]
    async fn test_commands_require_init() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(matches!(
            open_corpus(&config).await,
            Err(Error::NotInitialized)
        ));
    }
}
