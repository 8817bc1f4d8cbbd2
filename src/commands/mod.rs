//! CLI commands implementation

pub mod embed;
pub mod ingest;
pub mod init;
pub mod query;
pub mod reindex;
pub mod sermon;
pub mod status;
pub mod sync;

pub use embed::*;
pub use ingest::*;
pub use init::*;
pub use query::*;
pub use reindex::*;
pub use sermon::*;
pub use status::*;
pub use sync::*;

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Open the corpus database, refusing to create one outside `lectern init`
pub async fn open_corpus(config: &Config) -> Result<Arc<CorpusStore>> {
    if !config.paths.db_file.exists() {
        return Err(Error::NotInitialized);
    }
    let store = CorpusStore::connect(config).await?;
    if !store.is_initialized().await? {
        return Err(Error::NotInitialized);
    }
    // Tables added since the database was created
    store.init_schema().await?;
    Ok(Arc::new(store))
}
