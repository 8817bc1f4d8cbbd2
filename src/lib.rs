//! lectern - hybrid retrieval over sermon transcripts
//!
//! This crate provides:
//! - A SQLite content store for the sermon → section → paragraph → block corpus
//! - FTS5 lexical search over paragraphs, blocks and paragraph windows
//! - A resumable embedding pipeline against an OpenAI-compatible provider
//! - Qdrant synchronization and similarity search
//! - A result fuser that combines lexical and semantic hits into one paginated list

pub mod commands;
pub mod config;
pub mod corpus;
pub mod embed;
pub mod embedding_backend;
pub mod error;
pub mod lexical;
pub mod pool;
pub mod progress;
pub mod rank;
pub mod rate_limit;
pub mod retry;
pub mod search;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
