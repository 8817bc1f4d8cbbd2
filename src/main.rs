//! lectern CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use lectern::{
    commands::{
        cmd_embed, cmd_ingest, cmd_init, cmd_prune, cmd_reindex_text, cmd_search, cmd_sermon,
        cmd_sermons, cmd_status, cmd_sync, cmd_windows, open_corpus, print_embed_stats,
        print_ingest_report, print_init_report, print_prune_stats, print_reindex_stats,
        print_search_page, print_sermon_list, print_sermon_report, print_status,
        print_sync_stats, print_window_stats, EmbedOptions, InitOptions,
    },
    config::Config,
    corpus::SermonFilter,
    error::{Error, Result},
    progress::LogWriterFactory,
    search::{SearchMode, SearchRequest},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(version, about = "Sermon transcript store with lexical and semantic search", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base directory (defaults to $LECTERN_HOME or ~/.lectern)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the corpus database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Load sermon JSON documents from a file or directory
    Ingest {
        path: PathBuf,

        /// Rewrite sermons even when the source is unchanged
        #[arg(long)]
        force: bool,
    },

    /// Rebuild the paragraph window table
    Windows,

    /// Rebuild paragraph text and the full-text indexes from blocks
    ReindexText,

    /// Embed every block that has no embedding yet
    Embed {
        /// Blocks per provider request
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent provider requests
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Upload embedded blocks missing from Qdrant
    Sync,

    /// Remove retired entries from Qdrant
    Prune {
        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,

        /// Also remove entries whose block no longer exists locally
        #[arg(long)]
        orphans: bool,
    },

    /// Search the corpus
    Search {
        /// The search query
        query: String,

        /// general, phrase, any, boolean, similar or hybrid
        #[arg(short, long, default_value = "general")]
        mode: String,

        /// Results per page
        #[arg(short, long)]
        limit: Option<usize>,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Restrict to one sermon uid
        #[arg(long)]
        sermon: Option<String>,

        /// Match across neighbouring paragraphs
        #[arg(long)]
        near: bool,
    },

    /// Print one sermon in document order
    Sermon {
        uid: String,

        /// Also report rows that cannot be placed in the hierarchy
        #[arg(long)]
        check: bool,
    },

    /// List sermons
    Sermons {
        /// Case-insensitive title substring
        #[arg(long)]
        title: Option<String>,

        /// Year of the sermon date
        #[arg(long)]
        year: Option<i32>,
    },

    /// Show system status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (plain, json) = if cli.log_json {
        (
            None,
            Some(fmt::layer().json().with_writer(LogWriterFactory::default())),
        )
    } else {
        (
            Some(fmt::layer().with_writer(LogWriterFactory::default())),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();
}

fn emit<T: Serialize>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_from(cli.base_dir.clone()),
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Progress bars would garble JSON output
    let show_progress = !cli.json;

    match &cli.command {
        Commands::Init { force } => {
            let base_dir = match &cli.config {
                Some(path) => path.parent().map(PathBuf::from),
                None => cli.base_dir.clone(),
            };
            let report = cmd_init(InitOptions {
                base_dir,
                force: *force,
                connect_qdrant: true,
            })
            .await?;
            emit(cli.json, &report, print_init_report)?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "lectern", &mut std::io::stdout());
        }

        Commands::Ingest { path, force } => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let report = cmd_ingest(&store, path, *force, show_progress).await?;
            emit(cli.json, &report, print_ingest_report)?;
        }

        Commands::Windows => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let stats = cmd_windows(&store).await?;
            emit(cli.json, &stats, print_window_stats)?;
        }

        Commands::ReindexText => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let stats = cmd_reindex_text(&store).await?;
            emit(cli.json, &stats, print_reindex_stats)?;
        }

        Commands::Embed {
            batch_size,
            concurrency,
        } => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let options = EmbedOptions {
                batch_size: *batch_size,
                concurrency: *concurrency,
                show_progress,
            };
            let stats = cmd_embed(&config, &store, options).await?;
            emit(cli.json, &stats, print_embed_stats)?;
        }

        Commands::Sync => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let stats = cmd_sync(&config, &store, show_progress).await?;
            emit(cli.json, &stats, print_sync_stats)?;
        }

        Commands::Prune { dry_run, orphans } => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let stats = cmd_prune(&config, &store, *dry_run, *orphans).await?;
            emit(cli.json, &stats, print_prune_stats)?;
        }

        Commands::Search {
            query,
            mode,
            limit,
            page,
            sermon,
            near,
        } => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;

            let mut request = SearchRequest::new(query.clone(), mode.parse::<SearchMode>()?)
                .page(*page)
                .near(*near);
            if let Some(limit) = limit {
                request = request.limit(*limit);
            }
            if let Some(uid) = sermon {
                request = request.sermon(uid.clone());
            }

            let page = cmd_search(&config, &store, &request).await?;
            emit(cli.json, &page, |p| print_search_page(query, p))?;
        }

        Commands::Sermon { uid, check } => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            match cmd_sermon(&store, uid, *check).await? {
                Some(report) => emit(cli.json, &report, print_sermon_report)?,
                None => {
                    return Err(Error::Other(format!("Sermon not found: {}", uid)));
                }
            }
        }

        Commands::Sermons { title, year } => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let filter = SermonFilter {
                title: title.clone(),
                year: *year,
            };
            let sermons = cmd_sermons(&store, &filter).await?;
            emit(cli.json, &sermons, |s| print_sermon_list(s))?;
        }

        Commands::Status => {
            let config = load_config(&cli)?;
            let store = open_corpus(&config).await?;
            let status = cmd_status(&config, &store).await?;
            emit(cli.json, &status, print_status)?;
        }
    }

    Ok(())
}
