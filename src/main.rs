//! # Local Knowledge Base CLI (`kb`)
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the documents folder and build the index |
//! | `kb add <PATH>...` | Copy files into the knowledge base and reindex |
//! | `kb remove <PATH>` | Remove a file and reindex |
//! | `kb scan` | Register files dropped into the documents folder |
//! | `kb rebuild` | Re-chunk and re-embed everything |
//! | `kb list` | List tracked documents |
//! | `kb stats` | Show counts and index details |
//! | `kb search "<query>"` | Query, optionally restricted with `--file` |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use clap::{Parser, Subcommand};
use localkb::{commands, config};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Local knowledge base: chunked vector search over a folder of text files.
#[derive(Parser)]
#[command(name = "kb", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the documents folder and bring the index up to date.
    Init,

    /// Copy one or more files into the knowledge base, then rebuild once.
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove a tracked file (by tracked path or by file name).
    Remove { path: PathBuf },

    /// Register files dropped into the documents folder by hand.
    Scan,

    /// Rebuild the index from every tracked document.
    Rebuild,

    /// List tracked documents with their load time.
    List,

    /// Show document, chunk, and index counts.
    Stats,

    /// Search the knowledge base.
    Search {
        query: String,

        /// Number of chunks to return. Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict results to this file name. Repeatable.
        #[arg(long = "file")]
        files: Vec<String>,

        /// Print the retrieval trace before the results.
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Add { paths } => commands::run_add(&cfg, &paths).await?,
        Commands::Remove { path } => commands::run_remove(&cfg, &path).await?,
        Commands::Scan => commands::run_scan(&cfg).await?,
        Commands::Rebuild => commands::run_rebuild(&cfg).await?,
        Commands::List => commands::run_list(&cfg).await?,
        Commands::Stats => commands::run_stats(&cfg).await?,
        Commands::Search {
            query,
            top_k,
            files,
            debug,
        } => commands::run_search(&cfg, &query, top_k, files, debug).await?,
    }

    Ok(())
}
