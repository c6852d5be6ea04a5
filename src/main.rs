//! # refchat CLI
//!
//! The `refchat` binary runs the HTTP API and offers the same operations
//! from the command line.
//!
//! ## Usage
//!
//! ```bash
//! refchat --config ./config/refchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `refchat serve` | Start the HTTP API |
//! | `refchat upload <path>` | Add a PDF or text file to the library |
//! | `refchat delete <filename>` | Remove a document from the library |
//! | `refchat documents` | List indexed documents |
//! | `refchat search "<query>"` | Keyword or semantic search |
//! | `refchat ask "<question>"` | Answer a question from the documents |
//! | `refchat reindex` | Rebuild the index from the library |
//! | `refchat stats` | Index counters and LLM availability |
//!
//! Log verbosity follows `RUST_LOG` when set, else `[logging].level`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use refchat::{commands, config, server};
use refchat_core::models::SearchMode;
use tracing_subscriber::EnvFilter;

/// refchat: ask questions of your own documents with a local LLM.
///
/// Reads settings from `./config/refchat.toml` when present, else uses
/// built-in defaults. See `config/refchat.example.toml`.
#[derive(Parser)]
#[command(name = "refchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Must exist when given.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Copy a PDF or text file into the library and index it.
    ///
    /// A document with the same name is replaced.
    Upload {
        /// Path of the file to add.
        path: PathBuf,
    },

    /// Remove a document from the index and the library.
    Delete {
        /// Stored filename, as shown by `refchat documents`.
        filename: String,
    },

    /// List indexed documents.
    Documents,

    /// Search indexed chunks.
    Search {
        /// The search query.
        query: String,

        /// `keyword` (term frequency) or `semantic` (embedding similarity).
        #[arg(long, default_value = "keyword")]
        mode: SearchMode,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Number of ranked results to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Number of chunks given to the model as context.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Rebuild the index from every file in the library.
    Reindex,

    /// Show index counters and LLM availability.
    Stats,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_or_default(cli.config.as_deref())?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Upload { path } => commands::run_upload(&cfg, &path).await?,
        Commands::Delete { filename } => commands::run_delete(&cfg, &filename).await?,
        Commands::Documents => commands::run_documents(&cfg).await?,
        Commands::Search {
            query,
            mode,
            top_k,
            offset,
        } => commands::run_search(&cfg, &query, mode, top_k, offset).await?,
        Commands::Ask { question, top_k } => commands::run_ask(&cfg, &question, top_k).await?,
        Commands::Reindex => commands::run_reindex(&cfg).await?,
        Commands::Stats => commands::run_stats(&cfg).await?,
    }

    Ok(())
}
