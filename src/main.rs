//! # Product RAG CLI (`prag`)
//!
//! Runs the HTTP server and exposes the indexer and responder for one-off use.
//!
//! ## Usage
//!
//! ```bash
//! prag --config ./config/prag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `prag serve` | Start the HTTP server |
//! | `prag index <file.csv>` | Replace the catalog with the contents of a CSV file |
//! | `prag ask "<query>"` | Answer a single query |
//! | `prag count` | Print the number of indexed products |
//!
//! Logging is controlled with `RUST_LOG` (default `product_rag=info,tower_http=info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use product_rag::config;
use product_rag::server::{self, AppState};

/// Product RAG: index a CSV product catalog and answer questions about it.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "prag",
    about = "Product RAG: index a CSV product catalog and answer questions about it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/prag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/upload_csv`, `/ask_query`,
    /// and `/health`.
    Serve,

    /// Replace the catalog with the rows of a CSV file.
    ///
    /// Same behavior as `POST /upload_csv`: the collection is dropped and
    /// recreated, then every row is written.
    Index {
        /// Path to a `.csv` file with PRODUCT_NAME, tid, PRICE_RETAIL, and optional url columns.
        path: PathBuf,
    },

    /// Answer a single query, exactly as `POST /ask_query` would.
    Ask {
        /// The natural-language query.
        query: String,

        /// Print the answer as JSON, including which step produced it.
        #[arg(long)]
        json: bool,
    },

    /// Print the number of indexed products.
    Count,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "product_rag=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_minimal(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Index { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let state = AppState::from_config(&cfg).await?;
            let report = state.indexer.index_catalog(&file_name, &bytes).await?;

            println!("index {}", path.display());
            println!("  documents written: {}", report.documents_written);
            println!("  embeddings: {}", if report.embedded { "yes" } else { "no" });
            println!("ok");
        }
        Commands::Ask { query, json } => {
            let state = AppState::from_config(&cfg).await?;
            let answer = state.responder.answer(&query).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.text);
            }
        }
        Commands::Count => {
            let state = AppState::from_config(&cfg).await?;
            println!("{}", state.store.count().await?);
        }
    }

    Ok(())
}
