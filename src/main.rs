//! # Groundwork CLI (`gw`)
//!
//! The `gw` binary is the primary interface for Groundwork. It provides
//! commands for database initialization, document ingestion, question
//! answering, index statistics, and audit trail inspection.
//!
//! ## Usage
//!
//! ```bash
//! gw --config ./config/gw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gw init` | Create the SQLite database and run schema migrations |
//! | `gw ingest <dir>` | Index a directory of knowledge-base documents |
//! | `gw ask "<question>"` | Answer a question against the index |
//! | `gw stats` | Show index counters |
//! | `gw audit` | Show recent audit entries |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! gw init --config ./config/gw.toml
//!
//! # Index the docs tree
//! gw ingest ./docs --config ./config/gw.toml
//!
//! # Ask a question
//! gw ask "how do I request vacation days?" --user alice
//!
//! # Machine-readable answer
//! gw ask "vpn setup" --user alice --json
//!
//! # Inspect the audit trail
//! gw audit --limit 20
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use groundwork::audit::SqliteAuditSink;
use groundwork::models::QueryRequest;
use groundwork::pipeline::QueryPipeline;
use groundwork::retrieve::SqliteRetriever;
use groundwork::{config, db, embedding, ingest, migrate, stats, store};

/// Groundwork CLI — a retrieval-augmented query pipeline for
/// knowledge-base assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gw.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gw",
    about = "Groundwork — a retrieval-augmented query pipeline for knowledge-base assistants",
    version,
    long_about = "Groundwork ingests a directory of knowledge-base documents into a local \
    SQLite index (chunking, front-matter metadata, sensitivity-aware redaction, embedding) \
    and answers questions against it with grounded, cited answers under a per-request budget."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/gw.toml`. All chunking, budget, provider,
    /// and redaction settings are read from this file.
    #[arg(long, global = true, default_value = "./config/gw.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunk_vectors, audit_log).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Index a directory of knowledge-base documents.
    ///
    /// Walks the directory, parses front matter, redacts document bodies
    /// according to their sensitivity label, chunks and embeds them, and
    /// stores everything in SQLite. Re-running supersedes existing
    /// documents atomically.
    Ingest {
        /// Root directory to index.
        dir: PathBuf,
    },

    /// Answer a question against the index.
    ///
    /// Embeds the question, retrieves similar chunks, assembles a
    /// context block under the token ceiling, and generates a grounded
    /// answer with source citations. Writes one redacted audit entry.
    Ask {
        /// The question to answer.
        question: String,

        /// Identifier of the asking user, recorded in the audit trail.
        #[arg(long, default_value = "local")]
        user: String,

        /// Prior conversation turns, oldest first. Repeatable.
        #[arg(long = "history")]
        history: Vec<String>,

        /// Print the full result as JSON instead of formatted text.
        #[arg(long)]
        json: bool,
    },

    /// Show index counters (documents, chunks, vectors, audit entries).
    Stats,

    /// Show recent audit entries, newest first.
    Audit {
        /// Maximum number of entries to show.
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dir } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            let embedder = embedding::create_embedder(&cfg.embedding)?;

            let report = ingest::run_ingest(&cfg, &pool, embedder.as_ref(), &dir).await?;

            println!("ingest {}", dir.display());
            println!("  files seen: {}", report.files_seen);
            println!("  documents indexed: {}", report.documents_indexed);
            println!("  chunks written: {}", report.chunks_written);
            println!("  embeddings written: {}", report.embeddings_written);
            if report.embeddings_pending > 0 {
                println!("  embeddings pending: {}", report.embeddings_pending);
            }
            println!("ok");
            pool.close().await;
        }
        Commands::Ask {
            question,
            user,
            history,
            json,
        } => {
            let pool = db::connect(&cfg.db).await?;
            let pipeline = QueryPipeline::from_config(
                &cfg,
                Arc::new(SqliteRetriever::new(pool.clone())),
                Arc::new(SqliteAuditSink::new(pool.clone())),
            )?;

            let mut request = QueryRequest::new(question, user);
            request.conversation_history = history;

            match pipeline.answer(request).await {
                Ok(result) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        println!("{}", result.answer);
                        if result.missing_information {
                            println!("\n(the index may not cover this question)");
                        }
                        if !result.sources.is_empty() {
                            println!("\nSources:");
                            for source in &result.sources {
                                println!(
                                    "  [{:.3}] {} ({})",
                                    source.score,
                                    source.title.as_deref().unwrap_or("untitled"),
                                    source.doc_id
                                );
                            }
                        }
                    }
                    pool.close().await;
                }
                Err(err) => {
                    pool.close().await;
                    return Err(anyhow!("{} ({})", err, err.kind()));
                }
            }
        }
        Commands::Stats => {
            let pool = db::connect(&cfg.db).await?;
            let stats = stats::gather(&pool).await?;
            println!("documents: {}", stats.documents);
            println!("chunks: {}", stats.chunks);
            println!("vectors: {}", stats.vectors);
            println!("audit entries: {}", stats.audit_entries);
            pool.close().await;
        }
        Commands::Audit { limit } => {
            let pool = db::connect(&cfg.db).await?;
            let entries = store::recent_audit_entries(&pool, limit).await?;
            for entry in entries {
                println!(
                    "{}  {}  {}  ~{} tok  {}",
                    entry.timestamp.to_rfc3339(),
                    entry.user_id,
                    entry.outcome.as_str(),
                    entry.cost_estimate,
                    entry.redacted_query
                );
            }
            pool.close().await;
        }
    }

    Ok(())
}
