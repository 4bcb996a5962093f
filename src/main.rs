//! # Lantern CLI (`lantern`)
//!
//! The `lantern` binary is the primary interface for the offline
//! emergency-guidance assistant. It provides commands for database
//! initialization, corpus ingestion, retrieval, one-shot answering, and
//! starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! lantern --config ./config/lantern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lantern init` | Create the SQLite database and run schema migrations |
//! | `lantern ingest <path>` | Ingest a document or directory into the corpus |
//! | `lantern docs` | List ingested documents and corpus statistics |
//! | `lantern delete <doc_id>` | Delete a document and all of its chunks |
//! | `lantern search "<query>"` | Search the corpus |
//! | `lantern open <doc_id> <start> <end>` | Show a text window of a document |
//! | `lantern find <doc_id> <pattern>` | Find a literal pattern in a document |
//! | `lantern ask "<query>"` | Answer a query through the full safety-gated pipeline |
//! | `lantern serve` | Start the HTTP API |

mod browser;
mod checklist;
mod chunker;
mod config;
mod conversation;
mod critic;
mod db;
mod engine;
mod extract;
mod ingest;
mod llm;
mod migrate;
mod models;
mod parser;
mod policy;
mod server;
mod store;
mod templates;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::browser::{BrowserTool, FindResponse, OpenResponse, SearchResponse};
use crate::critic::{CriticStatus, SafetyCritic};
use crate::engine::Engine;
use crate::policy::{Policy, EMERGENCY_BANNER};
use crate::store::CorpusStore;

/// Lantern — an offline retrieval-augmented emergency guidance assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lantern.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lantern",
    about = "Lantern — an offline retrieval-augmented emergency guidance assistant",
    version,
    long_about = "Lantern answers emergency first-aid and preparedness questions from a \
    fixed local document corpus: documents are chunked with stable offsets and indexed in \
    SQLite FTS5, a local LLM assembles a cited step-by-step checklist through a bounded \
    tool-calling loop, and a deterministic safety critic gates every answer before it \
    reaches a user."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lantern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunks_fts). Idempotent; running it multiple
    /// times is safe.
    Init,

    /// Ingest a document or a directory of documents.
    ///
    /// Supported formats: PDF (with page attribution), plain text, and
    /// markdown. Already-ingested documents are skipped; a failed file
    /// leaves no partial document behind.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
        /// Override the derived document id (single-file ingestion only).
        #[arg(long)]
        doc_id: Option<String>,
        /// Override the derived document title (single-file ingestion only).
        #[arg(long)]
        title: Option<String>,
    },

    /// List ingested documents and corpus statistics.
    Docs,

    /// Delete a document and all of its chunks and index entries.
    Delete {
        /// Document id to delete.
        doc_id: String,
    },

    /// Search the corpus.
    Search {
        /// Search query. Multi-word queries match any term.
        query: String,
        /// Maximum number of results.
        #[arg(long, short = 'k')]
        k: Option<i64>,
    },

    /// Show a text window of a document by offsets.
    Open {
        doc_id: String,
        start: i64,
        end: i64,
    },

    /// Find a literal pattern within a document.
    Find {
        doc_id: String,
        pattern: String,
        /// Only report matches at or after this offset.
        #[arg(long, default_value_t = 0)]
        after: i64,
    },

    /// Answer a query through the full pipeline: retrieval, generation,
    /// and the safety critic.
    Ask {
        /// The emergency question to answer.
        query: String,
    },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized {}", config.db.path.display());
        }
        Commands::Ingest {
            path,
            doc_id,
            title,
        } => {
            let store = open_store(&config).await?;
            if doc_id.is_some() || title.is_some() {
                let report = ingest::ingest_file(&config, &store, &path, doc_id, title).await;
                match report.status {
                    ingest::IngestStatus::Success => {
                        println!("{} ({} chunks) ok", report.doc_id, report.chunks)
                    }
                    _ => {
                        eprintln!(
                            "Error: {}",
                            report.reason.as_deref().unwrap_or("ingestion failed")
                        );
                        std::process::exit(1);
                    }
                }
            } else {
                ingest::run_ingest(&config, &store, &path).await?;
            }
        }
        Commands::Docs => {
            let store = open_store(&config).await?;
            let documents = store.list_documents().await?;
            let stats = store.stats().await?;

            for doc in &documents {
                let date = chrono::DateTime::from_timestamp(doc.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                println!("{}  {}  (ingested {})", doc.doc_id, doc.title, date);
                println!("    path: {}", doc.path);
            }
            println!();
            println!("documents: {}", stats.documents);
            println!("chunks: {}", stats.chunks);
        }
        Commands::Delete { doc_id } => {
            let store = open_store(&config).await?;
            if store.delete_document(&doc_id).await? {
                println!("deleted {}", doc_id);
            } else {
                eprintln!("Error: document not found: {}", doc_id);
                std::process::exit(1);
            }
        }
        Commands::Search { query, k } => {
            let store = open_store(&config).await?;
            let browser = BrowserTool::new(store);
            let k = k.unwrap_or(config.retrieval.search_k);

            match browser.search(&query, k).await {
                SearchResponse::Success { results, .. } if results.is_empty() => {
                    println!("No results.");
                }
                SearchResponse::Success { results, .. } => {
                    for (i, hit) in results.iter().enumerate() {
                        println!("{}. [{:.2}] {}", i + 1, hit.relevance_score, hit.doc_title);
                        println!(
                            "    location: {}-{}{}",
                            hit.location.start_offset,
                            hit.location.end_offset,
                            hit.location
                                .page_number
                                .map(|p| format!(" (page {})", p))
                                .unwrap_or_default()
                        );
                        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " "));
                        println!("    doc_id: {}", hit.doc_id);
                        println!();
                    }
                }
                SearchResponse::Error { error, .. } => {
                    eprintln!("Error: {}", error);
                    std::process::exit(1);
                }
            }
        }
        Commands::Open { doc_id, start, end } => {
            let store = open_store(&config).await?;
            let browser = BrowserTool::new(store);

            match browser.open(&doc_id, start, end).await {
                OpenResponse::Success {
                    doc_title,
                    text,
                    location,
                    ..
                } => {
                    println!("--- {} [{}-{}] ---", doc_title, start, end);
                    println!("{}", text);
                    println!();
                    println!(
                        "resolved: {}-{}",
                        location.actual_start, location.actual_end
                    );
                }
                OpenResponse::Error { error, .. } => {
                    eprintln!("Error: {}", error);
                    std::process::exit(1);
                }
            }
        }
        Commands::Find {
            doc_id,
            pattern,
            after,
        } => {
            let store = open_store(&config).await?;
            let browser = BrowserTool::new(store);

            match browser.find(&doc_id, &pattern, after).await {
                FindResponse::Success {
                    matches,
                    total_matches,
                    ..
                } => {
                    for m in &matches {
                        println!(
                            "{}-{}{}: ...{}...",
                            m.location.start_offset,
                            m.location.end_offset,
                            m.location
                                .page_number
                                .map(|p| format!(" (page {})", p))
                                .unwrap_or_default(),
                            m.context.replace('\n', " ")
                        );
                    }
                    println!("total matches: {}", total_matches);
                }
                FindResponse::Error { error, .. } => {
                    eprintln!("Error: {}", error);
                    std::process::exit(1);
                }
            }
        }
        Commands::Ask { query } => {
            let store = open_store(&config).await?;
            let browser = BrowserTool::new(store);
            let backend = llm::create_backend(&config.llm).await;
            let engine = Engine::new(
                backend,
                browser,
                config.llm.clone(),
                config.retrieval.clone(),
            );
            let critic = SafetyCritic::new(Policy::load(config.policy.path.as_deref()));

            let response = engine.process_query(&query).await;
            let decision = critic.review(&response);

            if decision.requires_emergency_banner {
                println!("{}", EMERGENCY_BANNER);
                println!();
            }

            if decision.status == CriticStatus::Block {
                println!("Response blocked for safety reasons.");
                for reason in &decision.reasons {
                    println!("  - {}", reason);
                }
                println!();
                println!("If this is urgent, contact your local emergency services.");
            } else {
                for (i, step) in response.checklist.iter().enumerate() {
                    println!("{}. {}", i + 1, step.title);
                    println!("   {}", step.action);
                    if let Some(caution) = &step.caution {
                        println!("   caution: {}", caution);
                    }
                    if let Some(source) = &step.source {
                        println!("   source: {}", source);
                    }
                }
                println!();
                println!("{}", response.meta.disclaimer);
            }
        }
        Commands::Serve => {
            let store = open_store(&config).await?;
            let browser = BrowserTool::new(store.clone());
            let backend = llm::create_backend(&config.llm).await;
            let engine = Arc::new(Engine::new(
                backend,
                browser.clone(),
                config.llm.clone(),
                config.retrieval.clone(),
            ));
            let critic = Arc::new(SafetyCritic::new(Policy::load(
                config.policy.path.as_deref(),
            )));

            server::run_server(&config.server.bind, store, browser, engine, critic).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &config::Config) -> Result<CorpusStore> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(CorpusStore::new(pool))
}
