//! # Lantern
//!
//! An offline retrieval-augmented emergency guidance assistant.
//!
//! Lantern answers first-aid and preparedness questions from a fixed
//! local document corpus, with no external services. Documents are chunked
//! with stable character offsets, indexed in SQLite FTS5, and retrieved
//! through a three-method tool surface; a local LLM assembles a cited
//! checklist; and a deterministic safety critic gates every answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ Documents │──▶│   Pipeline    │──▶│  SQLite   │
//! │ PDF / txt │   │ Extract+Chunk │   │ FTS5      │
//! └───────────┘   └──────────────┘   └────┬──────┘
//!                                         │
//!                                   ┌─────▼─────┐
//!                                   │  Browser   │  search / open / find
//!                                   └─────┬─────┘
//!                                         │
//!                  ┌──────────┐     ┌─────▼─────┐     ┌──────────┐
//!                  │ Local LLM │◀──▶│  Engine    │────▶│  Critic  │
//!                  │ vLLM/Ollama│    │ tool loop │     │ ALLOW /  │
//!                  └──────────┘     │ or RAG    │     │ BLOCK    │
//!                                   └───────────┘     └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Corpus data types |
//! | [`chunker`] | Offset-stable text chunking |
//! | [`extract`] | PDF / plain-text extraction |
//! | [`store`] | SQLite persistence and FTS5 index |
//! | [`ingest`] | Document ingestion pipeline |
//! | [`browser`] | The search/open/find retrieval tool |
//! | [`llm`] | Generation backend abstraction |
//! | [`conversation`] | Per-request conversation state |
//! | [`parser`] | Resilient response parsing |
//! | [`templates`] | Offline emergency templates |
//! | [`engine`] | Orchestration (tool loop / RAG fallback) |
//! | [`policy`] | Safety policy configuration |
//! | [`critic`] | The ALLOW/BLOCK safety gate |
//! | [`server`] | HTTP API |

pub mod browser;
pub mod checklist;
pub mod chunker;
pub mod config;
pub mod conversation;
pub mod critic;
pub mod db;
pub mod engine;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod policy;
pub mod server;
pub mod store;
pub mod templates;
