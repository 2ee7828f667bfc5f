//! # Groundwork
//!
//! A retrieval-augmented query pipeline for knowledge-base assistants.
//!
//! Groundwork ingests a directory of knowledge-base documents (chunking,
//! front-matter metadata, sensitivity-aware redaction, embedding) into a
//! local SQLite index, then answers questions against it: each query is
//! embedded, similar chunks are retrieved and assembled into a context
//! block under a token ceiling, and a generator produces a grounded
//! answer with source citations. Every stage runs under one shared
//! request budget, and every query attempt leaves one redacted entry in
//! an append-only audit trail.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌──────────┐
//! │  Files   │──▶│      Ingest       │──▶│  SQLite  │
//! │ (md/txt) │   │ Chunk+Redact+Emb  │   │ Vectors  │
//! └──────────┘   └───────────────────┘   └────┬─────┘
//!                                             │
//!                ┌────────────────────────────┤
//!                ▼                            ▼
//!       ┌─────────────────┐           ┌──────────────┐
//!       │  QueryPipeline  │──────────▶│  Audit log   │
//!       │ Embed▶Retrieve  │           │ (append-only)│
//!       │ Assemble▶Gen    │           └──────────────┘
//!       └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gw init                          # create database
//! gw ingest ./docs                 # index a document tree
//! gw ask "how do I request a VPN?" --user alice
//! gw stats                         # index counters
//! gw audit --limit 20              # recent audit entries
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping text chunking |
//! | [`frontmatter`] | Front-matter metadata extraction |
//! | [`redact`] | PII redaction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`retrieve`] | Similarity retrieval |
//! | [`generate`] | Answer generation abstraction |
//! | [`budget`] | Request deadline and token ceiling |
//! | [`pipeline`] | Query orchestration |
//! | [`audit`] | Append-only audit trail |
//! | [`ingest`] | Document ingestion |
//! | [`store`] | SQLite persistence |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod audit;
pub mod budget;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod frontmatter;
pub mod generate;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod redact;
pub mod retrieve;
pub mod stats;
pub mod store;
