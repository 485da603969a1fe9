//! # localkb
//!
//! A local knowledge-base retrieval engine: ingest a folder of text
//! documents, keep a chunked vector index over them, and answer similarity
//! queries with optional filename-scoped filtering.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────────┐   ┌────────────┐
//! │ DocumentStore │──▶│ Chunker+Embedder │──▶│ FlatIndex  │
//! │ folder + JSON │   │  (rebuild all)   │   │ + .index   │
//! └───────────────┘   └──────────────────┘   └─────┬──────┘
//!                                                  │
//!                               ┌──────────────────┘
//!                               ▼
//!                        ┌─────────────┐
//!                        │KnowledgeBase│◀── CLI (kb) / callers
//!                        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                          # create the documents folder
//! kb add notes.txt manual.txt      # copy and index
//! kb search "how do I reset" --file manual.txt --debug
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`document_store`] | Documents folder and load-history metadata |
//! | [`embedding`] | Embedding backends (local, Ollama, hash, disabled) |
//! | [`persist`] | On-disk index file |
//! | [`knowledge_base`] | The orchestrator |
//! | [`commands`] | `kb` subcommands |
//!
//! Pure types and algorithms (chunking, the flat index, errors) live in the
//! `localkb-core` crate and are re-exported here.

pub mod commands;
pub mod config;
pub mod document_store;
pub mod embedding;
pub mod knowledge_base;
pub mod persist;

pub use knowledge_base::{KnowledgeBase, LoadOutcome};
pub use localkb_core::models::{
    Document, FileFilter, KbSearchResult, KbStats, RebuildReport, SearchHit, SkippedDocument,
};
pub use localkb_core::{chunk, index, KbError, Result};
