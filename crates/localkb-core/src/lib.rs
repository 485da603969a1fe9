//! # localkb core
//!
//! Storage-agnostic logic for the local knowledge base: data models,
//! chunking, the embedding trait, and the flat L2 vector index.
//!
//! This crate performs no filesystem I/O and pulls in no async runtime.
//! Index persistence is exposed as in-memory byte encoding only; the
//! `localkb` app crate owns files, locking, and concrete embedders.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;

pub use error::{KbError, Result};
