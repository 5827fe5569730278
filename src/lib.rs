//! mailvault library
//!
//! Hybrid mail store: normalized SQLite storage, a vector index over message
//! embeddings, and search that merges keyword and semantic matches.
//!
//! # Modules
//!
//! - `core`: Message model, provider payload parsing, addresses and dates
//! - `db`: Relational store
//! - `search`: Embeddings, vector index and hybrid search
//! - `ingest`: Store-then-index pipeline
//! - `vault`: Owned bundle of the above, opened from a root directory

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod ingest;
pub mod search;
pub mod vault;

// Re-exports for convenience
pub use config::Config;
pub use core::message::{MessageId, MessageRecord};
pub use core::payload::ProviderMessage;
pub use db::MessageStore;
pub use error::{Error, Result};
pub use ingest::{IngestOutcome, IngestStatus, Ingestor};
pub use search::embedding::EMBEDDING_DIM;
pub use vault::MailVault;
