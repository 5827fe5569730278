//! Semantic and hybrid search
//!
//! - `embedding`: text to fixed-dimension vectors
//! - `vector_index`: flat L2 index with tombstones and atomic persistence
//! - `engine`: keyword + semantic fusion over the relational store

pub mod embedding;
pub mod engine;
pub mod vector_index;

pub use embedding::{Embedder, EmbeddingAdapter, HarmonicEmbedder};
pub use engine::{HybridSearch, MatchSource, SearchResult};
pub use vector_index::{IndexStats, SlotEntry, VectorIndex};
