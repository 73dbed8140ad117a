//! RAG (Retrieval-Augmented Generation) module.
//!
//! This module provides:
//! - `scorer`: lexical relevance between a query and a chunk
//! - `chunker`: sentence-aware splitting of page text
//! - `embedding`: cloud or local fallback chunk vectors
//! - `ChunkStore`: chunk persistence per source URL
//! - `ContextBuilder`: retrieval, context assembly and prompt rendering

pub mod chunker;
mod context_builder;
pub mod embedding;
pub mod scorer;
mod store;

pub use chunker::{chunk_text, ChunkerConfig};
pub use context_builder::{
    ContextBuilder, ContextBuilderConfig, RagContext, ScoredChunk, CONTEXT_INSTRUCTION,
    DEFAULT_SYSTEM_PROMPT,
};
pub use embedding::{CloudEmbedder, Embedder, LocalEmbedder};
pub use store::{ChunkStore, MemoryChunk};
