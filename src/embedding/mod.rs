// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - turns text into fixed-dimension vectors
//!
//! Documents are split by the chunker, embedded by a provider (a fastembed model
//! or the deterministic hash fallback) and the active provider is chosen once
//! per process by the selector.

pub mod chunker;
pub mod provider;
pub mod selector;

pub use chunker::{BoundaryPolicy, Chunk, ChunkConfig, TextChunker};
pub use provider::{
    EmbeddingProvider, HashEmbedder, ModelChoice, ModelConfig, ModelEmbedder,
    DEFAULT_EMBEDDING_DIM,
};
pub use selector::{
    global_provider, reset_global_provider, ProviderBackend, ProviderSelector, ProviderSettings,
    SharedProvider,
};
