// SPDX-License-Identifier: MIT OR Apache-2.0

//! ragcore - Retrieval core for RAG pipelines
//!
//! Chunks documents, embeds the chunks and keeps them in a persistent vector
//! store for similarity retrieval. Shared modules for the ragcore CLI tool.

pub mod config;
pub mod embedding;
pub mod errors;
pub mod output;
pub mod pipeline;
pub mod store;

pub use config::{Config, PipelineSettings};
pub use errors::{RagError, Result};
pub use pipeline::{Document, DocumentOutcome, IngestReport, IngestedDocument, RagPipeline};
