// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// ragcore - Local retrieval core for RAG pipelines
///
/// Chunks and embeds text documents into a persistent vector store and
/// retrieves the chunks most similar to a query.
#[derive(Parser, Debug)]
#[command(name = "ragcore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Configuration file (defaults to .ragcore.toml or ~/.config/ragcore/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and store documents
    Ingest {
        /// Files or directories (.txt and .md files are collected from directories)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Source id for a single file (defaults to the file path)
        #[arg(long)]
        source_id: Option<String>,
    },

    /// Retrieve the chunks most similar to a query
    Retrieve {
        /// Query text
        query: String,

        /// Number of chunks to return
        #[arg(short = 'k', long = "top-k", default_value_t = 5)]
        k: usize,

        /// Only return chunks of this source id
        #[arg(long)]
        source: Option<String>,
    },

    /// Remove every chunk of a source document
    Remove {
        /// Source id used at ingestion
        source_id: String,
    },

    /// Show the configured store and collection
    Stats,

    /// Manage collections in the store
    Collections {
        #[command(subcommand)]
        command: CollectionCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum CollectionCommands {
    /// List collections with their record counts
    List,

    /// Delete a collection and all of its records
    Drop {
        /// Collection name
        name: String,
    },
}
