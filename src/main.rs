// SPDX-License-Identifier: MIT OR Apache-2.0

//! ragcore - Local retrieval core for RAG pipelines
//!
//! Ingests text documents into a SQLite-backed vector store using fastembed
//! or deterministic hash embeddings, and retrieves chunks by similarity.

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, CollectionCommands, Commands};
use commands::load_config;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with RAGCORE_LOG env var (e.g., RAGCORE_LOG=debug ragcore retrieve "query")
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RAGCORE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    match cli.command {
        Commands::Ingest { paths, source_id } => {
            let config = load_config(cli.config.as_deref())?;
            commands::ingest::run(&paths, source_id.as_deref(), &config, format)?;
        }
        Commands::Retrieve { query, k, source } => {
            let config = load_config(cli.config.as_deref())?;
            commands::retrieve::run(&query, k, source.as_deref(), &config, format)?;
        }
        Commands::Remove { source_id } => {
            let config = load_config(cli.config.as_deref())?;
            commands::remove::run(&source_id, &config, format)?;
        }
        Commands::Stats => {
            let config = load_config(cli.config.as_deref())?;
            commands::stats::run(&config, format)?;
        }
        Commands::Collections { command } => {
            let config = load_config(cli.config.as_deref())?;
            match command {
                CollectionCommands::List => commands::collections::list(&config, format)?,
                CollectionCommands::Drop { name } => {
                    commands::collections::drop(&name, &config, format)?
                }
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ragcore", &mut std::io::stdout());
        }
    }

    Ok(())
}
