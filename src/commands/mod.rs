// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations for the ragcore binary

pub mod collections;
pub mod ingest;
pub mod remove;
pub mod retrieve;
pub mod stats;

use anyhow::{Context, Result};
use ragcore::Config;
use std::path::Path;

/// Resolve configuration: an explicit file wins over discovery.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(Config::load()),
    }
}
