// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remove a source document from the configured collection

use anyhow::Result;
use serde_json::json;

use crate::cli::OutputFormat;
use ragcore::output::{colorize_ok, colorize_source, print_json, use_colors};
use ragcore::pipeline::SOURCE_ID_KEY;
use ragcore::store::{MetadataFilter, SqliteVectorStore, VectorStore};
use ragcore::Config;

/// Run the remove command
pub fn run(source_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let settings = config.settings();
    let store = SqliteVectorStore::load(
        &settings.storage_location,
        &settings.collection,
        settings.write_mode,
    )?;
    let removed = store.delete_where(&MetadataFilter::eq(SOURCE_ID_KEY, source_id))?;
    store.close()?;

    match format {
        OutputFormat::Json => print_json(&json!({ "source_id": source_id, "removed": removed }))?,
        OutputFormat::Text => {
            let use_color = use_colors();
            println!(
                "{} Removed {} chunks of {}",
                colorize_ok("✓", use_color),
                removed,
                colorize_source(source_id, use_color)
            );
        }
    }
    Ok(())
}
