// SPDX-License-Identifier: MIT OR Apache-2.0

//! List and drop collections

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::json;

use crate::cli::OutputFormat;
use ragcore::output::{colorize_name, colorize_ok, print_json, use_colors};
use ragcore::store::{SqliteVectorStore, VectorStore, WriteMode};
use ragcore::Config;

/// Collection summary for JSON output
#[derive(Debug, Serialize)]
struct CollectionSummary {
    name: String,
    dimension: usize,
    metric: String,
    model: Option<String>,
    created_at: i64,
    records: u64,
}

/// Run the collections list command
pub fn list(config: &Config, format: OutputFormat) -> Result<()> {
    let location = config.settings().storage_location;
    let mut summaries = Vec::new();
    for info in SqliteVectorStore::list_collections(&location)? {
        let store = SqliteVectorStore::load(&location, &info.name, WriteMode::Immediate)?;
        summaries.push(CollectionSummary {
            records: store.count()?,
            name: info.name,
            dimension: info.dimension,
            metric: info.metric.to_string(),
            model: info.model,
            created_at: info.created_at,
        });
    }

    match format {
        OutputFormat::Json => print_json(&summaries)?,
        OutputFormat::Text => {
            if summaries.is_empty() {
                println!("No collections in {}", location.display());
                return Ok(());
            }
            let use_color = use_colors();
            for summary in &summaries {
                println!(
                    "{}  dim={} metric={} model={} records={}",
                    colorize_name(&summary.name, use_color),
                    summary.dimension,
                    summary.metric,
                    summary.model.as_deref().unwrap_or("-"),
                    summary.records
                );
            }
        }
    }
    Ok(())
}

/// Run the collections drop command
pub fn drop(name: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let location = config.settings().storage_location;
    if !SqliteVectorStore::drop_collection(&location, name)? {
        bail!("collection '{}' not found in {}", name, location.display());
    }

    match format {
        OutputFormat::Json => print_json(&json!({ "dropped": name }))?,
        OutputFormat::Text => {
            let use_color = use_colors();
            println!("{} Dropped collection {}", colorize_ok("✓", use_color), colorize_name(name, use_color));
        }
    }
    Ok(())
}
