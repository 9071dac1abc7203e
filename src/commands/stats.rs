// SPDX-License-Identifier: MIT OR Apache-2.0

//! Show the configured store and collection

use anyhow::Result;
use serde::Serialize;

use crate::cli::OutputFormat;
use ragcore::output::{colorize_name, print_json, use_colors};
use ragcore::store::{SqliteVectorStore, VectorStore};
use ragcore::Config;

/// Stats for JSON output
#[derive(Debug, Serialize)]
struct Stats {
    location: String,
    collection: String,
    exists: bool,
    dimension: usize,
    metric: String,
    model: Option<String>,
    records: u64,
}

/// Run the stats command
pub fn run(config: &Config, format: OutputFormat) -> Result<()> {
    let settings = config.settings();
    let existing = SqliteVectorStore::list_collections(&settings.storage_location)?
        .into_iter()
        .find(|c| c.name == settings.collection);

    let stats = match existing {
        Some(info) => {
            let store = SqliteVectorStore::load(
                &settings.storage_location,
                &info.name,
                settings.write_mode,
            )?;
            Stats {
                location: settings.storage_location.display().to_string(),
                collection: info.name.clone(),
                exists: true,
                dimension: info.dimension,
                metric: info.metric.to_string(),
                model: info.model.clone(),
                records: store.count()?,
            }
        }
        None => Stats {
            location: settings.storage_location.display().to_string(),
            collection: settings.collection.clone(),
            exists: false,
            dimension: settings.embedding_dimensionality,
            metric: settings.similarity_metric.to_string(),
            model: None,
            records: 0,
        },
    };

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            let use_color = use_colors();
            println!("Store:      {}", stats.location);
            println!(
                "Collection: {}{}",
                colorize_name(&stats.collection, use_color),
                if stats.exists { "" } else { " (not created yet)" }
            );
            println!("Dimension:  {}", stats.dimension);
            println!("Metric:     {}", stats.metric);
            println!("Model:      {}", stats.model.as_deref().unwrap_or("-"));
            println!("Records:    {}", stats.records);
        }
    }
    Ok(())
}
