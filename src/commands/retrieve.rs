// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieve the chunks most similar to a query

use anyhow::Result;

use crate::cli::OutputFormat;
use ragcore::output::{
    colorize_error, colorize_name, colorize_score, colorize_snippet, colorize_source, print_json,
    single_line, use_colors,
};
use ragcore::pipeline::SOURCE_ID_KEY;
use ragcore::store::MetadataFilter;
use ragcore::{Config, RagPipeline};

/// Run the retrieve command
pub fn run(
    query: &str,
    k: usize,
    source: Option<&str>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let pipeline = RagPipeline::open(config)?;
    let results = match source {
        Some(source) => {
            pipeline.retrieve_filtered(query, k, &MetadataFilter::eq(SOURCE_ID_KEY, source))?
        }
        None => pipeline.retrieve(query, k)?,
    };

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => {
            let use_color = use_colors();
            if results.is_empty() {
                println!(
                    "{} No chunks found for: {}",
                    colorize_error("✗", use_color),
                    colorize_name(query, use_color)
                );
                return Ok(());
            }

            for (rank, hit) in results.iter().enumerate() {
                println!(
                    "{:>2}. [{}] {}",
                    rank + 1,
                    colorize_score(hit.score, use_color),
                    colorize_source(&hit.record_id, use_color)
                );
                println!("    {}", colorize_snippet(&single_line(&hit.text), use_color));
            }
        }
    }

    Ok(())
}
