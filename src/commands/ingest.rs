// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingest text files into the configured collection

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::cli::OutputFormat;
use ragcore::output::{colorize_error, colorize_ok, colorize_source, print_json, use_colors};
use ragcore::{Config, Document, DocumentOutcome, RagPipeline};

/// Documents embedded per bulk call
const BATCH_DOCUMENTS: usize = 32;

/// Extensions collected when walking directories
const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Ingest result for JSON output
#[derive(Debug, Serialize)]
struct IngestResult {
    source_id: String,
    chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&DocumentOutcome> for IngestResult {
    fn from(outcome: &DocumentOutcome) -> Self {
        match &outcome.result {
            Ok(ingested) => Self {
                source_id: outcome.source_id.clone(),
                chunks: ingested.chunk_count,
                error: None,
            },
            Err(err) => Self {
                source_id: outcome.source_id.clone(),
                chunks: 0,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Run the ingest command
pub fn run(
    paths: &[PathBuf],
    source_id: Option<&str>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        bail!("no .txt or .md files found");
    }
    if source_id.is_some() && files.len() > 1 {
        bail!("--source-id needs exactly one file, found {}", files.len());
    }

    let mut documents = Vec::with_capacity(files.len());
    for file in &files {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let id = source_id
            .map(str::to_string)
            .unwrap_or_else(|| file.display().to_string());
        documents.push(Document::new(id, text));
    }

    let pipeline = RagPipeline::open(config)?;

    let pb = if documents.len() > 1 && format == OutputFormat::Text {
        let pb = ProgressBar::new(documents.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} documents | Ingesting {msg}")?
                .progress_chars("##."),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut outcomes = Vec::with_capacity(documents.len());
    for batch in documents.chunks(BATCH_DOCUMENTS) {
        pb.set_message(batch[0].source_id.clone());
        let report = pipeline.ingest_batch(batch);
        pb.inc(batch.len() as u64);
        outcomes.extend(report.outcomes);
    }
    pb.finish_and_clear();
    pipeline.persist()?;

    let results: Vec<IngestResult> = outcomes.iter().map(IngestResult::from).collect();
    let failed = results.iter().filter(|r| r.error.is_some()).count();

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => {
            let use_color = use_colors();
            for result in &results {
                match &result.error {
                    None => println!(
                        "{} {} ({} chunks)",
                        colorize_ok("✓", use_color),
                        colorize_source(&result.source_id, use_color),
                        result.chunks
                    ),
                    Some(error) => println!(
                        "{} {}: {}",
                        colorize_error("✗", use_color),
                        colorize_source(&result.source_id, use_color),
                        error
                    ),
                }
            }
            let chunks: usize = results.iter().map(|r| r.chunks).sum();
            println!(
                "\nIngested {} of {} documents ({} chunks)",
                results.len() - failed,
                results.len(),
                chunks
            );
        }
    }

    if failed > 0 {
        bail!("{} of {} documents failed to ingest", failed, results.len());
    }
    Ok(())
}

/// Expand directories into their text files, keeping explicit files as given.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
                if entry.file_type().is_file() && is_text_file(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("path not found: {}", path.display());
        }
    }
    Ok(files)
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
}
