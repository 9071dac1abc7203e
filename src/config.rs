// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for ragcore
//!
//! Loads configuration from .ragcore.toml in current directory or ~/.config/ragcore/config.toml

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::embedding::chunker::{
    BoundaryPolicy, ChunkConfig, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_OVERLAP_SIZE,
};
use crate::embedding::provider::{
    ModelChoice, ModelConfig, DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_CHARS,
    MAX_BATCH_SIZE,
};
use crate::embedding::selector::{ProviderBackend, ProviderSettings};
use crate::errors::{RagError, Result};
use crate::store::{CollectionSpec, SimilarityMetric, WriteMode};

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".ragcore.toml";

/// Default storage location, relative to the working directory.
pub const DEFAULT_STORE_LOCATION: &str = ".ragcore/vectors.sqlite";

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "documents";

/// Chunking configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk
    pub max_chunk_size: Option<usize>,
    /// Characters shared by consecutive chunks
    pub overlap_size: Option<usize>,
    /// Boundary policy (exact, whitespace)
    pub boundary: Option<BoundaryPolicy>,
}

impl ChunkingConfig {
    /// Get max chunk size (defaults to 1000)
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size.unwrap_or(DEFAULT_MAX_CHUNK_SIZE)
    }

    /// Get overlap size (defaults to 200)
    pub fn overlap_size(&self) -> usize {
        self.overlap_size.unwrap_or(DEFAULT_OVERLAP_SIZE)
    }

    /// Get boundary policy (defaults to Exact)
    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary.unwrap_or_default()
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider backend (auto, model, hash)
    pub backend: Option<ProviderBackend>,
    /// Model for the model-backed provider
    pub model: Option<ModelChoice>,
    /// Vector dimension shared by the provider and the collection
    pub dimension: Option<usize>,
    /// Texts per model inference call
    pub batch_size: Option<usize>,
    /// Characters kept per text before inference
    pub max_chars: Option<usize>,
    /// Whether model vectors are L2-normalized
    pub normalize: Option<bool>,
    /// Directory for downloaded model files
    pub cache_dir: Option<PathBuf>,
}

impl EmbeddingConfig {
    /// Get backend (defaults to Auto)
    pub fn backend(&self) -> ProviderBackend {
        self.backend.unwrap_or_default()
    }

    /// Get model (defaults to MiniLM)
    pub fn model(&self) -> ModelChoice {
        self.model.unwrap_or_default()
    }

    /// Get dimension (defaults to 384)
    pub fn dimension(&self) -> usize {
        self.dimension.unwrap_or(DEFAULT_EMBEDDING_DIM)
    }

    /// Get batch size (defaults to 256)
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    /// Get max chars (defaults to 2000)
    pub fn max_chars(&self) -> usize {
        self.max_chars.unwrap_or(DEFAULT_MAX_CHARS)
    }

    /// Get normalize (defaults to true)
    pub fn normalize(&self) -> bool {
        self.normalize.unwrap_or(true)
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database
    pub location: Option<PathBuf>,
    /// Collection name
    pub collection: Option<String>,
    /// Similarity metric (cosine, dot, euclidean)
    pub metric: Option<SimilarityMetric>,
    /// Write mode (immediate, buffered)
    pub write_mode: Option<WriteMode>,
}

impl StoreConfig {
    /// Get location (defaults to .ragcore/vectors.sqlite)
    pub fn location(&self) -> PathBuf {
        self.location
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_LOCATION))
    }

    /// Get collection name (defaults to "documents")
    pub fn collection(&self) -> &str {
        self.collection.as_deref().unwrap_or(DEFAULT_COLLECTION)
    }

    /// Get metric (defaults to Cosine)
    pub fn metric(&self) -> SimilarityMetric {
        self.metric.unwrap_or_default()
    }

    /// Get write mode (defaults to Immediate)
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode.unwrap_or_default()
    }
}

/// Configuration loaded from .ragcore.toml or ~/.config/ragcore/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chunking configuration
    pub chunking: ChunkingConfig,

    /// Embedding configuration
    pub embeddings: EmbeddingConfig,

    /// Vector store configuration
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .ragcore.toml in current directory
    /// 2. ~/.config/ragcore/config.toml
    pub fn load() -> Self {
        // Try current directory first
        if let Some(config) = Self::load_if_present(Path::new(LOCAL_CONFIG_FILE)) {
            return config;
        }

        // Try home directory config
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("ragcore").join("config.toml");
            if let Some(config) = Self::load_if_present(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    /// Load configuration from an explicit file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            RagError::config(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::from_toml_str(&content)
            .map_err(|err| RagError::config(format!("{}: {}", path.display(), err)))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| RagError::config(err.to_string()))
    }

    fn load_if_present(path: &Path) -> Option<Self> {
        if !path.is_file() {
            return None;
        }
        match Self::from_path(path) {
            Ok(config) => {
                debug!(path = %path.display(), "loaded configuration");
                Some(config)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable configuration");
                None
            }
        }
    }

    /// Pipeline parameters described by this configuration.
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_chunk_size: self.chunking.max_chunk_size(),
            overlap_size: self.chunking.overlap_size(),
            boundary: self.chunking.boundary(),
            embedding_dimensionality: self.embeddings.dimension(),
            similarity_metric: self.store.metric(),
            storage_location: self.store.location(),
            collection: self.store.collection().to_string(),
            write_mode: self.store.write_mode(),
        }
    }

    /// Provider selection inputs, with `RAGCORE_EMBED_*` environment overrides applied.
    pub fn provider_settings(&self) -> Result<ProviderSettings> {
        self.provider_settings_with(&read_env)
    }

    fn provider_settings_with(&self, lookup: &dyn Fn(&str) -> Result<Option<String>>) -> Result<ProviderSettings> {
        let embeddings = &self.embeddings;

        let backend = match lookup("RAGCORE_EMBED_BACKEND")? {
            Some(value) => value.parse()?,
            None => embeddings.backend(),
        };
        let model = match lookup("RAGCORE_EMBED_MODEL")? {
            Some(value) => value.parse()?,
            None => embeddings.model(),
        };

        let mut batch_size = parse_usize("RAGCORE_EMBED_BATCH_SIZE", lookup, embeddings.batch_size())?;
        if batch_size == 0 {
            batch_size = DEFAULT_BATCH_SIZE;
        }
        if batch_size > MAX_BATCH_SIZE {
            warn!(
                batch_size,
                max = MAX_BATCH_SIZE,
                "embedding batch size exceeds maximum; clamping"
            );
            batch_size = MAX_BATCH_SIZE;
        }

        let mut max_chars = parse_usize("RAGCORE_EMBED_MAX_CHARS", lookup, embeddings.max_chars())?;
        if max_chars == 0 {
            max_chars = DEFAULT_MAX_CHARS;
        }

        let normalize = parse_bool("RAGCORE_EMBED_NORMALIZE", lookup, embeddings.normalize())?;

        Ok(ProviderSettings {
            backend,
            dimension: embeddings.dimension(),
            model: ModelConfig {
                model,
                batch_size,
                max_chars,
                normalize,
                cache_dir: embeddings.cache_dir.clone(),
            },
        })
    }
}

/// Parameters the pipeline is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub max_chunk_size: usize,
    pub overlap_size: usize,
    pub boundary: BoundaryPolicy,
    pub embedding_dimensionality: usize,
    pub similarity_metric: SimilarityMetric,
    pub storage_location: PathBuf,
    pub collection: String,
    pub write_mode: WriteMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl PipelineSettings {
    /// Rejects parameter combinations that cannot work.
    pub fn validate(&self) -> Result<()> {
        self.chunk_config()?;
        if self.embedding_dimensionality == 0 {
            return Err(RagError::config("embedding dimensionality must be greater than 0"));
        }
        if self.collection.trim().is_empty() {
            return Err(RagError::config("collection name must not be empty"));
        }
        Ok(())
    }

    pub fn chunk_config(&self) -> Result<ChunkConfig> {
        Ok(ChunkConfig::new(self.max_chunk_size, self.overlap_size)?.with_boundary(self.boundary))
    }

    pub fn collection_spec(&self) -> CollectionSpec {
        CollectionSpec::new(self.collection.clone(), self.embedding_dimensionality)
            .with_metric(self.similarity_metric)
    }
}

fn read_env(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                Ok(Some(value.to_string()))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(RagError::config(format!("failed to read {}: {}", name, err))),
    }
}

fn parse_usize(
    name: &str,
    lookup: &dyn Fn(&str) -> Result<Option<String>>,
    default: usize,
) -> Result<usize> {
    match lookup(name)? {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RagError::config(format!("invalid {} value: {}", name, value))),
        None => Ok(default),
    }
}

fn parse_bool(
    name: &str,
    lookup: &dyn Fn(&str) -> Result<Option<String>>,
    default: bool,
) -> Result<bool> {
    match lookup(name)? {
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(RagError::config(format!("invalid {} value: {}", name, other))),
        },
        None => Ok(default),
    }
}
