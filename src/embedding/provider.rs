// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! [`ModelEmbedder`] runs a fastembed sentence-transformer model on the CPU.
//! [`HashEmbedder`] is the dependency-free fallback: deterministic feature
//! hashing that needs no model weights at all.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{RagError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const MAX_BATCH_SIZE: usize = 1024;
pub const DEFAULT_MAX_CHARS: usize = 2000;

/// Default embedding dimension, matching all-MiniLM-L6-v2.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

const DIMENSION_PROBE: &str = "dimension probe";

/// Supported embedding models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ModelChoice {
    /// sentence-transformers/all-MiniLM-L6-v2 (384 dims)
    #[default]
    MiniLm,
    /// BAAI/bge-small-en-v1.5 (384 dims)
    BgeSmall,
    /// BAAI/bge-base-en-v1.5 (768 dims)
    BgeBase,
}

impl ModelChoice {
    fn to_fastembed(self) -> EmbeddingModel {
        match self {
            ModelChoice::MiniLm => EmbeddingModel::AllMiniLML6V2,
            ModelChoice::BgeSmall => EmbeddingModel::BGESmallENV15,
            ModelChoice::BgeBase => EmbeddingModel::BGEBaseENV15,
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelChoice::MiniLm => write!(f, "minilm"),
            ModelChoice::BgeSmall => write!(f, "bge-small"),
            ModelChoice::BgeBase => write!(f, "bge-base"),
        }
    }
}

impl FromStr for ModelChoice {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "minilm" | "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                Ok(ModelChoice::MiniLm)
            }
            "bge-small" | "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => {
                Ok(ModelChoice::BgeSmall)
            }
            "bge-base" | "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => Ok(ModelChoice::BgeBase),
            other => Err(RagError::config(format!(
                "unsupported embedding model '{}'. Supported values: minilm, bge-small, bge-base",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ModelChoice {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Configuration for the model-backed provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: ModelChoice,
    pub batch_size: usize,
    pub max_chars: usize,
    pub normalize: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: ModelChoice::MiniLm,
            batch_size: DEFAULT_BATCH_SIZE,
            max_chars: DEFAULT_MAX_CHARS,
            normalize: true,
            cache_dir: None,
        }
    }
}

/// Trait for embedding providers.
///
/// Implementations are shared across threads, so every method takes `&self`.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Returns the length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates one embedding per input text, in input order.
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| RagError::Embedding("no embedding returned".to_string()))
    }
}

/// FastEmbed provider. The model is loaded once, at construction.
pub struct ModelEmbedder {
    embedder: Mutex<TextEmbedding>,
    config: ModelConfig,
    model_id: String,
    dimension: usize,
}

impl ModelEmbedder {
    /// Loads the configured model.
    ///
    /// Fails with [`RagError::EmbeddingUnavailable`] when the weights cannot be
    /// fetched or the runtime cannot execute them.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let model = config.model.to_fastembed();
        let model_id = model.to_string();

        let mut init = InitOptions::new(model).with_show_download_progress(false);
        if let Some(dir) = &config.cache_dir {
            init = init.with_cache_dir(dir.clone());
        }
        let mut embedder = TextEmbedding::try_new(init).map_err(|err| {
            RagError::EmbeddingUnavailable(format!("failed to load {}: {:#}", model_id, err))
        })?;

        let probe = vec![DIMENSION_PROBE];
        let dimension = embedder
            .embed(&probe, None)
            .map_err(|err| {
                RagError::EmbeddingUnavailable(format!("{} failed probe inference: {:#}", model_id, err))
            })?
            .first()
            .map(Vec::len)
            .filter(|&dim| dim > 0)
            .ok_or_else(|| {
                RagError::EmbeddingUnavailable(format!("{} returned an empty probe vector", model_id))
            })?;

        info!(model = %model_id, dimension, "loaded embedding model");

        Ok(Self {
            embedder: Mutex::new(embedder),
            config,
            model_id,
            dimension,
        })
    }
}

impl EmbeddingProvider for ModelEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = truncate_texts(texts, self.config.max_chars);
        let mut embedder = self
            .embedder
            .lock()
            .map_err(|_| RagError::Embedding("embedding model lock poisoned".to_string()))?;
        let mut embeddings = embedder
            .embed(&prepared, Some(self.config.batch_size))
            .map_err(|err| RagError::Embedding(format!("{}: {:#}", self.model_id, err)))?;
        drop(embedder);

        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "{} returned {} vectors for {} texts",
                self.model_id,
                embeddings.len(),
                texts.len()
            )));
        }

        if self.config.normalize {
            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
        }

        debug!(model = %self.model_id, count = texts.len(), "embedded texts");
        Ok(embeddings)
    }
}

/// Deterministic feature-hashing provider.
///
/// Each lowercase alphanumeric word is hashed with blake3. The first eight
/// bytes of the digest pick the slot and the parity of the ninth picks the
/// sign of the unit contribution. The accumulated vector is L2-normalized.
/// Identical text always yields a bit-identical vector, on any machine.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model_id: String,
    dimension: usize,
    batch_size: usize,
}

impl HashEmbedder {
    /// Creates a new hash provider with the specified dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::config("hash embedding dimension must be greater than 0"));
        }
        Ok(Self {
            model_id: format!("hash-blake3-{}", dimension),
            dimension,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Embeds a single text without allocating an input vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for feature in hash_features(text) {
            let (slot, sign) = self.slot_for(&feature);
            vector[slot] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }

    fn slot_for(&self, feature: &str) -> (usize, f32) {
        let digest = blake3::hash(feature.as_bytes());
        let bytes = digest.as_bytes();
        let mut head = [0_u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let slot = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if bytes[8] % 2 == 0 { 1.0 } else { -1.0 };
        (slot, sign)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Splits text into lowercase alphanumeric words.
fn hash_features(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
