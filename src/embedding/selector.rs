// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide embedding provider selection.
//!
//! The first caller loads the model provider; if the model is unavailable the
//! hash provider is used instead. The choice is cached until an explicit reset.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::provider::{EmbeddingProvider, HashEmbedder, ModelConfig, ModelEmbedder};
use crate::errors::{RagError, Result};

/// A provider shared by every caller in the process.
pub type SharedProvider = Arc<dyn EmbeddingProvider>;

/// Which provider the selector may choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// Try the model, fall back to hashing when it cannot be loaded.
    #[default]
    Auto,
    /// Require the model; unavailability is a configuration error.
    Model,
    /// Never load a model.
    Hash,
}

impl fmt::Display for ProviderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderBackend::Auto => write!(f, "auto"),
            ProviderBackend::Model => write!(f, "model"),
            ProviderBackend::Hash => write!(f, "hash"),
        }
    }
}

impl FromStr for ProviderBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ProviderBackend::Auto),
            "model" => Ok(ProviderBackend::Model),
            "hash" => Ok(ProviderBackend::Hash),
            other => Err(RagError::config(format!(
                "unknown embedding backend '{}' (expected auto, model or hash)",
                other
            ))),
        }
    }
}

/// Inputs to provider selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub backend: ProviderBackend,
    /// Expected vector length. The hash provider is built with it and a
    /// loaded model must produce it.
    pub dimension: usize,
    pub model: ModelConfig,
}

/// Single-initialization holder for the active provider.
///
/// The slot lock is held while a provider is constructed, so concurrent first
/// callers block until the one construction finishes.
#[derive(Default)]
pub struct ProviderSelector {
    slot: Mutex<Option<SharedProvider>>,
}

impl ProviderSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached provider, selecting one on first use.
    pub fn get_or_select<F>(&self, settings: &ProviderSettings, load_model: F) -> Result<SharedProvider>
    where
        F: FnOnce(&ModelConfig) -> Result<SharedProvider>,
    {
        let mut slot = self.lock();
        if let Some(provider) = slot.as_ref() {
            ensure_dimension(provider.as_ref(), settings.dimension)?;
            debug!(model = provider.model_id(), "reusing embedding provider");
            return Ok(Arc::clone(provider));
        }

        let provider = select(settings, load_model)?;
        ensure_dimension(provider.as_ref(), settings.dimension)?;
        *slot = Some(Arc::clone(&provider));
        Ok(provider)
    }

    /// Returns the cached provider without selecting one.
    pub fn current(&self) -> Option<SharedProvider> {
        self.lock().clone()
    }

    /// Forgets the cached provider so the next caller selects again.
    pub fn reset(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<SharedProvider>> {
        // The slot only ever holds a fully constructed provider.
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn select<F>(settings: &ProviderSettings, load_model: F) -> Result<SharedProvider>
where
    F: FnOnce(&ModelConfig) -> Result<SharedProvider>,
{
    if settings.backend != ProviderBackend::Hash {
        match load_model(&settings.model) {
            Ok(provider) => {
                info!(model = provider.model_id(), "selected model embedding provider");
                return Ok(provider);
            }
            Err(RagError::EmbeddingUnavailable(reason)) => {
                if settings.backend == ProviderBackend::Model {
                    return Err(RagError::config(format!(
                        "embedding backend 'model' required but unavailable: {}",
                        reason
                    )));
                }
                warn!(%reason, "embedding model unavailable; falling back to hash embeddings");
            }
            Err(err) => return Err(err),
        }
    }

    let provider = HashEmbedder::new(settings.dimension)?;
    info!(model = provider.model_id(), "selected hash embedding provider");
    Ok(Arc::new(provider))
}

fn ensure_dimension(provider: &dyn EmbeddingProvider, expected: usize) -> Result<()> {
    if provider.dimension() != expected {
        return Err(RagError::config(format!(
            "embedding provider {} produces {}-dimensional vectors but {} were configured",
            provider.model_id(),
            provider.dimension(),
            expected
        )));
    }
    Ok(())
}

static GLOBAL_SELECTOR: Lazy<ProviderSelector> = Lazy::new(ProviderSelector::new);

/// Returns the process-wide provider, loading the fastembed model on first use.
pub fn global_provider(settings: &ProviderSettings) -> Result<SharedProvider> {
    GLOBAL_SELECTOR.get_or_select(settings, load_model_provider)
}

/// Clears the process-wide provider.
///
/// Test hook: production code selects once per process.
pub fn reset_global_provider() {
    GLOBAL_SELECTOR.reset();
}

fn load_model_provider(config: &ModelConfig) -> Result<SharedProvider> {
    Ok(Arc::new(ModelEmbedder::new(config.clone())?))
}
