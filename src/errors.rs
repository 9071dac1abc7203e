// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for ragcore.
//!
//! Every fallible library operation returns [`RagError`]. Storage failures carry
//! the operation and target they happened on so callers can decide whether to
//! retry.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors produced by the retrieval core.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid or incompatible parameters, detected eagerly.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The embedding model could not be loaded. Absorbed by provider selection.
    #[error("embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The embedding model was loaded but inference failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A vector did not match the collection dimension.
    #[error("dimension mismatch in {operation} for {target}: expected {expected}, got {actual}")]
    DimensionMismatch {
        operation: &'static str,
        target: String,
        expected: usize,
        actual: usize,
    },

    /// The storage engine failed.
    #[error("storage error in {operation} for {target}: {source}")]
    StorageIo {
        operation: &'static str,
        target: String,
        #[source]
        source: StorageCause,
    },

    /// Ingestion of one source document failed (and was rolled back).
    #[error("ingestion of '{source_id}' failed: {source}")]
    Ingest {
        source_id: String,
        #[source]
        source: Box<RagError>,
    },
}

/// Underlying cause of a [`RagError::StorageIo`].
#[derive(Debug, Error)]
pub enum StorageCause {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage handle lock poisoned")]
    Poisoned,
}

impl RagError {
    pub fn config(message: impl Into<String>) -> Self {
        RagError::Configuration(message.into())
    }

    pub fn storage(
        operation: &'static str,
        target: impl Into<String>,
        cause: impl Into<StorageCause>,
    ) -> Self {
        RagError::StorageIo {
            operation,
            target: target.into(),
            source: cause.into(),
        }
    }

    /// Whether repeating the failed call can succeed.
    ///
    /// Upsert, delete and query are idempotent by id, so transient storage
    /// failures are safe to retry. Configuration and dimension errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::StorageIo { source, .. } => !matches!(source, StorageCause::Corrupt(_)),
            RagError::Ingest { source, .. } => source.is_retryable(),
            RagError::Configuration(_)
            | RagError::EmbeddingUnavailable(_)
            | RagError::Embedding(_)
            | RagError::DimensionMismatch { .. } => false,
        }
    }
}

/// Attaches an operation and target to lower-level storage results.
pub trait StorageContext<T> {
    fn storage_context<F>(self, operation: &'static str, target: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> StorageContext<T> for std::result::Result<T, E>
where
    E: Into<StorageCause>,
{
    fn storage_context<F>(self, operation: &'static str, target: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| RagError::storage(operation, target(), err))
    }
}
