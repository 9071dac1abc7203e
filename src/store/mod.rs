// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector store port and shared record types.
//!
//! [`VectorStore`] is the only way the rest of the crate touches persisted
//! vectors. [`SqliteVectorStore`] is the adapter for the bundled SQLite
//! engine; no other module depends on SQLite directly.

pub mod filter;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::{RagError, Result};

pub use filter::MetadataFilter;
pub use sqlite::{SqliteVectorStore, WriteMode};

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    /// Orders two values of compatible kinds. Numbers compare numerically,
    /// strings lexicographically, bools only for equality.
    pub fn compare(&self, other: &MetadataValue) -> Option<Ordering> {
        match (self, other) {
            (MetadataValue::Str(a), MetadataValue::Str(b)) => Some(a.cmp(b)),
            (MetadataValue::Bool(a), MetadataValue::Bool(b)) if a == b => Some(Ordering::Equal),
            (MetadataValue::Bool(_), MetadataValue::Bool(_)) => None,
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Equality across numeric kinds (`Int(2) == Float(2.0)`).
    pub fn matches(&self, other: &MetadataValue) -> bool {
        match (self, other) {
            (MetadataValue::Bool(a), MetadataValue::Bool(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(v) => Some(*v as f64),
            MetadataValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// NaN and infinities have no JSON form and cannot be stored.
    pub fn is_storable(&self) -> bool {
        match self {
            MetadataValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Int(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Record metadata, ordered by key so serialization is deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Similarity function used to rank records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

impl SimilarityMetric {
    /// Scores two equal-length vectors; higher is more similar.
    ///
    /// Euclidean distance `d` is reported as `1 / (1 + d)`, so an exact match
    /// scores 1.0 under every metric when vectors are unit length.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => cosine_similarity(a, b),
            SimilarityMetric::Dot => a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| f64::from(x) * f64::from(y))
                .sum::<f64>() as f32,
            SimilarityMetric::Euclidean => {
                let distance = a
                    .iter()
                    .zip(b.iter())
                    .map(|(&x, &y)| {
                        let d = f64::from(x) - f64::from(y);
                        d * d
                    })
                    .sum::<f64>()
                    .sqrt();
                (1.0 / (1.0 + distance)) as f32
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Dot => "dot",
            SimilarityMetric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "dot" => Ok(SimilarityMetric::Dot),
            "euclidean" | "l2" => Ok(SimilarityMetric::Euclidean),
            other => Err(RagError::config(format!(
                "unknown similarity metric '{}' (expected cosine, dot or euclidean)",
                other
            ))),
        }
    }
}

/// Computes cosine similarity between two vectors.
///
/// Sums are accumulated in f64 so components near the f32 range do not
/// overflow the magnitudes.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// A stored vector with its text and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// Unique within the collection
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Rejects metadata values that would not survive a round trip through storage.
    pub fn check_metadata(&self) -> Result<()> {
        match self.metadata.iter().find(|(_, value)| !value.is_storable()) {
            Some((key, value)) => Err(RagError::config(format!(
                "metadata key '{}' of record '{}' holds {}, which cannot be stored",
                key, self.id, value
            ))),
            None => Ok(()),
        }
    }
}

/// One ranked hit from [`VectorStore::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub record_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// What a collection is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    /// Embedding model expected to fill the collection. `None` accepts
    /// whatever the collection already records.
    pub model: Option<String>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric: SimilarityMetric::Cosine,
            model: None,
        }
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RagError::config("collection name must not be empty"));
        }
        if self.dimension == 0 {
            return Err(RagError::config("collection dimension must be greater than 0"));
        }
        Ok(())
    }
}

/// A persisted collection as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    /// Model id of the provider whose vectors fill the collection, once bound
    pub model: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// A persistent collection of vector records.
///
/// Implementations must be safe to share between threads: mutations of one id
/// serialize, and queries never observe a partially written record.
pub trait VectorStore: Send + Sync {
    /// The collection this store is bound to.
    fn collection(&self) -> &CollectionInfo;

    /// Inserts or replaces a record.
    fn upsert(&self, record: &VectorRecord) -> Result<()>;

    /// Inserts or replaces many records; either all are written or none.
    fn upsert_batch(&self, records: &[VectorRecord]) -> Result<()>;

    /// Returns up to `k` records passing `filter`, by descending score.
    /// Equal scores keep insertion order.
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>>;

    /// Fetches a record by id.
    fn get(&self, id: &str) -> Result<Option<VectorRecord>>;

    /// Removes a record. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Removes every record passing `filter`. Returns how many were removed.
    fn delete_where(&self, filter: &MetadataFilter) -> Result<usize>;

    /// Number of records in the collection.
    fn count(&self) -> Result<u64>;

    /// Makes buffered writes durable.
    fn flush(&self) -> Result<()>;

    /// Flushes and compacts so the store's primary file holds every record.
    fn persist(&self) -> Result<()>;

    /// Fails with [`RagError::DimensionMismatch`] unless `vector` fits the collection.
    fn check_dimension(&self, operation: &'static str, target: &str, vector: &[f32]) -> Result<()> {
        let expected = self.collection().dimension;
        if vector.len() != expected {
            return Err(RagError::DimensionMismatch {
                operation,
                target: target.to_string(),
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
