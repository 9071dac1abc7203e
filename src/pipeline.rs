// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion and retrieval over a chunker, an embedding provider and a vector store.
//!
//! A document is chunked, every chunk is embedded in one provider call and each
//! chunk is upserted as a record with id `"{source_id}:{sequence_index}"`.
//! Ingestion is all-or-nothing per document: when the store fails part way, the
//! records this call touched are restored before the error is returned.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PipelineSettings};
use crate::embedding::chunker::{Chunk, TextChunker};
use crate::embedding::selector::{global_provider, SharedProvider};
use crate::errors::{RagError, Result};
use crate::store::{
    Metadata, MetadataFilter, MetadataValue, QueryResult, SqliteVectorStore, VectorRecord,
    VectorStore,
};

/// Metadata key holding the source document id.
pub const SOURCE_ID_KEY: &str = "source_id";
/// Metadata key holding the chunk position within its document.
pub const SEQUENCE_INDEX_KEY: &str = "sequence_index";
/// Metadata key holding the first character offset of the chunk.
pub const START_OFFSET_KEY: &str = "start_offset";
/// Metadata key holding the end character offset of the chunk (exclusive).
pub const END_OFFSET_KEY: &str = "end_offset";

/// A source document to ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source_id: String,
    pub text: String,
    /// Copied onto every chunk record. Reserved chunk keys take precedence.
    pub metadata: Metadata,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Summary of one successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedDocument {
    pub source_id: String,
    pub chunk_count: usize,
}

/// Result of ingesting one document of a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub source_id: String,
    pub result: Result<IngestedDocument>,
}

/// Per-document outcomes of [`RagPipeline::ingest_batch`], in input order.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl IngestReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &IngestedDocument> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &RagError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.source_id.as_str(), e)))
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Chunks written across all successful documents.
    pub fn total_chunks(&self) -> usize {
        self.succeeded().map(|d| d.chunk_count).sum()
    }
}

/// Composes chunking, embedding and storage.
pub struct RagPipeline {
    settings: PipelineSettings,
    chunker: TextChunker,
    provider: SharedProvider,
    store: Arc<dyn VectorStore>,
}

impl RagPipeline {
    /// Builds a pipeline, failing fast on invalid settings or on a provider
    /// whose dimension or model differs from the collection's.
    pub fn new(
        settings: PipelineSettings,
        provider: SharedProvider,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        settings.validate()?;
        let chunker = TextChunker::new(settings.chunk_config()?);

        let collection = store.collection();
        if provider.dimension() != collection.dimension {
            return Err(RagError::config(format!(
                "embedding provider {} produces {}-dimensional vectors but collection '{}' holds {}-dimensional vectors",
                provider.model_id(),
                provider.dimension(),
                collection.name,
                collection.dimension
            )));
        }
        if let Some(model) = collection.model.as_deref() {
            if model != provider.model_id() {
                return Err(RagError::config(format!(
                    "collection '{}' holds vectors from embedding model {} but the provider is {}",
                    collection.name,
                    model,
                    provider.model_id()
                )));
            }
        }
        if settings.embedding_dimensionality != collection.dimension {
            return Err(RagError::config(format!(
                "configured dimensionality {} does not match collection '{}' ({})",
                settings.embedding_dimensionality, collection.name, collection.dimension
            )));
        }
        if settings.similarity_metric != collection.metric {
            return Err(RagError::config(format!(
                "configured metric {} does not match collection '{}' ({})",
                settings.similarity_metric, collection.name, collection.metric
            )));
        }

        info!(
            collection = %collection.name,
            model = provider.model_id(),
            dimension = collection.dimension,
            "pipeline ready"
        );

        Ok(Self {
            settings,
            chunker,
            provider,
            store,
        })
    }

    /// Builds a pipeline from configuration: the process-wide provider and the
    /// SQLite collection at the configured location, bound to the provider's model.
    pub fn open(config: &Config) -> Result<Self> {
        let settings = config.settings();
        settings.validate()?;
        let provider = global_provider(&config.provider_settings()?)?;
        let store = SqliteVectorStore::open(
            &settings.storage_location,
            &settings.collection_spec().with_model(provider.model_id()),
            settings.write_mode,
        )?;
        Self::new(settings, provider, Arc::new(store))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Chunks, embeds and stores one document, replacing any previous version.
    pub fn ingest(&self, document: &Document) -> Result<IngestedDocument> {
        let chunks = self.chunker.chunk(&document.source_id, &document.text);
        self.embed_chunks(&chunks)
            .and_then(|vectors| self.index_document(document, &chunks, vectors))
            .map_err(|err| ingest_error(&document.source_id, err))
    }

    /// Ingests many documents, embedding all of their chunks in bulk.
    ///
    /// If the bulk embedding call fails, each document is embedded on its own
    /// so only the offending documents fail.
    pub fn ingest_batch(&self, documents: &[Document]) -> IngestReport {
        let chunked = self.chunker.chunk_documents(
            documents
                .iter()
                .map(|d| (d.source_id.as_str(), d.text.as_str())),
        );

        let texts: Vec<String> = chunked
            .iter()
            .flatten()
            .map(|chunk| chunk.text.clone())
            .collect();
        let bulk = if texts.is_empty() {
            Some(Vec::new())
        } else {
            match self.embed_texts(&texts) {
                Ok(vectors) => Some(vectors),
                Err(err) => {
                    warn!(error = %err, "bulk embedding failed; embedding documents individually");
                    None
                }
            }
        };
        let mut bulk = bulk.map(Vec::into_iter);

        let mut report = IngestReport::default();
        for (document, chunks) in documents.iter().zip(chunked) {
            let vectors = match bulk.as_mut() {
                Some(vectors) => Ok(vectors.by_ref().take(chunks.len()).collect()),
                None => self.embed_chunks(&chunks),
            };
            let result = vectors
                .and_then(|vectors| self.index_document(document, &chunks, vectors))
                .map_err(|err| ingest_error(&document.source_id, err));

            if let Err(err) = &result {
                warn!(source_id = %document.source_id, error = %err, "document ingestion failed");
            }
            report.outcomes.push(DocumentOutcome {
                source_id: document.source_id.clone(),
                result,
            });
        }
        report
    }

    /// Returns the `k` chunks most similar to `query`.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<QueryResult>> {
        self.search(query, k, None)
    }

    /// Like [`retrieve`](Self::retrieve), restricted to chunks whose metadata passes `filter`.
    pub fn retrieve_filtered(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<QueryResult>> {
        self.search(query, k, Some(filter))
    }

    /// Deletes every chunk of a document. Returns how many were removed.
    pub fn remove_document(&self, source_id: &str) -> Result<usize> {
        let removed = self
            .store
            .delete_where(&MetadataFilter::eq(SOURCE_ID_KEY, source_id))?;
        info!(source_id, removed, "removed document");
        Ok(removed)
    }

    pub fn persist(&self) -> Result<()> {
        self.store.persist()
    }

    fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>> {
        if k == 0 {
            return Err(RagError::config("k must be at least 1"));
        }
        let vector = self.provider.embed_one(query)?;
        let results = self.store.query(&vector, k, filter)?;
        debug!(k, hits = results.len(), "retrieved chunks");
        Ok(results)
    }

    fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        self.embed_texts(&texts)
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.provider.embed_texts(texts)?;
        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "provider {} returned {} vectors for {} texts",
                self.provider.model_id(),
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Writes the chunk records of one document and removes its stale tail.
    fn index_document(
        &self,
        document: &Document,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<IngestedDocument> {
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| chunk_record(document, chunk, vector))
            .collect();

        let previous = records
            .iter()
            .map(|record| self.store.get(&record.id))
            .collect::<Result<Vec<_>>>()?;

        // (id, record it replaced)
        let mut touched: Vec<(String, Option<VectorRecord>)> = Vec::with_capacity(records.len());
        if previous.iter().all(Option::is_none) {
            // Nothing to restore, so one atomic batch replaces the rollback log.
            self.store.upsert_batch(&records)?;
            touched.extend(records.iter().map(|record| (record.id.clone(), None)));
        } else {
            for (record, previous) in records.iter().zip(previous) {
                if let Err(err) = self.store.upsert(record) {
                    self.rollback(&document.source_id, touched);
                    return Err(err);
                }
                touched.push((record.id.clone(), previous));
            }
        }

        let stale = MetadataFilter::eq(SOURCE_ID_KEY, document.source_id.as_str())
            .and(MetadataFilter::gte(SEQUENCE_INDEX_KEY, chunks.len()));
        match self.store.delete_where(&stale) {
            Ok(removed) if removed > 0 => {
                debug!(source_id = %document.source_id, removed, "removed stale chunks");
            }
            Ok(_) => {}
            Err(err) => {
                self.rollback(&document.source_id, touched);
                return Err(err);
            }
        }

        debug!(source_id = %document.source_id, chunks = chunks.len(), "ingested document");
        Ok(IngestedDocument {
            source_id: document.source_id.clone(),
            chunk_count: chunks.len(),
        })
    }

    /// Restores replaced records and deletes new ones, newest first.
    fn rollback(&self, source_id: &str, touched: Vec<(String, Option<VectorRecord>)>) {
        let count = touched.len();
        for (id, previous) in touched.into_iter().rev() {
            let restored = match previous {
                Some(record) => self.store.upsert(&record),
                None => self.store.delete(&id).map(|_| ()),
            };
            if let Err(err) = restored {
                error!(source_id, id = %id, error = %err, "failed to roll back chunk");
            }
        }
        if count > 0 {
            warn!(source_id, chunks = count, "rolled back partial ingestion");
        }
    }
}

fn chunk_record(document: &Document, chunk: &Chunk, vector: Vec<f32>) -> VectorRecord {
    let mut metadata = document.metadata.clone();
    metadata.insert(SOURCE_ID_KEY.to_string(), MetadataValue::from(chunk.source_id.as_str()));
    metadata.insert(SEQUENCE_INDEX_KEY.to_string(), MetadataValue::from(chunk.sequence_index));
    metadata.insert(START_OFFSET_KEY.to_string(), MetadataValue::from(chunk.start_offset));
    metadata.insert(END_OFFSET_KEY.to_string(), MetadataValue::from(chunk.end_offset));

    VectorRecord::new(chunk.id.clone(), vector, chunk.text.clone()).with_metadata(metadata)
}

fn ingest_error(source_id: &str, err: RagError) -> RagError {
    RagError::Ingest {
        source_id: source_id.to_string(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::{EmbeddingProvider, HashEmbedder};
    use crate::errors::StorageCause;
    use crate::store::{CollectionInfo, CollectionSpec, SimilarityMetric};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 64;

    fn settings(max: usize, overlap: usize) -> PipelineSettings {
        PipelineSettings {
            max_chunk_size: max,
            overlap_size: overlap,
            embedding_dimensionality: DIM,
            collection: "docs".to_string(),
            ..PipelineSettings::default()
        }
    }

    fn memory_store() -> SqliteVectorStore {
        SqliteVectorStore::open_in_memory(&CollectionSpec::new("docs", DIM)).unwrap()
    }

    fn hash_provider() -> SharedProvider {
        Arc::new(HashEmbedder::new(DIM).unwrap())
    }

    fn pipeline_with(store: Arc<dyn VectorStore>, provider: SharedProvider) -> RagPipeline {
        RagPipeline::new(settings(20, 5), provider, store).unwrap()
    }

    /// Fails the n-th record write (1-based), then behaves normally. A batch
    /// containing the failing write writes nothing.
    struct FlakyStore {
        inner: SqliteVectorStore,
        fail_on: usize,
        upserts: AtomicUsize,
    }

    impl FlakyStore {
        fn new(fail_on: usize) -> Self {
            Self {
                inner: memory_store(),
                fail_on,
                upserts: AtomicUsize::new(0),
            }
        }
    }

    impl VectorStore for FlakyStore {
        fn collection(&self) -> &CollectionInfo {
            self.inner.collection()
        }

        fn upsert(&self, record: &VectorRecord) -> Result<()> {
            let n = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(RagError::storage(
                    "upsert",
                    format!("record '{}'", record.id),
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ));
            }
            self.inner.upsert(record)
        }

        fn upsert_batch(&self, records: &[VectorRecord]) -> Result<()> {
            let first = self.upserts.fetch_add(records.len(), Ordering::SeqCst) + 1;
            if (first..first + records.len()).contains(&self.fail_on) {
                return Err(RagError::storage(
                    "upsert_batch",
                    "collection 'docs'".to_string(),
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ));
            }
            self.inner.upsert_batch(records)
        }

        fn query(
            &self,
            vector: &[f32],
            k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<Vec<QueryResult>> {
            self.inner.query(vector, k, filter)
        }

        fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
            self.inner.get(id)
        }

        fn delete(&self, id: &str) -> Result<bool> {
            self.inner.delete(id)
        }

        fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
            self.inner.delete_where(filter)
        }

        fn count(&self) -> Result<u64> {
            self.inner.count()
        }

        fn flush(&self) -> Result<()> {
            self.inner.flush()
        }

        fn persist(&self) -> Result<()> {
            self.inner.persist()
        }
    }

    /// Hash embeddings, except texts containing "POISON" fail the whole call.
    struct PickyProvider {
        inner: HashEmbedder,
    }

    impl EmbeddingProvider for PickyProvider {
        fn model_id(&self) -> &str {
            "picky"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn batch_size(&self) -> usize {
            self.inner.batch_size()
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("POISON")) {
                return Err(RagError::Embedding("inference failed".to_string()));
            }
            self.inner.embed_texts(texts)
        }
    }

    fn stored_texts(store: &dyn VectorStore, source_id: &str) -> Vec<String> {
        let mut index = 0;
        let mut texts = Vec::new();
        while let Some(record) = store.get(&Chunk::make_id(source_id, index)).unwrap() {
            texts.push(record.text);
            index += 1;
        }
        texts
    }

    #[test]
    fn test_ingest_writes_chunk_records() {
        let store = Arc::new(memory_store());
        let pipeline = pipeline_with(store.clone(), hash_provider());

        let mut metadata = Metadata::new();
        metadata.insert("lang".into(), "en".into());
        metadata.insert(SOURCE_ID_KEY.into(), "spoofed".into());
        let doc = Document::new("fox", "The quick brown fox. It jumps over the lazy dog.")
            .with_metadata(metadata);

        let ingested = pipeline.ingest(&doc).unwrap();
        assert_eq!(ingested.chunk_count, 3);
        assert_eq!(store.count().unwrap(), 3);

        let second = store.get("fox:1").unwrap().unwrap();
        assert_eq!(second.text, " fox. It jumps over ");
        assert_eq!(second.metadata[SOURCE_ID_KEY], MetadataValue::from("fox"));
        assert_eq!(second.metadata[SEQUENCE_INDEX_KEY], MetadataValue::Int(1));
        assert_eq!(second.metadata[START_OFFSET_KEY], MetadataValue::Int(15));
        assert_eq!(second.metadata[END_OFFSET_KEY], MetadataValue::Int(35));
        assert_eq!(second.metadata["lang"], MetadataValue::from("en"));
    }

    #[test]
    fn test_reingest_is_idempotent_and_drops_stale_tail() {
        let store = Arc::new(memory_store());
        let pipeline = pipeline_with(store.clone(), hash_provider());
        let long = Document::new("doc", "The quick brown fox. It jumps over the lazy dog.");

        pipeline.ingest(&long).unwrap();
        pipeline.ingest(&long).unwrap();
        assert_eq!(store.count().unwrap(), 3);

        let short = Document::new("doc", "A short note.");
        assert_eq!(pipeline.ingest(&short).unwrap().chunk_count, 1);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get("doc:1").unwrap().is_none());
        assert_eq!(store.get("doc:0").unwrap().unwrap().text, "A short note.");
    }

    #[test]
    fn test_empty_document_removes_previous_chunks() {
        let store = Arc::new(memory_store());
        let pipeline = pipeline_with(store.clone(), hash_provider());

        pipeline.ingest(&Document::new("doc", "some text that spans chunks")).unwrap();
        pipeline.ingest(&Document::new("other", "kept")).unwrap();
        let ingested = pipeline.ingest(&Document::new("doc", "")).unwrap();

        assert_eq!(ingested.chunk_count, 0);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get("other:0").unwrap().is_some());
    }

    #[test]
    fn test_store_failure_rolls_back_new_document() {
        let store = Arc::new(FlakyStore::new(2));
        let pipeline = pipeline_with(store.clone(), hash_provider());

        let err = pipeline
            .ingest(&Document::new("doc", "The quick brown fox. It jumps over the lazy dog."))
            .unwrap_err();

        match &err {
            RagError::Ingest { source_id, source } => {
                assert_eq!(source_id, "doc");
                assert!(matches!(
                    source.as_ref(),
                    RagError::StorageIo { source: StorageCause::Io(_), .. }
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_store_failure_restores_previous_version() {
        // 3 upserts for the first ingest, the 5th fails on re-ingest
        let store = Arc::new(FlakyStore::new(5));
        let pipeline = pipeline_with(store.clone(), hash_provider());

        let original = Document::new("doc", "The quick brown fox. It jumps over the lazy dog.");
        pipeline.ingest(&original).unwrap();
        let before = stored_texts(store.as_ref(), "doc");

        let revised = Document::new("doc", "Completely different words replace the old story here.");
        assert!(pipeline.ingest(&revised).is_err());

        assert_eq!(stored_texts(store.as_ref(), "doc"), before);
        assert_eq!(store.count().unwrap(), 3);

        // Retrying succeeds once the store recovers.
        assert!(pipeline.ingest(&revised).is_ok());
        assert_ne!(stored_texts(store.as_ref(), "doc"), before);
    }

    #[test]
    fn test_embedding_failure_writes_nothing() {
        let store = Arc::new(memory_store());
        let provider: SharedProvider = Arc::new(PickyProvider {
            inner: HashEmbedder::new(DIM).unwrap(),
        });
        let pipeline = pipeline_with(store.clone(), provider);

        let err = pipeline.ingest(&Document::new("bad", "POISON pill")).unwrap_err();
        assert!(matches!(err, RagError::Ingest { .. }));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_batch_isolates_failures() {
        let store = Arc::new(memory_store());
        let provider: SharedProvider = Arc::new(PickyProvider {
            inner: HashEmbedder::new(DIM).unwrap(),
        });
        let pipeline = pipeline_with(store.clone(), provider);

        let report = pipeline.ingest_batch(&[
            Document::new("a", "alpha document"),
            Document::new("b", "POISON"),
            Document::new("c", "gamma document"),
        ]);

        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!report.is_success());
        assert_eq!(report.succeeded().count(), 2);
        let failed: Vec<&str> = report.failed().map(|(id, _)| id).collect();
        assert_eq!(failed, vec!["b"]);

        assert!(store.get("a:0").unwrap().is_some());
        assert!(store.get("b:0").unwrap().is_none());
        assert!(store.get("c:0").unwrap().is_some());
    }

    #[test]
    fn test_batch_bulk_path_matches_single_ingest() {
        let batch_store = Arc::new(memory_store());
        let single_store = Arc::new(memory_store());
        let batch = pipeline_with(batch_store.clone(), hash_provider());
        let single = pipeline_with(single_store.clone(), hash_provider());

        let docs = vec![
            Document::new("one", "The quick brown fox. It jumps over the lazy dog."),
            Document::new("empty", ""),
            Document::new("two", "Pack my box with five dozen liquor jugs."),
        ];
        let report = batch.ingest_batch(&docs);
        assert!(report.is_success());
        for doc in &docs {
            single.ingest(doc).unwrap();
        }

        assert_eq!(report.total_chunks() as u64, batch_store.count().unwrap());
        for id in ["one:0", "one:2", "two:0", "two:1"] {
            let a = batch_store.get(id).unwrap().unwrap();
            let b = single_store.get(id).unwrap().unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_retrieve_and_remove() {
        let store = Arc::new(memory_store());
        let pipeline = pipeline_with(store.clone(), hash_provider());
        pipeline.ingest(&Document::new("cats", "cats purr softly")).unwrap();
        pipeline.ingest(&Document::new("dogs", "dogs bark loudly")).unwrap();

        let hits = pipeline.retrieve("dogs bark", 1).unwrap();
        assert_eq!(hits[0].record_id, "dogs:0");

        let only_cats = MetadataFilter::eq(SOURCE_ID_KEY, "cats");
        let hits = pipeline.retrieve_filtered("dogs bark", 5, &only_cats).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "cats:0");

        assert!(matches!(pipeline.retrieve("dogs", 0), Err(RagError::Configuration(_))));

        assert_eq!(pipeline.remove_document("dogs").unwrap(), 1);
        assert_eq!(pipeline.remove_document("dogs").unwrap(), 0);
        assert!(pipeline
            .retrieve("dogs bark", 5)
            .unwrap()
            .iter()
            .all(|hit| hit.record_id != "dogs:0"));
    }

    /// Same dimension as the hash embedder under another model id.
    struct OtherModel {
        inner: HashEmbedder,
    }

    impl EmbeddingProvider for OtherModel {
        fn model_id(&self) -> &str {
            "sentence-transformers/all-MiniLM-L6-v2"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn batch_size(&self) -> usize {
            self.inner.batch_size()
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.inner.embed_texts(texts)
        }
    }

    #[test]
    fn test_collection_filled_by_another_model_is_rejected() {
        let hash = hash_provider();
        let spec = CollectionSpec::new("docs", DIM).with_model(hash.model_id());
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory(&spec).unwrap());
        let pipeline = pipeline_with(store.clone(), hash);
        pipeline.ingest(&Document::new("doc", "hash filled")).unwrap();

        let other: SharedProvider = Arc::new(OtherModel {
            inner: HashEmbedder::new(DIM).unwrap(),
        });
        let result = RagPipeline::new(settings(20, 5), other, store.clone());
        assert!(matches!(result, Err(RagError::Configuration(_))));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_fresh_document_is_written_as_one_batch() {
        // The batch holds writes 1..=3, so the failure leaves nothing behind.
        let store = Arc::new(FlakyStore::new(3));
        let pipeline = pipeline_with(store.clone(), hash_provider());
        let doc = Document::new("doc", "The quick brown fox. It jumps over the lazy dog.");

        assert!(pipeline.ingest(&doc).is_err());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.upserts.load(Ordering::SeqCst), 3);

        assert_eq!(pipeline.ingest(&doc).unwrap().chunk_count, 3);
        assert_eq!(store.upserts.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_construction_fails_fast() {
        let provider: SharedProvider = Arc::new(HashEmbedder::new(32).unwrap());
        let result = RagPipeline::new(settings(20, 5), provider, Arc::new(memory_store()));
        assert!(matches!(result, Err(RagError::Configuration(_))));

        let result = RagPipeline::new(settings(20, 20), hash_provider(), Arc::new(memory_store()));
        assert!(matches!(result, Err(RagError::Configuration(_))));

        let dot_store = SqliteVectorStore::open_in_memory(
            &CollectionSpec::new("docs", DIM).with_metric(SimilarityMetric::Dot),
        )
        .unwrap();
        let result = RagPipeline::new(settings(20, 5), hash_provider(), Arc::new(dot_store));
        assert!(matches!(result, Err(RagError::Configuration(_))));
    }
}
