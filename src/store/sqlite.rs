// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-based storage for vector collections.
//!
//! One database file holds any number of named collections. Vectors are stored
//! as little-endian f32 blobs and metadata as JSON text; similarity search is a
//! brute-force scan of the collection. The rowid of a record is its insertion
//! position, which `ON CONFLICT DO UPDATE` preserves across replacements.
//!
//! Scans filtered on a string metadata value narrow the rows in SQL with
//! `json_extract` first; `source_id` has an expression index for this.

use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

use super::{
    CollectionInfo, CollectionSpec, Metadata, MetadataFilter, QueryResult, SimilarityMetric,
    VectorRecord, VectorStore,
};
use crate::errors::{RagError, Result, StorageCause, StorageContext};

const SCHEMA_VERSION: &str = "2";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UPSERT_SQL: &str = r#"
    INSERT INTO records (collection, record_id, text, metadata, embedding, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(collection, record_id) DO UPDATE SET
        text = excluded.text,
        metadata = excluded.metadata,
        embedding = excluded.embedding,
        updated_at = excluded.updated_at
"#;

/// When mutations become durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Every upsert and delete is committed before it returns.
    #[default]
    Immediate,
    /// Mutations accumulate in one open transaction until [`VectorStore::flush`].
    Buffered,
}

/// A collection stored in a SQLite database.
///
/// Stores default to `.ragcore/vectors.sqlite` when opened through the pipeline
/// configuration. The connection is guarded by a mutex, so the store can be
/// shared across threads.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    info: CollectionInfo,
    write_mode: WriteMode,
}

struct StoredRow {
    id: String,
    text: String,
    metadata: String,
    embedding: Vec<u8>,
}

impl SqliteVectorStore {
    /// Opens the collection described by `spec`, creating the database and the
    /// collection if needed.
    ///
    /// An existing collection with a different dimension or metric is a
    /// configuration error, and so is one already bound to another embedding
    /// model than `spec.model`. An unbound collection is bound to `spec.model`.
    pub fn open<P: AsRef<Path>>(path: P, spec: &CollectionSpec, write_mode: WriteMode) -> Result<Self> {
        spec.validate()?;
        let path = path.as_ref().to_path_buf();
        let conn = Self::connect(&path)?;
        let info = Self::ensure_collection(&conn, spec)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
            info,
            write_mode,
        })
    }

    /// Opens a collection that lives only as long as the returned store.
    pub fn open_in_memory(spec: &CollectionSpec) -> Result<Self> {
        spec.validate()?;
        let conn = Connection::open_in_memory()
            .storage_context("open", || "in-memory database".to_string())?;
        Self::init_schema(&conn)?;
        let info = Self::ensure_collection(&conn, spec)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            info,
            write_mode: WriteMode::Immediate,
        })
    }

    /// Opens an existing collection, reading its dimension and metric from disk.
    pub fn load<P: AsRef<Path>>(path: P, name: &str, write_mode: WriteMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(RagError::config(format!(
                "no vector store at {}",
                path.display()
            )));
        }

        let conn = Self::connect(&path)?;
        let info = Self::read_collection(&conn, name)?.ok_or_else(|| {
            RagError::config(format!(
                "collection '{}' does not exist in {}",
                name,
                path.display()
            ))
        })?;
        debug!(collection = name, path = %path.display(), "loaded collection");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
            info,
            write_mode,
        })
    }

    /// Lists every collection stored at `path`.
    pub fn list_collections<P: AsRef<Path>>(path: P) -> Result<Vec<CollectionInfo>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let conn = Self::connect(path)?;
        let target = || format!("store {}", path.display());
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM collections ORDER BY name", COLLECTION_COLUMNS))
            .storage_context("list_collections", target)?;
        let rows = stmt
            .query_map([], collection_row)
            .storage_context("list_collections", target)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .storage_context("list_collections", target)?;

        rows.into_iter().map(Self::collection_info).collect()
    }

    /// Deletes a collection and all of its records. Returns whether it existed.
    pub fn drop_collection<P: AsRef<Path>>(path: P, name: &str) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }

        let mut conn = Self::connect(path)?;
        let target = || format!("collection '{}'", name);
        let tx = conn.transaction().storage_context("drop_collection", target)?;
        tx.execute("DELETE FROM records WHERE collection = ?1", params![name])
            .storage_context("drop_collection", target)?;
        let dropped = tx
            .execute("DELETE FROM collections WHERE name = ?1", params![name])
            .storage_context("drop_collection", target)?;
        tx.commit().storage_context("drop_collection", target)?;

        if dropped > 0 {
            info!(collection = name, "dropped collection");
        }
        Ok(dropped > 0)
    }

    /// Persists and releases the storage handle.
    pub fn close(self) -> Result<()> {
        self.persist()
    }

    fn connect(path: &Path) -> Result<Connection> {
        let target = || format!("store {}", path.display());

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).storage_context("open", target)?;
        }

        let conn = Connection::open(path).storage_context("open", target)?;
        conn.busy_timeout(BUSY_TIMEOUT).storage_context("open", target)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .storage_context("open", target)?;
        conn.execute_batch("PRAGMA synchronous = FULL;")
            .storage_context("open", target)?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    /// Initializes the database schema if it does not exist.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                metric TEXT NOT NULL,
                model TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                record_id TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (collection, record_id)
            );

            INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '2');
            "#,
        )
        .storage_context("init_schema", || "schema".to_string())?;

        match Self::schema_version(conn)?.as_str() {
            SCHEMA_VERSION => {}
            "1" => Self::migrate_v1(conn)?,
            other => {
                return Err(RagError::config(format!(
                    "unsupported store schema version {} (expected {})",
                    other, SCHEMA_VERSION
                )))
            }
        }

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS records_source_id \
             ON records (collection, json_extract(metadata, '$.source_id'));",
        )
        .storage_context("init_schema", || "schema".to_string())?;
        Ok(())
    }

    fn schema_version(conn: &Connection) -> Result<String> {
        conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .storage_context("init_schema", || "schema".to_string())
    }

    /// Version 1 stores did not record the embedding model of a collection.
    fn migrate_v1(conn: &Connection) -> Result<()> {
        let target = || "schema".to_string();
        let tx = conn.unchecked_transaction().storage_context("migrate", target)?;
        if Self::schema_version(&tx)? == "1" {
            tx.execute_batch(
                r#"
                ALTER TABLE collections ADD COLUMN model TEXT;
                UPDATE meta SET value = '2' WHERE key = 'schema_version';
                "#,
            )
            .storage_context("migrate", target)?;
        }
        tx.commit().storage_context("migrate", target)?;
        info!("migrated vector store schema from version 1 to 2");
        Ok(())
    }

    fn ensure_collection(conn: &Connection, spec: &CollectionSpec) -> Result<CollectionInfo> {
        let target = || format!("collection '{}'", spec.name);

        if let Some(mut existing) = Self::read_collection(conn, &spec.name)? {
            if existing.dimension != spec.dimension || existing.metric != spec.metric {
                return Err(RagError::config(format!(
                    "collection '{}' was created with dimension {} and metric {}, not dimension {} and metric {}",
                    existing.name, existing.dimension, existing.metric, spec.dimension, spec.metric
                )));
            }

            if let (None, Some(model)) = (&existing.model, &spec.model) {
                // Another writer may bind first; re-read to see who won.
                conn.execute(
                    "UPDATE collections SET model = ?2 WHERE name = ?1 AND model IS NULL",
                    params![spec.name, model],
                )
                .storage_context("bind_model", target)?;
                if let Some(current) = Self::read_collection(conn, &spec.name)? {
                    existing = current;
                }
                debug!(collection = %spec.name, model = ?existing.model, "bound collection to embedding model");
            }
            if let (Some(bound), Some(model)) = (&existing.model, &spec.model) {
                if bound != model {
                    return Err(RagError::config(format!(
                        "collection '{}' holds vectors from embedding model {}, not {}",
                        existing.name, bound, model
                    )));
                }
            }
            return Ok(existing);
        }

        let created_at = unix_now();
        conn.execute(
            "INSERT INTO collections (name, dimension, metric, model, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                spec.name,
                spec.dimension as i64,
                spec.metric.as_str(),
                spec.model,
                created_at
            ],
        )
        .storage_context("create_collection", target)?;
        info!(
            collection = %spec.name,
            dimension = spec.dimension,
            metric = %spec.metric,
            model = spec.model.as_deref().unwrap_or("unbound"),
            "created collection"
        );

        Ok(CollectionInfo {
            name: spec.name.clone(),
            dimension: spec.dimension,
            metric: spec.metric,
            model: spec.model.clone(),
            created_at,
        })
    }

    fn read_collection(conn: &Connection, name: &str) -> Result<Option<CollectionInfo>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM collections WHERE name = ?1", COLLECTION_COLUMNS),
                params![name],
                collection_row,
            )
            .optional()
            .storage_context("read_collection", || format!("collection '{}'", name))?;

        row.map(Self::collection_info).transpose()
    }

    fn collection_info(row: CollectionRow) -> Result<CollectionInfo> {
        let CollectionRow {
            name,
            dimension,
            metric,
            model,
            created_at,
        } = row;
        let corrupt = |detail: String| {
            RagError::storage(
                "read_collection",
                format!("collection '{}'", name),
                StorageCause::Corrupt(detail),
            )
        };
        let dimension = usize::try_from(dimension)
            .map_err(|_| corrupt(format!("negative dimension {}", dimension)))?;
        let metric: SimilarityMetric = metric
            .parse()
            .map_err(|_| corrupt(format!("unknown metric '{}'", metric)))?;

        Ok(CollectionInfo {
            name,
            dimension,
            metric,
            model,
            created_at,
        })
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            RagError::storage(operation, self.collection_target(), StorageCause::Poisoned)
        })
    }

    fn collection_target(&self) -> String {
        format!("collection '{}'", self.info.name)
    }

    /// Opens the buffered transaction if this store defers commits.
    fn begin_write(&self, conn: &Connection, operation: &'static str) -> Result<()> {
        if self.write_mode == WriteMode::Buffered && conn.is_autocommit() {
            conn.execute_batch("BEGIN IMMEDIATE")
                .storage_context(operation, || self.collection_target())?;
        }
        Ok(())
    }

    fn write_record(&self, conn: &Connection, record: &VectorRecord, updated_at: i64) -> Result<()> {
        let target = || format!("record '{}'", record.id);
        let metadata = serde_json::to_string(&record.metadata).storage_context("upsert", target)?;
        let mut stmt = conn.prepare_cached(UPSERT_SQL).storage_context("upsert", target)?;
        stmt.execute(params![
            self.info.name,
            record.id,
            record.text,
            metadata,
            embedding_to_blob(&record.vector),
            updated_at
        ])
        .storage_context("upsert", target)?;
        Ok(())
    }

    /// Reads the rows of the collection that may pass `filter`, in insertion
    /// order. Callers still evaluate the full filter on the returned rows.
    fn scan(
        &self,
        conn: &Connection,
        operation: &'static str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<StoredRow>> {
        let narrowed = filter
            .and_then(MetadataFilter::required_str_eq)
            .filter(|(key, _)| is_plain_key(key));

        let mut stmt = conn
            .prepare_cached(&scan_sql(narrowed.map(|(key, _)| key)))
            .storage_context(operation, || self.collection_target())?;

        let to_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<StoredRow> {
            Ok(StoredRow {
                id: row.get(0)?,
                text: row.get(1)?,
                metadata: row.get(2)?,
                embedding: row.get(3)?,
            })
        };
        let rows = match narrowed {
            Some((_, value)) => stmt.query_map(params![self.info.name, value], to_row),
            None => stmt.query_map(params![self.info.name], to_row),
        }
        .storage_context(operation, || self.collection_target())?
        .collect::<std::result::Result<Vec<_>, _>>()
        .storage_context(operation, || self.collection_target())?;

        Ok(rows)
    }

    fn decode_metadata(operation: &'static str, row: &StoredRow) -> Result<Metadata> {
        serde_json::from_str(&row.metadata).storage_context(operation, || format!("record '{}'", row.id))
    }

    fn decode_embedding(&self, operation: &'static str, id: &str, blob: &[u8]) -> Result<Vec<f32>> {
        let embedding = blob_to_embedding(blob);
        if blob.len() % 4 != 0 || embedding.len() != self.info.dimension {
            return Err(RagError::storage(
                operation,
                format!("record '{}'", id),
                StorageCause::Corrupt(format!(
                    "embedding blob of {} bytes does not hold {} f32 values",
                    blob.len(),
                    self.info.dimension
                )),
            ));
        }
        Ok(embedding)
    }
}

impl VectorStore for SqliteVectorStore {
    fn collection(&self) -> &CollectionInfo {
        &self.info
    }

    fn upsert(&self, record: &VectorRecord) -> Result<()> {
        self.check_dimension("upsert", &format!("record '{}'", record.id), &record.vector)?;
        record.check_metadata()?;

        let conn = self.lock("upsert")?;
        self.begin_write(&conn, "upsert")?;
        self.write_record(&conn, record, unix_now())?;
        debug!(collection = %self.info.name, id = %record.id, "upserted record");
        Ok(())
    }

    fn upsert_batch(&self, records: &[VectorRecord]) -> Result<()> {
        for record in records {
            self.check_dimension("upsert", &format!("record '{}'", record.id), &record.vector)?;
            record.check_metadata()?;
        }
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock("upsert_batch")?;
        self.begin_write(&conn, "upsert_batch")?;
        let savepoint = conn
            .savepoint()
            .storage_context("upsert_batch", || self.collection_target())?;
        let updated_at = unix_now();
        for record in records {
            self.write_record(&savepoint, record, updated_at)?;
        }
        savepoint
            .commit()
            .storage_context("upsert_batch", || self.collection_target())?;

        debug!(collection = %self.info.name, count = records.len(), "upserted batch");
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>> {
        if k == 0 {
            return Err(RagError::config("query k must be at least 1"));
        }
        self.check_dimension("query", "query vector", vector)?;

        let rows = {
            let conn = self.lock("query")?;
            self.scan(&conn, "query", filter)?
        };

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata = Self::decode_metadata("query", &row)?;
            if filter.map_or(true, |f| f.matches(&metadata)) {
                candidates.push((row, metadata));
            }
        }

        let metric = self.info.metric;
        let mut results = candidates
            .into_par_iter()
            .map(|(row, metadata)| {
                let embedding = self.decode_embedding("query", &row.id, &row.embedding)?;
                Ok(QueryResult {
                    score: metric.score(vector, &embedding),
                    record_id: row.id,
                    text: row.text,
                    metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Stable sort: equal scores keep insertion order.
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(k);

        Ok(results)
    }

    fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        let row = {
            let conn = self.lock("get")?;
            conn.query_row(
                r#"
                SELECT record_id, text, metadata, embedding
                FROM records
                WHERE collection = ?1 AND record_id = ?2
                "#,
                params![self.info.name, id],
                |row| {
                    Ok(StoredRow {
                        id: row.get(0)?,
                        text: row.get(1)?,
                        metadata: row.get(2)?,
                        embedding: row.get(3)?,
                    })
                },
            )
            .optional()
            .storage_context("get", || format!("record '{}'", id))?
        };

        row.map(|row| {
            let metadata = Self::decode_metadata("get", &row)?;
            let vector = self.decode_embedding("get", &row.id, &row.embedding)?;
            Ok(VectorRecord {
                id: row.id,
                vector,
                text: row.text,
                metadata,
            })
        })
        .transpose()
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock("delete")?;
        self.begin_write(&conn, "delete")?;
        let deleted = conn
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND record_id = ?2",
                params![self.info.name, id],
            )
            .storage_context("delete", || format!("record '{}'", id))?;

        debug!(collection = %self.info.name, id, existed = deleted > 0, "deleted record");
        Ok(deleted > 0)
    }

    fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let mut conn = self.lock("delete_where")?;

        let mut matching = Vec::new();
        for row in self.scan(&conn, "delete_where", Some(filter))? {
            if filter.matches(&Self::decode_metadata("delete_where", &row)?) {
                matching.push(row.id);
            }
        }
        if matching.is_empty() {
            return Ok(0);
        }

        self.begin_write(&conn, "delete_where")?;
        let savepoint = conn
            .savepoint()
            .storage_context("delete_where", || self.collection_target())?;
        {
            let mut stmt = savepoint
                .prepare_cached("DELETE FROM records WHERE collection = ?1 AND record_id = ?2")
                .storage_context("delete_where", || self.collection_target())?;
            for id in &matching {
                stmt.execute(params![self.info.name, id])
                    .storage_context("delete_where", || format!("record '{}'", id))?;
            }
        }
        savepoint
            .commit()
            .storage_context("delete_where", || self.collection_target())?;

        debug!(collection = %self.info.name, count = matching.len(), "deleted matching records");
        Ok(matching.len())
    }

    fn count(&self) -> Result<u64> {
        let conn = self.lock("count")?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE collection = ?1",
                params![self.info.name],
                |row| row.get(0),
            )
            .storage_context("count", || self.collection_target())?;
        Ok(count as u64)
    }

    fn flush(&self) -> Result<()> {
        let conn = self.lock("flush")?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .storage_context("flush", || self.collection_target())?;
            debug!(collection = %self.info.name, "committed buffered writes");
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let conn = self.lock("persist")?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .storage_context("persist", || self.collection_target())?;
        }
        if self.path.is_some() {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .storage_context("persist", || self.collection_target())?;
        }
        debug!(collection = %self.info.name, "persisted collection");
        Ok(())
    }
}

impl Drop for SqliteVectorStore {
    fn drop(&mut self) {
        let conn = match self.conn.get_mut() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("COMMIT") {
                error!(collection = %self.info.name, error = %err, "failed to commit buffered writes on close");
            }
        }
    }
}

const COLLECTION_COLUMNS: &str = "name, dimension, metric, model, created_at";

struct CollectionRow {
    name: String,
    dimension: i64,
    metric: String,
    model: Option<String>,
    created_at: i64,
}

fn collection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionRow> {
    Ok(CollectionRow {
        name: row.get(0)?,
        dimension: row.get(1)?,
        metric: row.get(2)?,
        model: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Builds the collection scan, narrowed to one string value of `key` if given.
/// `key` must satisfy [`is_plain_key`].
fn scan_sql(key: Option<&str>) -> String {
    let narrow = key
        .map(|key| format!(" AND json_extract(metadata, '$.{}') = ?2", key))
        .unwrap_or_default();
    format!(
        "SELECT record_id, text, metadata, embedding FROM records WHERE collection = ?1{} ORDER BY rowid",
        narrow
    )
}

/// Keys that can be spliced into a JSON path without quoting.
fn is_plain_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Converts an embedding vector to a compact blob.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to an embedding vector.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
