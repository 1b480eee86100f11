//! libSQL-backed vector store.
//!
//! [`VectorStore`] persists embedded chunks (with the store tag describing
//! what they were built with) and answers nearest-neighbor queries from an
//! in-memory cosine index loaded at open.
//!
//! **Access rules:**
//! - Ingestion: single writer; upserts are write-through (database first,
//!   then the in-memory index).
//! - Query path: read-only over the loaded index, safe for concurrent use
//!   behind `&self`.

mod index;
mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::info;
use uuid::Uuid;

use handbookqa_shared::{HandbookQaError, Result, RetrievedChunk, StoreMeta, VectorRecord};

use crate::index::VectorIndex;

/// Durable vector store with an in-memory similarity index.
pub struct VectorStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    meta: Option<StoreMeta>,
    index: VectorIndex,
}

impl VectorStore {
    /// Open or create a store at `path`, apply migrations, and load the
    /// tag plus all records into the in-memory index.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HandbookQaError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;

        let mut store = Self {
            db,
            conn,
            meta: None,
            index: VectorIndex::default(),
        };
        store.run_migrations().await?;
        store.meta = store.load_meta().await?;
        store.index = VectorIndex::from_records(store.load_records().await?);

        info!(
            records = store.index.len(),
            tagged = store.meta.is_some(),
            "vector store opened"
        );
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        HandbookQaError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Store tag
    // -----------------------------------------------------------------------

    /// The persisted tag, if the store has been built before.
    pub fn meta(&self) -> Option<&StoreMeta> {
        self.meta.as_ref()
    }

    /// Refuse to reuse a store whose tag does not match the active
    /// configuration. An untagged (fresh) store passes.
    pub fn ensure_compatible(&self, model_version: &str, corpus_fingerprint: &str) -> Result<()> {
        let Some(meta) = &self.meta else {
            return Ok(());
        };
        if meta.model_version != model_version {
            return Err(HandbookQaError::config(format!(
                "persisted store was built with embedding model '{}' but '{}' is configured; re-ingest to rebuild",
                meta.model_version, model_version
            )));
        }
        if meta.corpus_fingerprint != corpus_fingerprint {
            return Err(HandbookQaError::config(
                "persisted store was built from a different corpus or chunking configuration; re-ingest to rebuild",
            ));
        }
        Ok(())
    }

    /// Install or replace the store tag.
    pub async fn set_meta(&mut self, meta: StoreMeta) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO store_meta (id, dimensions, model_version, corpus_fingerprint, created_at, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   dimensions = excluded.dimensions,
                   model_version = excluded.model_version,
                   corpus_fingerprint = excluded.corpus_fingerprint,
                   updated_at = excluded.updated_at",
                params![
                    meta.dimensions as i64,
                    meta.model_version.as_str(),
                    meta.corpus_fingerprint.as_str(),
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;
        self.meta = Some(meta);
        Ok(())
    }

    async fn load_meta(&self) -> Result<Option<StoreMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT dimensions, model_version, corpus_fingerprint FROM store_meta WHERE id = 1",
                params![],
            )
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let dimensions: i64 = row
                    .get(0)
                    .map_err(|e| HandbookQaError::Storage(e.to_string()))?;
                Ok(Some(StoreMeta {
                    dimensions: dimensions as usize,
                    model_version: row
                        .get::<String>(1)
                        .map_err(|e| HandbookQaError::Storage(e.to_string()))?,
                    corpus_fingerprint: row
                        .get::<String>(2)
                        .map_err(|e| HandbookQaError::Storage(e.to_string()))?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(HandbookQaError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Insert or replace a record by chunk id. Requires the tag to be set;
    /// the record's vector must match the tagged dimension.
    pub async fn upsert(&mut self, record: &VectorRecord) -> Result<()> {
        let Some(meta) = &self.meta else {
            return Err(HandbookQaError::Storage(
                "store tag must be set before records are written".into(),
            ));
        };
        if record.vector.len() != meta.dimensions {
            return Err(HandbookQaError::config(format!(
                "record '{}' has dimension {} but the store is tagged with {}",
                record.chunk_id,
                record.vector.len(),
                meta.dimensions
            )));
        }

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO chunks (chunk_id, document_url, seq, text, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                   document_url = excluded.document_url,
                   seq = excluded.seq,
                   text = excluded.text,
                   embedding = excluded.embedding",
                params![
                    record.chunk_id.0.as_str(),
                    record.document_url.as_str(),
                    record.seq as i64,
                    record.text.as_str(),
                    vector_to_blob(&record.vector),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;

        self.index.upsert(record.clone());
        Ok(())
    }

    /// Nearest-neighbor lookup over the loaded index. An empty store
    /// returns an empty list, never an error.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let meta = self.meta.as_ref().expect("non-empty store is tagged");
        if vector.len() != meta.dimensions {
            return Err(HandbookQaError::config(format!(
                "query vector has dimension {} but the store is tagged with {}",
                vector.len(),
                meta.dimensions
            )));
        }

        Ok(self.index.search(vector, k))
    }

    /// Delete all records and the tag (explicit re-ingestion path).
    pub async fn reset(&mut self) -> Result<()> {
        self.conn
            .execute("DELETE FROM chunks", params![])
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;
        self.conn
            .execute("DELETE FROM store_meta", params![])
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;
        self.index.clear();
        self.meta = None;
        Ok(())
    }

    /// Load all records in insertion (rowid) order.
    async fn load_records(&self) -> Result<Vec<VectorRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT chunk_id, document_url, seq, text, embedding
                 FROM chunks ORDER BY rowid",
                params![],
            )
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Ingestion run history
    // -----------------------------------------------------------------------

    /// Insert a new ingestion run. Returns the generated run ID.
    pub async fn record_ingestion_run(&self) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingestion_runs (id, started_at) VALUES (?1, ?2)",
                params![id.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Update an ingestion run with completion data.
    pub async fn finish_ingestion_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE ingestion_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Encode an embedding vector as little-endian f32 bytes.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode little-endian f32 bytes back into an embedding vector.
fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(HandbookQaError::Storage(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

/// Convert a database row to a [`VectorRecord`].
fn row_to_record(row: &libsql::Row) -> Result<VectorRecord> {
    let seq: i64 = row
        .get(2)
        .map_err(|e| HandbookQaError::Storage(e.to_string()))?;
    let blob: Vec<u8> = row
        .get(4)
        .map_err(|e| HandbookQaError::Storage(e.to_string()))?;

    Ok(VectorRecord {
        chunk_id: handbookqa_shared::ChunkId(
            row.get::<String>(0)
                .map_err(|e| HandbookQaError::Storage(e.to_string()))?,
        ),
        document_url: row
            .get::<String>(1)
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?,
        seq: seq as usize,
        text: row
            .get::<String>(3)
            .map_err(|e| HandbookQaError::Storage(e.to_string()))?,
        vector: blob_to_vector(&blob)?,
    })
}
