//! SQLite-backed store implementation.
//!
//! A single database file holds documents, chunks, batch jobs and media
//! tasks, plus two virtual indexes over the chunk table: `chunks_fts`
//! (FTS5, external content, kept in sync by triggers) and `chunks_vec`
//! (sqlite-vec, cosine distance). Every write path is transactional.

use super::{
    BatchJob, BatchStatus, Chunk, ChunkType, Document, EmbeddingStatus, MediaTask, MediaType,
    Metadata, TaskStatus,
};
use crate::error::{Result, VitenError};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use tracing::{debug, info, instrument, warn};

/// SQL schema for the relational tables and the FTS index.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    media_type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    language TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding_status TEXT NOT NULL DEFAULT 'ready',
    batch_job_id INTEGER,
    error_message TEXT,
    UNIQUE (document_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index);
CREATE INDEX IF NOT EXISTS idx_chunks_status ON chunks(embedding_status);
CREATE INDEX IF NOT EXISTS idx_chunks_batch_job ON chunks(batch_job_id);

CREATE TABLE IF NOT EXISTS batch_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL DEFAULT 'pending',
    remote_job_id TEXT,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS media_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_path TEXT NOT NULL,
    media_type TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    user_prompt TEXT,
    context_text TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    description TEXT,
    alt_text TEXT,
    keywords TEXT,
    ocr_text TEXT,
    transcription TEXT,
    participants TEXT,
    action_items TEXT,
    duration_seconds REAL,
    result_chunk_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_tasks_status ON media_tasks(status, created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    metadata,
    content='chunks',
    content_rowid='id',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content, metadata)
    VALUES (new.id, new.content, new.metadata);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, metadata)
    VALUES ('delete', old.id, old.content, old.metadata);
    DELETE FROM chunks_vec WHERE rowid = old.id;
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, metadata)
    VALUES ('delete', old.id, old.content, old.metadata);
    INSERT INTO chunks_fts(rowid, content, metadata)
    VALUES (new.id, new.content, new.metadata);
END;
"#;

/// Registers sqlite-vec as an auto extension, once per process.
fn register_vector_extension() -> Result<()> {
    static INIT: Once = Once::new();
    static LOADED: AtomicBool = AtomicBool::new(false);

    INIT.call_once(|| {
        let rc = unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )))
        };
        LOADED.store(rc == rusqlite::ffi::SQLITE_OK, Ordering::SeqCst);
    });

    if LOADED.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(VitenError::Schema(
            "unable to load the sqlite-vec vector extension".to_string(),
        ))
    }
}

/// SQLite-backed knowledge base store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// `dimensions` is the store-wide embedding dimension; opening an
    /// existing store with a different dimension is an error.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn new(path: &Path, dimensions: usize) -> Result<Self> {
        register_vector_extension()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn, dimensions)?;

        info!("Opened knowledge base at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory(dimensions: usize) -> Result<Self> {
        register_vector_extension()?;

        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn, dimensions)?;

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    /// The store-wide embedding dimension.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn init_schema(conn: &Connection, dimensions: usize) -> Result<()> {
        // The vector table comes first: the chunk delete trigger references
        // it. Its dimension is baked into the DDL; verify it matches the
        // configured dimension before touching anything.
        let existing: Option<String> = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type='table' AND name='chunks_vec'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(sql) => {
                if !sql.contains(&format!("float[{}]", dimensions)) {
                    return Err(VitenError::Schema(format!(
                        "vector index dimension mismatch: store expects {} (table: {})",
                        dimensions, sql
                    )));
                }
            }
            None => {
                conn.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE chunks_vec USING vec0(embedding float[{}] distance_metric=cosine);",
                    dimensions
                ))?;
            }
        }

        conn.execute_batch(SCHEMA_SQL)?;

        // Bootstrap consistency: an empty FTS index over a non-empty chunk
        // table gets a one-shot populate; any other count mismatch means
        // the index is corrupt.
        let chunk_count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        let fts_count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks_fts", [], |r| r.get(0))?;

        if fts_count == 0 && chunk_count > 0 {
            info!("Populating empty FTS index from {} chunks", chunk_count);
            conn.execute_batch(
                "INSERT INTO chunks_fts(rowid, content, metadata)
                 SELECT id, content, metadata FROM chunks;",
            )?;
        } else if fts_count != chunk_count {
            return Err(VitenError::Schema(format!(
                "FTS index corruption: {} indexed rows for {} chunks",
                fts_count, chunk_count
            )));
        }

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VitenError::Schema(format!("store lock poisoned: {}", e)))
    }

    /// Serialize an embedding to little-endian f32 bytes.
    pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize an embedding from little-endian f32 bytes.
    pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(VitenError::Embedding(format!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }

    fn parse_metadata(json: &str) -> Metadata {
        serde_json::from_str::<Value>(json)
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let metadata_json: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        let media_type: String = row.get(2)?;

        Ok(Document {
            id: Some(row.get(0)?),
            content: row.get(1)?,
            media_type: media_type.parse().unwrap_or(MediaType::Text),
            metadata: Self::parse_metadata(&metadata_json),
            created_at: Self::parse_datetime(&created_at),
        })
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let chunk_type: String = row.get(4)?;
        let metadata_json: String = row.get(6)?;
        let status: String = row.get(7)?;

        Ok(Chunk {
            id: Some(row.get(0)?),
            document_id: Some(row.get(1)?),
            chunk_index: row.get(2)?,
            content: row.get(3)?,
            chunk_type: chunk_type.parse().unwrap_or(ChunkType::Text),
            language: row.get(5)?,
            metadata: Self::parse_metadata(&metadata_json),
            embedding: None,
            embedding_status: status.parse().unwrap_or(EmbeddingStatus::Ready),
            batch_job_id: row.get(8)?,
            error_message: row.get(9)?,
        })
    }

    const CHUNK_COLUMNS: &'static str = "id, document_id, chunk_index, content, chunk_type, \
         language, metadata, embedding_status, batch_job_id, error_message";

    /// Translate metadata filters into SQL fragments and parameters.
    ///
    /// Each filter becomes `json_extract(d.metadata, '$.<key>') = ?`.
    fn filter_clauses(filters: &[(String, Value)]) -> (String, Vec<Box<dyn ToSql>>) {
        let mut sql = String::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        for (key, value) in filters {
            sql.push_str(" AND json_extract(d.metadata, ?) = ?");
            values.push(Box::new(format!("$.{}", key)));
            values.push(match value {
                Value::String(s) => Box::new(s.clone()),
                Value::Bool(b) => Box::new(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Box::new(i)
                    } else {
                        Box::new(n.as_f64().unwrap_or(0.0))
                    }
                }
                other => Box::new(other.to_string()),
            });
        }

        (sql, values)
    }

    // ==================== Documents & chunks ====================

    /// Upsert a document and atomically replace its chunks.
    ///
    /// The incoming chunk set is diffed against the stored rows by
    /// `chunk_index`: a chunk whose content, metadata and embedding are
    /// byte-identical to what is stored is left completely alone (same
    /// rowid, no FTS or vector writes), so re-saving an unchanged
    /// document is a no-op on both indexes. Only rows that actually
    /// differ are updated, and stored chunks without an incoming
    /// counterpart are deleted. Either everything commits or nothing
    /// does.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub fn save(&self, mut document: Document, mut chunks: Vec<Chunk>) -> Result<(Document, Vec<Chunk>)> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let metadata_json = serde_json::to_string(&document.metadata)?;

        let doc_id = match document.id {
            Some(id) => {
                tx.execute(
                    "UPDATE documents SET content = ?1, media_type = ?2, metadata = ?3 WHERE id = ?4",
                    params![document.content, document.media_type.as_str(), metadata_json, id],
                )?;
                id
            }
            None => {
                // A re-ingest of the same source replaces the earlier
                // document instead of duplicating it.
                let existing: Option<i64> = match document.source() {
                    Some(source) => tx
                        .query_row(
                            "SELECT id FROM documents WHERE json_extract(metadata, '$.source') = ?1",
                            params![source],
                            |row| row.get(0),
                        )
                        .optional()?,
                    None => None,
                };

                match existing {
                    Some(id) => {
                        tx.execute(
                            "UPDATE documents SET content = ?1, media_type = ?2, metadata = ?3 WHERE id = ?4",
                            params![document.content, document.media_type.as_str(), metadata_json, id],
                        )?;
                        id
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO documents (content, media_type, metadata, created_at)
                             VALUES (?1, ?2, ?3, ?4)",
                            params![
                                document.content,
                                document.media_type.as_str(),
                                metadata_json,
                                document.created_at.to_rfc3339(),
                            ],
                        )?;
                        tx.last_insert_rowid()
                    }
                }
            }
        };

        // Diff against what is stored so unchanged rows keep their rowid
        // and never touch the FTS or vector indexes.
        let mut stored_by_index: HashMap<i64, Chunk> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM chunks WHERE document_id = ?1",
                Self::CHUNK_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![doc_id], Self::row_to_chunk)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(|c| (c.chunk_index, c)).collect()
        };

        for chunk in &mut chunks {
            let chunk_metadata = serde_json::to_string(&chunk.metadata)?;

            let chunk_id = match stored_by_index.remove(&chunk.chunk_index) {
                Some(stored) => {
                    let Some(stored_id) = stored.id else {
                        return Err(VitenError::Schema(
                            "stored chunk without a rowid".to_string(),
                        ));
                    };

                    let same_row = stored.content == chunk.content
                        && stored.chunk_type == chunk.chunk_type
                        && stored.language == chunk.language
                        && serde_json::to_string(&stored.metadata)? == chunk_metadata
                        && stored.embedding_status == chunk.embedding_status
                        && stored.batch_job_id == chunk.batch_job_id
                        && stored.error_message == chunk.error_message;

                    if !same_row {
                        tx.execute(
                            "UPDATE chunks SET content = ?1, chunk_type = ?2, language = ?3,
                                    metadata = ?4, embedding_status = ?5, batch_job_id = ?6,
                                    error_message = ?7
                             WHERE id = ?8",
                            params![
                                chunk.content,
                                chunk.chunk_type.as_str(),
                                chunk.language,
                                chunk_metadata,
                                chunk.embedding_status.as_str(),
                                chunk.batch_job_id,
                                chunk.error_message,
                                stored_id,
                            ],
                        )?;
                    }
                    stored_id
                }
                None => {
                    tx.execute(
                        "INSERT INTO chunks (document_id, chunk_index, content, chunk_type, language,
                                             metadata, embedding_status, batch_job_id, error_message)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        params![
                            doc_id,
                            chunk.chunk_index,
                            chunk.content,
                            chunk.chunk_type.as_str(),
                            chunk.language,
                            chunk_metadata,
                            chunk.embedding_status.as_str(),
                            chunk.batch_job_id,
                            chunk.error_message,
                        ],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            chunk.id = Some(chunk_id);
            chunk.document_id = Some(doc_id);

            match &chunk.embedding {
                Some(embedding) => {
                    self.check_dimension(embedding)?;
                    let bytes = Self::embedding_to_bytes(embedding);
                    let stored_blob: Option<Vec<u8>> = tx
                        .query_row(
                            "SELECT embedding FROM chunks_vec WHERE rowid = ?1",
                            params![chunk_id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if stored_blob.as_deref() != Some(bytes.as_slice()) {
                        tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![chunk_id])?;
                        tx.execute(
                            "INSERT INTO chunks_vec(rowid, embedding) VALUES (?1, ?2)",
                            params![chunk_id, bytes],
                        )?;
                    }
                }
                None => {
                    // A chunk that is not ready must not keep a stale
                    // vector row.
                    if chunk.embedding_status != EmbeddingStatus::Ready {
                        tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![chunk_id])?;
                    }
                }
            }
        }

        // Stored chunks with no incoming counterpart go away; the delete
        // trigger clears their FTS and vector rows.
        for leftover in stored_by_index.into_values() {
            if let Some(id) = leftover.id {
                tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
            }
        }

        tx.commit()?;
        document.id = Some(doc_id);

        debug!("Saved document {} with {} chunks", doc_id, chunks.len());
        Ok((document, chunks))
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let doc = conn
            .query_row(
                "SELECT id, content, media_type, metadata, created_at FROM documents WHERE id = ?1",
                params![id],
                Self::row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Look up a document by its `source` metadata entry.
    pub fn find_document_by_source(&self, source: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let doc = conn
            .query_row(
                "SELECT id, content, media_type, metadata, created_at FROM documents
                 WHERE json_extract(metadata, '$.source') = ?1",
                params![source],
                Self::row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// All chunks of a document, ordered by `chunk_index`.
    pub fn get_chunks(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
            Self::CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map(params![document_id], Self::row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        let conn = self.lock()?;
        let chunk = conn
            .query_row(
                &format!("SELECT {} FROM chunks WHERE id = ?1", Self::CHUNK_COLUMNS),
                params![id],
                Self::row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    /// Fetch the stored embedding of a chunk, if any.
    pub fn get_embedding(&self, chunk_id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.lock()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM chunks_vec WHERE rowid = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| Self::bytes_to_embedding(&b)))
    }

    /// Update a stored chunk in place; the triggers refresh the FTS row.
    pub fn update_chunk(&self, chunk: &Chunk) -> Result<()> {
        let id = chunk.id.ok_or(VitenError::InvalidInput {
            field: "chunk",
            reason: "chunk has no id".to_string(),
        })?;
        let metadata = serde_json::to_string(&chunk.metadata)?;

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE chunks SET content = ?1, chunk_type = ?2, language = ?3, metadata = ?4,
                    embedding_status = ?5, batch_job_id = ?6, error_message = ?7
             WHERE id = ?8",
            params![
                chunk.content,
                chunk.chunk_type.as_str(),
                chunk.language,
                metadata,
                chunk.embedding_status.as_str(),
                chunk.batch_job_id,
                chunk.error_message,
                id,
            ],
        )?;
        if let Some(embedding) = &chunk.embedding {
            self.check_dimension(embedding)?;
            tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![id])?;
            tx.execute(
                "INSERT INTO chunks_vec(rowid, embedding) VALUES (?1, ?2)",
                params![id, Self::embedding_to_bytes(embedding)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Find the chunk awaiting media enrichment for the given source path.
    pub fn find_pending_media_chunk(&self, media_path: &str) -> Result<Option<Chunk>> {
        let conn = self.lock()?;
        let chunk = conn
            .query_row(
                &format!(
                    "SELECT {} FROM chunks
                     WHERE json_extract(metadata, '$._original_path') = ?1
                       AND json_extract(metadata, '$._pending_enrichment')
                     ORDER BY id LIMIT 1",
                    Self::CHUNK_COLUMNS
                ),
                params![media_path],
                Self::row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    /// Delete a document; cascades to chunks and their FTS/vector rows.
    #[instrument(skip(self))]
    pub fn delete(&self, document_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        // Explicit chunk delete so the triggers clean both indexes.
        let chunks = tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;
        let docs = tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;
        tx.commit()?;
        info!("Deleted document {} ({} chunks)", document_id, chunks);
        Ok(docs)
    }

    /// Delete all documents matching the given metadata filters.
    pub fn delete_by_metadata(&self, filters: &[(String, Value)]) -> Result<usize> {
        let (clauses, values) = Self::filter_clauses(filters);
        let ids: Vec<i64> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT d.id FROM documents d WHERE 1=1{}",
                clauses
            ))?;
            let rows = stmt.query_map(
                params_from_iter(values.iter().map(|v| v.as_ref() as &dyn ToSql)),
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for id in &ids {
            self.delete(*id)?;
        }
        Ok(ids.len())
    }

    /// Chunks of the same document with `chunk_index` within `window` of the
    /// given chunk, ordered by `chunk_index`. Includes the chunk itself.
    pub fn get_sibling_chunks(&self, chunk_id: i64, window: i64) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let anchor: Option<(i64, i64)> = conn
            .query_row(
                "SELECT document_id, chunk_index FROM chunks WHERE id = ?1",
                params![chunk_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((document_id, index)) = anchor else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks
             WHERE document_id = ?1 AND chunk_index BETWEEN ?2 AND ?3
             ORDER BY chunk_index",
            Self::CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map(
                params![document_id, index - window, index + window],
                Self::row_to_chunk,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn count_documents(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn count_chunks(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Number of rows in the FTS index (mirrors the chunk table).
    pub fn count_fts_rows(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks_fts", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Number of rows in the vector index.
    pub fn count_vector_rows(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks_vec", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    // ==================== Search primitives ====================

    /// K-nearest chunks by cosine distance, ascending; ties break on chunk
    /// id ascending. Returns `(chunk_id, distance)` pairs.
    #[instrument(skip(self, query, filters))]
    pub fn search_vector(
        &self,
        query: &[f32],
        filters: &[(String, Value)],
        limit: usize,
    ) -> Result<Vec<(i64, f64)>> {
        self.check_dimension(query)?;

        // Post-KNN filters can eat into the k results, so oversample when
        // any are present.
        let k = if filters.is_empty() {
            limit
        } else {
            limit.max(100)
        };

        let (clauses, mut values) = Self::filter_clauses(filters);
        let sql = format!(
            "SELECT c.id, v.distance
             FROM chunks_vec v
             JOIN chunks c ON c.id = v.rowid
             JOIN documents d ON d.id = c.document_id
             WHERE v.embedding MATCH ? AND k = ?{}
             ORDER BY v.distance ASC, c.id ASC
             LIMIT ?",
            clauses
        );

        let mut all_values: Vec<Box<dyn ToSql>> = Vec::with_capacity(values.len() + 3);
        all_values.push(Box::new(Self::embedding_to_bytes(query)));
        all_values.push(Box::new(k as i64));
        all_values.append(&mut values);
        all_values.push(Box::new(limit as i64));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let results = stmt
            .query_map(
                params_from_iter(all_values.iter().map(|v| v.as_ref() as &dyn ToSql)),
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Vector search returned {} chunks", results.len());
        Ok(results)
    }

    /// Full-text search over chunk content. Returns `(chunk_id, |rank|)`
    /// pairs, best match first.
    #[instrument(skip(self, filters))]
    pub fn search_fts(
        &self,
        query_text: &str,
        filters: &[(String, Value)],
        limit: usize,
    ) -> Result<Vec<(i64, f64)>> {
        if query_text.trim().is_empty() {
            return Err(VitenError::InvalidInput {
                field: "query",
                reason: "empty full-text query".to_string(),
            });
        }

        let fts_query = sanitize_fts_query(query_text);
        let (clauses, mut values) = Self::filter_clauses(filters);
        let sql = format!(
            "SELECT c.id, rank
             FROM chunks_fts
             JOIN chunks c ON c.id = chunks_fts.rowid
             JOIN documents d ON d.id = c.document_id
             WHERE chunks_fts MATCH ?{}
             ORDER BY rank ASC, c.id ASC
             LIMIT ?",
            clauses
        );

        let mut all_values: Vec<Box<dyn ToSql>> = Vec::with_capacity(values.len() + 2);
        all_values.push(Box::new(fts_query));
        all_values.append(&mut values);
        all_values.push(Box::new(limit as i64));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let results = stmt
            .query_map(
                params_from_iter(all_values.iter().map(|v| v.as_ref() as &dyn ToSql)),
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?.abs())),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("FTS search returned {} chunks", results.len());
        Ok(results)
    }

    /// Hybrid search: RRF fusion of the vector and FTS queries.
    ///
    /// Both inner queries fetch their top 100 chunks under the same
    /// filters; the fused list is cut to `limit`.
    #[instrument(skip(self, query_vec, filters))]
    pub fn search_hybrid(
        &self,
        query_vec: &[f32],
        query_text: &str,
        filters: &[(String, Value)],
        limit: usize,
        k: u32,
    ) -> Result<Vec<(i64, f64)>> {
        const CANDIDATES: usize = 100;

        let vector_ids: Vec<i64> = self
            .search_vector(query_vec, filters, CANDIDATES)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let fts_ids: Vec<i64> = self
            .search_fts(query_text, filters, CANDIDATES)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let mut fused = crate::search::reciprocal_rank_fusion(&[&vector_ids, &fts_ids], k);
        fused.truncate(limit);
        Ok(fused)
    }

    // ==================== Vector maintenance ====================

    /// Write embeddings for many chunks in a single transaction.
    ///
    /// Each row is inserted-or-replaced in the vector index, and the chunk
    /// transitions to `ready` with its batch job reference cleared in the
    /// same transaction.
    #[instrument(skip_all, fields(count = updates.len()))]
    pub fn bulk_update_vectors(&self, updates: &[(i64, Vec<f32>)]) -> Result<()> {
        for (_, embedding) in updates {
            self.check_dimension(embedding)?;
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for (chunk_id, embedding) in updates {
            tx.execute("DELETE FROM chunks_vec WHERE rowid = ?1", params![chunk_id])?;
            tx.execute(
                "INSERT INTO chunks_vec(rowid, embedding) VALUES (?1, ?2)",
                params![chunk_id, Self::embedding_to_bytes(embedding)],
            )?;
            tx.execute(
                "UPDATE chunks SET embedding_status = 'ready', batch_job_id = NULL,
                        error_message = NULL
                 WHERE id = ?1",
                params![chunk_id],
            )?;
        }
        tx.commit()?;

        info!("Stored {} embeddings", updates.len());
        Ok(())
    }

    // ==================== Batch jobs ====================

    pub fn create_batch_job(&self, chunk_count: i64) -> Result<BatchJob> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO batch_jobs (status, chunk_count, created_at, updated_at)
             VALUES ('pending', ?1, ?2, ?3)",
            params![chunk_count, now.to_rfc3339(), now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(BatchJob {
            id,
            status: BatchStatus::Pending,
            remote_job_id: None,
            chunk_count,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn row_to_batch_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchJob> {
        let status: String = row.get(1)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        Ok(BatchJob {
            id: row.get(0)?,
            status: status.parse().unwrap_or(BatchStatus::Pending),
            remote_job_id: row.get(2)?,
            chunk_count: row.get(3)?,
            error_message: row.get(4)?,
            created_at: Self::parse_datetime(&created_at),
            updated_at: Self::parse_datetime(&updated_at),
        })
    }

    const BATCH_JOB_COLUMNS: &'static str =
        "id, status, remote_job_id, chunk_count, error_message, created_at, updated_at";

    pub fn get_batch_job(&self, id: i64) -> Result<Option<BatchJob>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM batch_jobs WHERE id = ?1",
                    Self::BATCH_JOB_COLUMNS
                ),
                params![id],
                Self::row_to_batch_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn running_batch_jobs(&self) -> Result<Vec<BatchJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batch_jobs WHERE status = 'running' ORDER BY id",
            Self::BATCH_JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([], Self::row_to_batch_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn set_batch_job_running(&self, id: i64, remote_job_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE batch_jobs SET status = 'running', remote_job_id = ?1, updated_at = ?2
             WHERE id = ?3",
            params![remote_job_id, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn complete_batch_job(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE batch_jobs SET status = 'completed', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Mark a job failed along with every chunk still assigned to it.
    pub fn fail_batch_job(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE batch_jobs SET status = 'failed', error_message = ?1, updated_at = ?2
             WHERE id = ?3",
            params![error, Utc::now().to_rfc3339(), id],
        )?;
        tx.execute(
            "UPDATE chunks SET embedding_status = 'failed', error_message = ?1, batch_job_id = NULL
             WHERE batch_job_id = ?2",
            params![error, id],
        )?;
        tx.commit()?;
        warn!("Batch job {} failed: {}", id, error);
        Ok(())
    }

    /// Associate chunks with a batch job and mark them pending.
    pub fn assign_chunks_to_job(&self, job_id: i64, chunk_ids: &[i64]) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for chunk_id in chunk_ids {
            tx.execute(
                "UPDATE chunks SET batch_job_id = ?1, embedding_status = 'pending' WHERE id = ?2",
                params![job_id, chunk_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Detach chunks from a job, leaving them pending for re-enqueue.
    pub fn release_chunks_from_job(&self, chunk_ids: &[i64]) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for chunk_id in chunk_ids {
            tx.execute(
                "UPDATE chunks SET batch_job_id = NULL WHERE id = ?1",
                params![chunk_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Chunks awaiting embedding that no batch job has claimed yet.
    pub fn pending_unassigned_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks
             WHERE embedding_status = 'pending' AND batch_job_id IS NULL
             ORDER BY id",
            Self::CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map([], Self::row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// Chunks currently assigned to a batch job.
    pub fn chunks_for_job(&self, job_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE batch_job_id = ?1 ORDER BY id",
            Self::CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map(params![job_id], Self::row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    // ==================== Media tasks ====================

    fn row_to_media_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaTask> {
        let media_type: String = row.get(2)?;
        let status: String = row.get(6)?;
        let keywords: Option<String> = row.get(9)?;
        let participants: Option<String> = row.get(13)?;
        let action_items: Option<String> = row.get(14)?;
        let created_at: String = row.get(17)?;
        let updated_at: String = row.get(18)?;

        let parse_list = |json: Option<String>| -> Option<Vec<String>> {
            json.and_then(|j| serde_json::from_str(&j).ok())
        };

        Ok(MediaTask {
            id: Some(row.get(0)?),
            media_path: row.get(1)?,
            media_type: media_type.parse().unwrap_or(MediaType::Image),
            mime_type: row.get(3)?,
            user_prompt: row.get(4)?,
            context_text: row.get(5)?,
            status: status.parse().unwrap_or(TaskStatus::Pending),
            error_message: row.get(7)?,
            description: row.get(8)?,
            keywords: parse_list(keywords),
            ocr_text: row.get(10)?,
            transcription: row.get(11)?,
            alt_text: row.get(12)?,
            participants: parse_list(participants),
            action_items: parse_list(action_items),
            duration_seconds: row.get(15)?,
            result_chunk_id: row.get(16)?,
            created_at: Self::parse_datetime(&created_at),
            updated_at: Self::parse_datetime(&updated_at),
        })
    }

    const MEDIA_TASK_COLUMNS: &'static str =
        "id, media_path, media_type, mime_type, user_prompt, context_text, status, error_message, \
         description, keywords, ocr_text, transcription, alt_text, participants, action_items, \
         duration_seconds, result_chunk_id, created_at, updated_at";

    /// Enqueue a media analysis task.
    pub fn enqueue_media_task(&self, mut task: MediaTask) -> Result<MediaTask> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO media_tasks (media_path, media_type, mime_type, user_prompt,
                                      context_text, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)",
            params![
                task.media_path,
                task.media_type.as_str(),
                task.mime_type,
                task.user_prompt,
                task.context_text,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        task.id = Some(conn.last_insert_rowid());
        task.status = TaskStatus::Pending;
        debug!("Enqueued media task {:?} for {}", task.id, task.media_path);
        Ok(task)
    }

    /// Atomically claim the oldest pending task, moving it to `processing`.
    pub fn claim_next_media_task(&self) -> Result<Option<MediaTask>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let task = tx
            .query_row(
                &format!(
                    "SELECT {} FROM media_tasks WHERE status = 'pending'
                     ORDER BY created_at ASC, id ASC LIMIT 1",
                    Self::MEDIA_TASK_COLUMNS
                ),
                [],
                Self::row_to_media_task,
            )
            .optional()?;

        let Some(mut task) = task else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE media_tasks SET status = 'processing', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), task.id],
        )?;
        tx.commit()?;

        task.status = TaskStatus::Processing;
        Ok(Some(task))
    }

    pub fn get_media_task(&self, id: i64) -> Result<Option<MediaTask>> {
        let conn = self.lock()?;
        let task = conn
            .query_row(
                &format!(
                    "SELECT {} FROM media_tasks WHERE id = ?1",
                    Self::MEDIA_TASK_COLUMNS
                ),
                params![id],
                Self::row_to_media_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Persist a completed task including its analysis result fields.
    pub fn complete_media_task(&self, task: &MediaTask) -> Result<()> {
        let id = task.id.ok_or(VitenError::InvalidInput {
            field: "media_task",
            reason: "task has no id".to_string(),
        })?;

        let to_json = |list: &Option<Vec<String>>| -> Result<Option<String>> {
            Ok(match list {
                Some(items) => Some(serde_json::to_string(items)?),
                None => None,
            })
        };

        let conn = self.lock()?;
        conn.execute(
            "UPDATE media_tasks SET status = 'completed', error_message = NULL,
                    description = ?1, alt_text = ?2, keywords = ?3, ocr_text = ?4,
                    transcription = ?5, participants = ?6, action_items = ?7,
                    duration_seconds = ?8, result_chunk_id = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                task.description,
                task.alt_text,
                to_json(&task.keywords)?,
                task.ocr_text,
                task.transcription,
                to_json(&task.participants)?,
                to_json(&task.action_items)?,
                task.duration_seconds,
                task.result_chunk_id,
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn fail_media_task(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE media_tasks SET status = 'failed', error_message = ?1, updated_at = ?2
             WHERE id = ?3",
            params![error, Utc::now().to_rfc3339(), id],
        )?;
        warn!("Media task {} failed: {}", id, error);
        Ok(())
    }
}

/// Escape an FTS5 query: every whitespace-separated term is double-quoted
/// so reserved operators are treated as literals, and inner quotes are
/// doubled. Terms stay separate, preserving multi-word (implicit AND)
/// semantics.
pub fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DIM: usize = 3;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(DIM).unwrap()
    }

    fn doc_with_source(source: &str) -> Document {
        let mut doc = Document::new("body text", MediaType::Text);
        doc.metadata.insert("source".into(), json!(source));
        doc
    }

    fn chunk(content: &str, index: i64) -> Chunk {
        Chunk::new(content, ChunkType::Text, index)
    }

    fn chunk_with_embedding(content: &str, index: i64, embedding: [f32; 3]) -> Chunk {
        let mut c = chunk(content, index);
        c.embedding = Some(embedding.to_vec());
        c
    }

    #[test]
    fn test_save_and_get_round_trip() {
        let store = store();
        let (doc, chunks) = store
            .save(
                doc_with_source("/notes/a.md"),
                vec![chunk("first", 0), chunk("second", 1)],
            )
            .unwrap();

        let doc_id = doc.id.unwrap();
        let loaded = store.get_document(doc_id).unwrap().unwrap();
        assert_eq!(loaded.content, "body text");

        let loaded_chunks = store.get_chunks(doc_id).unwrap();
        assert_eq!(loaded_chunks.len(), 2);
        assert_eq!(loaded_chunks[0].content, "first");
        assert_eq!(loaded_chunks[0].chunk_index, 0);
        assert_eq!(loaded_chunks[1].chunk_index, 1);
        assert_eq!(chunks[0].id, loaded_chunks[0].id);
    }

    #[test]
    fn test_fts_rows_mirror_chunks() {
        let store = store();
        let (doc, _) = store
            .save(
                doc_with_source("/notes/b.md"),
                vec![chunk("alpha beta", 0), chunk("gamma delta", 1)],
            )
            .unwrap();

        assert_eq!(store.count_fts_rows().unwrap(), 2);

        // Replacing chunks keeps the mirror exact.
        let doc_id = doc.id.unwrap();
        let doc = store.get_document(doc_id).unwrap().unwrap();
        store.save(doc, vec![chunk("epsilon", 0)]).unwrap();
        assert_eq!(store.count_chunks().unwrap(), 1);
        assert_eq!(store.count_fts_rows().unwrap(), 1);

        let hits = store.search_fts("epsilon", &[], 10).unwrap();
        assert_eq!(hits.len(), 1);
        let stale = store.search_fts("alpha", &[], 10).unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn test_reingest_same_source_replaces_document() {
        let store = store();
        store
            .save(doc_with_source("/notes/c.md"), vec![chunk("v1", 0)])
            .unwrap();
        store
            .save(doc_with_source("/notes/c.md"), vec![chunk("v2", 0)])
            .unwrap();

        assert_eq!(store.count_documents().unwrap(), 1);
        assert_eq!(store.count_chunks().unwrap(), 1);
    }

    #[test]
    fn test_byte_identical_resave_preserves_rowids() {
        let store = store();
        let (_, first) = store
            .save(
                doc_with_source("/notes/same.md"),
                vec![chunk_with_embedding("stable content", 0, [1.0, 0.0, 0.0])],
            )
            .unwrap();
        let first_id = first[0].id.unwrap();

        let (_, second) = store
            .save(
                doc_with_source("/notes/same.md"),
                vec![chunk_with_embedding("stable content", 0, [1.0, 0.0, 0.0])],
            )
            .unwrap();

        // The chunk row was never deleted and reinserted, so the rowid
        // shared with the FTS and vector indexes is unchanged.
        assert_eq!(second[0].id, Some(first_id));
        assert_eq!(store.count_chunks().unwrap(), 1);
        assert_eq!(store.count_fts_rows().unwrap(), 1);
        assert_eq!(store.count_vector_rows().unwrap(), 1);

        let hits = store.search_fts("stable", &[], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, first_id);

        let vector_hits = store.search_vector(&[1.0, 0.0, 0.0], &[], 10).unwrap();
        assert_eq!(vector_hits[0].0, first_id);
        assert_eq!(
            store.get_embedding(first_id).unwrap().unwrap(),
            vec![1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_resave_updates_changed_rows_in_place() {
        let store = store();
        let (_, first) = store
            .save(
                doc_with_source("/notes/diff.md"),
                vec![chunk("alpha", 0), chunk("beta", 1), chunk("gamma", 2)],
            )
            .unwrap();
        let kept_id = first[0].id.unwrap();
        let changed_id = first[1].id.unwrap();

        let (_, second) = store
            .save(
                doc_with_source("/notes/diff.md"),
                vec![chunk("alpha", 0), chunk("delta revised", 1)],
            )
            .unwrap();

        // Unchanged and updated rows keep their ids; the dropped index is
        // gone from every index.
        assert_eq!(second[0].id, Some(kept_id));
        assert_eq!(second[1].id, Some(changed_id));
        assert_eq!(store.count_chunks().unwrap(), 2);
        assert_eq!(store.count_fts_rows().unwrap(), 2);

        let revised = store.search_fts("revised", &[], 10).unwrap();
        assert_eq!(revised.len(), 1);
        assert_eq!(revised[0].0, changed_id);
        assert!(store.search_fts("beta", &[], 10).unwrap().is_empty());
        assert!(store.search_fts("gamma", &[], 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_to_all_indexes() {
        let store = store();
        let (doc, _) = store
            .save(
                doc_with_source("/notes/d.md"),
                vec![chunk_with_embedding("searchable", 0, [1.0, 0.0, 0.0])],
            )
            .unwrap();

        assert_eq!(store.count_vector_rows().unwrap(), 1);
        store.delete(doc.id.unwrap()).unwrap();

        assert_eq!(store.count_documents().unwrap(), 0);
        assert_eq!(store.count_chunks().unwrap(), 0);
        assert_eq!(store.count_fts_rows().unwrap(), 0);
        assert_eq!(store.count_vector_rows().unwrap(), 0);
    }

    #[test]
    fn test_delete_by_metadata() {
        let store = store();
        let mut doc_a = doc_with_source("/notes/e.md");
        doc_a.metadata.insert("project".into(), json!("apollo"));
        let mut doc_b = doc_with_source("/notes/f.md");
        doc_b.metadata.insert("project".into(), json!("gemini"));

        store.save(doc_a, vec![chunk("one", 0)]).unwrap();
        store.save(doc_b, vec![chunk("two", 0)]).unwrap();

        let deleted = store
            .delete_by_metadata(&[("project".to_string(), json!("apollo"))])
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count_documents().unwrap(), 1);
    }

    #[test]
    fn test_vector_search_orders_by_cosine_distance() {
        let store = store();
        store
            .save(
                doc_with_source("/notes/g.md"),
                vec![
                    chunk_with_embedding("exact", 0, [1.0, 0.0, 0.0]),
                    chunk_with_embedding("orthogonal", 1, [0.0, 1.0, 0.0]),
                ],
            )
            .unwrap();

        let hits = store.search_vector(&[1.0, 0.0, 0.0], &[], 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].1 < hits[1].1);
        assert!(hits[0].1 < 0.001);
    }

    #[test]
    fn test_vector_search_respects_filters() {
        let store = store();
        let mut doc = doc_with_source("/notes/h.md");
        doc.metadata.insert("lang".into(), json!("en"));
        store
            .save(doc, vec![chunk_with_embedding("hello", 0, [1.0, 0.0, 0.0])])
            .unwrap();

        let hits = store
            .search_vector(
                &[1.0, 0.0, 0.0],
                &[("lang".to_string(), json!("no"))],
                10,
            )
            .unwrap();
        assert!(hits.is_empty());

        let hits = store
            .search_vector(
                &[1.0, 0.0, 0.0],
                &[("lang".to_string(), json!("en"))],
                10,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_fts_query_sanitization() {
        assert_eq!(sanitize_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(sanitize_fts_query("a\"b"), "\"a\"\"b\"");
        // Reserved operators are neutralized by quoting.
        let store = store();
        store
            .save(
                doc_with_source("/notes/i.md"),
                vec![chunk("NOT AND OR operators", 0)],
            )
            .unwrap();
        let hits = store.search_fts("NOT AND", &[], 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_fts_rejects_empty_query() {
        let store = store();
        assert!(matches!(
            store.search_fts("   ", &[], 10),
            Err(VitenError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_sibling_window() {
        let store = store();
        let (_, chunks) = store
            .save(
                doc_with_source("/notes/j.md"),
                (0..5).map(|i| chunk(&format!("chunk {}", i), i)).collect(),
            )
            .unwrap();

        let anchor = chunks[2].id.unwrap();
        let siblings = store.get_sibling_chunks(anchor, 1).unwrap();
        assert_eq!(siblings.len(), 3);
        assert_eq!(siblings[0].chunk_index, 1);
        assert_eq!(siblings[2].chunk_index, 3);

        let edge = store.get_sibling_chunks(chunks[0].id.unwrap(), 2).unwrap();
        assert_eq!(edge.len(), 3);
        assert_eq!(edge[0].chunk_index, 0);
    }

    #[test]
    fn test_bulk_update_vectors_transitions_status() {
        let store = store();
        let mut pending = chunk("await embedding", 0);
        pending.embedding_status = EmbeddingStatus::Pending;
        let (_, chunks) = store
            .save(doc_with_source("/notes/k.md"), vec![pending])
            .unwrap();
        let chunk_id = chunks[0].id.unwrap();

        assert_eq!(store.count_vector_rows().unwrap(), 0);

        store
            .bulk_update_vectors(&[(chunk_id, vec![0.5, 0.5, 0.0])])
            .unwrap();

        assert_eq!(store.count_vector_rows().unwrap(), 1);
        let updated = store.get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(updated.embedding_status, EmbeddingStatus::Ready);
        assert!(updated.batch_job_id.is_none());
        let embedding = store.get_embedding(chunk_id).unwrap().unwrap();
        assert_eq!(embedding.len(), DIM);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = store();
        let mut bad = chunk("bad", 0);
        bad.embedding = Some(vec![1.0, 0.0]);
        let result = store.save(doc_with_source("/notes/l.md"), vec![bad]);
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_job_lifecycle() {
        let store = store();
        let mut pending = chunk("to embed", 0);
        pending.embedding_status = EmbeddingStatus::Pending;
        let (_, chunks) = store
            .save(doc_with_source("/notes/m.md"), vec![pending])
            .unwrap();
        let chunk_id = chunks[0].id.unwrap();

        let unassigned = store.pending_unassigned_chunks().unwrap();
        assert_eq!(unassigned.len(), 1);

        let job = store.create_batch_job(1).unwrap();
        store.assign_chunks_to_job(job.id, &[chunk_id]).unwrap();
        assert!(store.pending_unassigned_chunks().unwrap().is_empty());

        store.set_batch_job_running(job.id, "remote-42").unwrap();
        let running = store.running_batch_jobs().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].remote_job_id.as_deref(), Some("remote-42"));

        store.fail_batch_job(job.id, "quota exceeded").unwrap();
        let failed_chunk = store.get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(failed_chunk.embedding_status, EmbeddingStatus::Failed);
        assert!(failed_chunk.batch_job_id.is_none());
    }

    #[test]
    fn test_media_task_claim_order() {
        let store = store();
        store
            .enqueue_media_task(MediaTask::new("/m/first.png", MediaType::Image, "image/png"))
            .unwrap();
        store
            .enqueue_media_task(MediaTask::new("/m/second.png", MediaType::Image, "image/png"))
            .unwrap();

        let first = store.claim_next_media_task().unwrap().unwrap();
        assert_eq!(first.media_path, "/m/first.png");
        assert_eq!(first.status, TaskStatus::Processing);

        let second = store.claim_next_media_task().unwrap().unwrap();
        assert_eq!(second.media_path, "/m/second.png");

        assert!(store.claim_next_media_task().unwrap().is_none());

        store.fail_media_task(first.id.unwrap(), "boom").unwrap();
        let failed = store.get_media_task(first.id.unwrap()).unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = vec![0.25_f32, -1.5, 3.125];
        let bytes = SqliteStore::embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 12);
        assert_eq!(SqliteStore::bytes_to_embedding(&bytes), embedding);
    }
}
