//! Document and chunk storage for Viten.
//!
//! Domain types plus the SQLite-backed store that keeps the chunk table,
//! the full-text index and the vector index in sync.

mod sqlite;

pub use sqlite::{sanitize_fts_query, SqliteStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON metadata attached to documents and chunks.
///
/// Keys starting with `_` are engine-owned; callers must not collide with
/// them.
pub type Metadata = serde_json::Map<String, Value>;

/// Kind of source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "text",
            MediaType::Image => "image",
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(MediaType::Text),
            "image" => Ok(MediaType::Image),
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            other => Err(format!("Unknown media type: {}", other)),
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Code,
    ImageRef,
    AudioRef,
    VideoRef,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Code => "code",
            ChunkType::ImageRef => "image_ref",
            ChunkType::AudioRef => "audio_ref",
            ChunkType::VideoRef => "video_ref",
        }
    }

    /// Whether this chunk references an external media file.
    pub fn is_media_ref(&self) -> bool {
        matches!(
            self,
            ChunkType::ImageRef | ChunkType::AudioRef | ChunkType::VideoRef
        )
    }

    /// The reference chunk type for a media document kind.
    pub fn for_media(media_type: MediaType) -> ChunkType {
        match media_type {
            MediaType::Image => ChunkType::ImageRef,
            MediaType::Audio => ChunkType::AudioRef,
            MediaType::Video => ChunkType::VideoRef,
            MediaType::Text => ChunkType::Text,
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(ChunkType::Text),
            "code" => Ok(ChunkType::Code),
            "image_ref" => Ok(ChunkType::ImageRef),
            "audio_ref" => Ok(ChunkType::AudioRef),
            "video_ref" => Ok(ChunkType::VideoRef),
            other => Err(format!("Unknown chunk type: {}", other)),
        }
    }
}

/// Embedding lifecycle state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Ready,
    Pending,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Ready => "ready",
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ready" => Ok(EmbeddingStatus::Ready),
            "pending" => Ok(EmbeddingStatus::Pending),
            "failed" => Ok(EmbeddingStatus::Failed),
            other => Err(format!("Unknown embedding status: {}", other)),
        }
    }
}

/// How a search hit was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Vector,
    Fts,
    Hybrid,
    /// Introduced by context-window expansion, not matched directly.
    Context,
}

/// A source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Assigned on save; None for unsaved documents.
    pub id: Option<i64>,
    /// Original text, or the absolute source path for direct media.
    pub content: String,
    pub media_type: MediaType,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(content: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            id: None,
            content: content.into(),
            media_type,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The `source` metadata entry (original file path), when present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    /// Display title: explicit `title` metadata, else the source file name.
    pub fn title(&self) -> Option<String> {
        if let Some(title) = self.metadata.get("title").and_then(Value::as_str) {
            return Some(title.to_string());
        }
        self.source().map(|s| {
            std::path::Path::new(s)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| s.to_string())
        })
    }
}

/// The smallest searchable unit: a slice of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Option<i64>,
    pub document_id: Option<i64>,
    /// Dense per document, starting at 0.
    pub chunk_index: i64,
    /// The text that is embedded and searched.
    pub content: String,
    pub chunk_type: ChunkType,
    pub language: Option<String>,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
    pub embedding_status: EmbeddingStatus,
    pub batch_job_id: Option<i64>,
    pub error_message: Option<String>,
}

impl Chunk {
    pub fn new(content: impl Into<String>, chunk_type: ChunkType, chunk_index: i64) -> Self {
        Self {
            id: None,
            document_id: None,
            chunk_index,
            content: content.into(),
            chunk_type,
            language: None,
            metadata: Metadata::new(),
            embedding: None,
            embedding_status: EmbeddingStatus::Ready,
            batch_job_id: None,
            error_message: None,
        }
    }

    /// Read a string metadata entry.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Read a float metadata entry (accepts integers too).
    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    /// Whether a metadata flag is set to true.
    pub fn meta_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Ordered heading breadcrumbs from metadata.
    pub fn headers(&self) -> Vec<String> {
        self.metadata
            .get("headers")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }
}

/// A chunk-granular search hit.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk: Chunk,
    /// Parent document, loaded lazily by the search layer.
    pub document: Option<Document>,
    pub score: f64,
    pub match_type: MatchType,
}

/// A document-granular search hit (aggregated chunk results).
#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub document: Document,
    /// Best chunk score for this document.
    pub score: f64,
    /// Number of matched chunks.
    pub matched_chunks: usize,
    pub match_type: MatchType,
}

/// Lifecycle state of a batch embedding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "running" => Ok(BatchStatus::Running),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!("Unknown batch status: {}", other)),
        }
    }
}

/// A remote grouping of embedding requests submitted together.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub id: i64,
    pub status: BatchStatus,
    /// Opaque id from the external batch API; None until submission.
    pub remote_job_id: Option<String>,
    pub chunk_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a queued media analysis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

/// A queued unit of media analysis work.
#[derive(Debug, Clone)]
pub struct MediaTask {
    pub id: Option<i64>,
    pub media_path: String,
    pub media_type: MediaType,
    pub mime_type: String,
    pub user_prompt: Option<String>,
    pub context_text: Option<String>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub description: Option<String>,
    pub alt_text: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub ocr_text: Option<String>,
    pub transcription: Option<String>,
    pub participants: Option<Vec<String>>,
    pub action_items: Option<Vec<String>>,
    pub duration_seconds: Option<f64>,
    pub result_chunk_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaTask {
    pub fn new(media_path: impl Into<String>, media_type: MediaType, mime_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            media_path: media_path.into(),
            media_type,
            mime_type: mime_type.into(),
            user_prompt: None,
            context_text: None,
            status: TaskStatus::Pending,
            error_message: None,
            description: None,
            alt_text: None,
            keywords: None,
            ocr_text: None,
            transcription: None,
            participants: None,
            action_items: None,
            duration_seconds: None,
            result_chunk_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
