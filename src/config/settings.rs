//! Configuration settings for Viten.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub processing: ProcessingSettings,
    pub media: MediaSettings,
    pub rate: RateSettings,
    pub embedding: EmbeddingSettings,
    pub search: SearchSettings,
    pub rag: RagSettings,
    pub prompts: crate::config::Prompts,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Path to the SQLite knowledge base file.
    pub db_path: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.viten".to_string(),
            db_path: "~/.viten/knowledge.db".to_string(),
        }
    }
}

/// Text and code chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Text chunk size in characters.
    pub chunk_size: usize,
    /// Code chunk size in characters.
    pub code_chunk_size: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1800,
            code_chunk_size: 2000,
        }
    }
}

impl ProcessingSettings {
    /// Text chunk size clamped to its documented bounds.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.clamp(500, 8000)
    }

    /// Code chunk size clamped to its documented bounds.
    pub fn code_chunk_size(&self) -> usize {
        self.code_chunk_size.clamp(500, 10_000)
    }
}

/// Chunk sizes used when splitting media analysis output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaChunkSizes {
    pub summary: usize,
    pub transcript: usize,
    pub ocr_text: usize,
    pub ocr_code: usize,
}

impl Default for MediaChunkSizes {
    fn default() -> Self {
        Self {
            summary: 1500,
            transcript: 2000,
            ocr_text: 1800,
            ocr_code: 2000,
        }
    }
}

impl MediaChunkSizes {
    pub fn summary(&self) -> usize {
        self.summary.clamp(500, 5000)
    }

    pub fn transcript(&self) -> usize {
        self.transcript.clamp(500, 8000)
    }
}

/// How OCR output is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrParserMode {
    /// Recognize fenced code blocks and split them as code chunks.
    #[default]
    Markdown,
    /// Treat everything as plain text.
    Plain,
}

impl std::str::FromStr for OcrParserMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" => Ok(OcrParserMode::Markdown),
            "plain" => Ok(OcrParserMode::Plain),
            _ => Err(format!("Unknown OCR parser mode: {}", s)),
        }
    }
}

/// Frame sampling strategy for video analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSamplingMode {
    /// Extract a fixed total number of frames spread over the video.
    Total,
    /// Extract frames at a fixed rate (frames per second).
    Fps,
    /// Extract one frame every N seconds.
    Interval,
}

/// Video analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub sampling_mode: VideoSamplingMode,
    /// Frame count (total mode) or rate/interval value for the other modes.
    pub frame_count: u32,
    pub fps: f64,
    pub interval_seconds: f64,
    /// JPEG quality preset for extracted frames (2 best .. 31 worst).
    pub frame_quality: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            sampling_mode: VideoSamplingMode::Total,
            frame_count: 8,
            fps: 0.5,
            interval_seconds: 10.0,
            frame_quality: 4,
        }
    }
}

/// Media processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub chunk_sizes: MediaChunkSizes,
    pub ocr_parser_mode: OcrParserMode,
    /// Parse `[MM:SS]` tokens in transcripts into `start_seconds`.
    pub enable_timecodes: bool,
    /// Reject timecode tokens that go backwards.
    pub strict_timecode_ordering: bool,
    /// Cap on the media timeline size.
    pub max_timeline_items: usize,
    /// Requested natural language of analyzer output.
    pub output_language: Option<String>,
    /// Cap on analyzer output tokens.
    pub max_output_tokens: u32,
    /// Model used for media analysis.
    pub model: String,
    pub video: VideoSettings,
    /// Retry budget for analyzer calls.
    pub max_retries: u32,
    /// Base delay in milliseconds for retry backoff.
    pub retry_base_delay_ms: u64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            chunk_sizes: MediaChunkSizes::default(),
            ocr_parser_mode: OcrParserMode::Markdown,
            enable_timecodes: true,
            strict_timecode_ordering: false,
            max_timeline_items: 100,
            output_language: None,
            max_output_tokens: 65_536,
            model: "gpt-4o-mini".to_string(),
            video: VideoSettings::default(),
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

/// Requests-per-minute budgets per media type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    pub image_rpm: u32,
    pub audio_rpm: u32,
    pub video_rpm: u32,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            image_rpm: 15,
            audio_rpm: 10,
            video_rpm: 5,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions; fixed for every chunk in a store.
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// The `k` constant of Reciprocal Rank Fusion.
    pub rrf_k: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { rrf_k: 60 }
    }
}

/// RAG settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    /// LLM model for answer generation.
    pub model: String,
    /// Maximum number of context chunks (or documents in full-doc mode).
    pub context_chunks: usize,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            context_chunks: 10,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or the default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VitenError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("viten")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded database path.
    pub fn db_path(&self) -> PathBuf {
        Self::expand_path(&self.general.db_path)
    }
}
