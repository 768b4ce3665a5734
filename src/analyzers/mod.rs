//! External media analyzers.
//!
//! An analyzer takes a [`MediaRequest`] pointing at a local file and
//! returns a typed [`MediaAnalysisResult`] obtained through
//! schema-constrained structured output. Rate limiting and retry live
//! here as cross-cutting wrappers around any analyzer call.

mod frames;
mod openai;
mod rate_limit;
mod retry;

pub use frames::{extract_audio_track, extract_frames, probe_duration};
pub use openai::OpenAiMediaAnalyzer;
pub use rate_limit::{RateLimiter, RateLimiterSet};
pub use retry::{is_retryable, retry_with_backoff};

use crate::config::VideoSettings;
use crate::error::{Result, VitenError};
use crate::store::MediaType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single media analysis request.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub path: PathBuf,
    pub mime_type: String,
    pub media_type: MediaType,
    /// Surrounding document text, for grounding the analysis.
    pub context_text: Option<String>,
    /// Caller-supplied extra instructions.
    pub user_prompt: Option<String>,
    /// Frame sampling configuration (video only).
    pub video: VideoSettings,
}

impl MediaRequest {
    pub fn new(path: impl Into<PathBuf>, media_type: MediaType) -> Self {
        let path = path.into();
        let mime_type = mime_for_path(&path);
        Self {
            path,
            mime_type,
            media_type,
            context_text: None,
            user_prompt: None,
            video: VideoSettings::default(),
        }
    }

    pub fn with_context(mut self, context_text: Option<String>) -> Self {
        self.context_text = context_text;
        self
    }

    pub fn with_user_prompt(mut self, user_prompt: Option<String>) -> Self {
        self.user_prompt = user_prompt;
        self
    }
}

/// Structured result of a media analysis.
///
/// Absent fields are `None`, never empty strings; [`Self::normalized`]
/// enforces that at the provider boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaAnalysisResult {
    pub description: Option<String>,
    pub alt_text: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub ocr_text: Option<String>,
    pub transcription: Option<String>,
    pub participants: Option<Vec<String>>,
    pub action_items: Option<Vec<String>>,
    pub duration_seconds: Option<f64>,
}

impl MediaAnalysisResult {
    /// Collapse empty strings and empty lists to `None`.
    pub fn normalized(mut self) -> Self {
        fn scrub(field: &mut Option<String>) {
            if field.as_ref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        fn scrub_list(field: &mut Option<Vec<String>>) {
            if let Some(list) = field {
                list.retain(|s| !s.trim().is_empty());
            }
            if field.as_ref().is_some_and(|l| l.is_empty()) {
                *field = None;
            }
        }

        scrub(&mut self.description);
        scrub(&mut self.alt_text);
        scrub(&mut self.ocr_text);
        scrub(&mut self.transcription);
        scrub_list(&mut self.keywords);
        scrub_list(&mut self.participants);
        scrub_list(&mut self.action_items);
        self
    }
}

/// Contract every media analyzer implements.
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    async fn analyze(&self, request: &MediaRequest) -> Result<MediaAnalysisResult>;
}

/// One analyzer per media kind.
pub struct AnalyzerSet {
    image: Arc<dyn MediaAnalyzer>,
    audio: Arc<dyn MediaAnalyzer>,
    video: Arc<dyn MediaAnalyzer>,
}

impl AnalyzerSet {
    pub fn new(
        image: Arc<dyn MediaAnalyzer>,
        audio: Arc<dyn MediaAnalyzer>,
        video: Arc<dyn MediaAnalyzer>,
    ) -> Self {
        Self {
            image,
            audio,
            video,
        }
    }

    /// The analyzer handling the given media kind.
    pub fn for_media(&self, media_type: MediaType) -> Result<Arc<dyn MediaAnalyzer>> {
        match media_type {
            MediaType::Image => Ok(self.image.clone()),
            MediaType::Audio => Ok(self.audio.clone()),
            MediaType::Video => Ok(self.video.clone()),
            MediaType::Text => Err(VitenError::InvalidInput {
                field: "media_type",
                reason: "text documents have no media analyzer".to_string(),
            }),
        }
    }
}

/// Guess a MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "aiff" => "audio/aiff",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
    .to_string()
}
