//! OpenAI-backed media analyzer with schema-constrained structured output.
//!
//! Requests go through the chat completions endpoint with a JSON-schema
//! response format, so the reply parses directly into
//! [`MediaAnalysisResult`]; a reply that fails schema validation or JSON
//! parsing is reported as a provider error.

use super::{frames, MediaAnalysisResult, MediaAnalyzer, MediaRequest};
use crate::config::{render_instructions, AnalyzerPrompts, MediaSettings};
use crate::error::{Result, VitenError};
use crate::store::MediaType;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, instrument, warn};

/// Media analyzer calling the OpenAI chat completions API.
pub struct OpenAiMediaAnalyzer {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    media_type: MediaType,
    model: String,
    max_output_tokens: u32,
    prompt_template: String,
    instructions: Option<String>,
    output_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenAiMediaAnalyzer {
    /// Build an analyzer for one media kind from the media settings.
    pub fn new(
        media_type: MediaType,
        settings: &MediaSettings,
        prompts: &AnalyzerPrompts,
    ) -> Result<Self> {
        let (prompt_template, instructions) = match media_type {
            MediaType::Image => (prompts.image.clone(), prompts.image_instructions.clone()),
            MediaType::Audio => (prompts.audio.clone(), prompts.audio_instructions.clone()),
            MediaType::Video => (prompts.video.clone(), prompts.video_instructions.clone()),
            MediaType::Text => {
                return Err(VitenError::InvalidInput {
                    field: "media_type",
                    reason: "no analyzer for text documents".to_string(),
                })
            }
        };

        Ok(Self {
            http: crate::openai::http_client()?,
            api_base: crate::openai::api_base(),
            api_key: crate::openai::api_key()?,
            media_type,
            model: settings.model.clone(),
            max_output_tokens: settings.max_output_tokens,
            prompt_template,
            instructions,
            output_language: settings.output_language.clone(),
        })
    }

    /// JSON schema the provider must conform to.
    fn response_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": { "type": ["string", "null"] },
                "alt_text": { "type": ["string", "null"] },
                "keywords": { "type": ["array", "null"], "items": { "type": "string" } },
                "ocr_text": { "type": ["string", "null"] },
                "transcription": { "type": ["string", "null"] },
                "participants": { "type": ["array", "null"], "items": { "type": "string" } },
                "action_items": { "type": ["array", "null"], "items": { "type": "string" } },
                "duration_seconds": { "type": ["number", "null"] }
            },
            "required": [
                "description", "alt_text", "keywords", "ocr_text",
                "transcription", "participants", "action_items", "duration_seconds"
            ],
            "additionalProperties": false
        })
    }

    fn system_prompt(&self, user_prompt: Option<&str>) -> String {
        let instructions = user_prompt
            .map(str::to_string)
            .or_else(|| self.instructions.clone());
        let mut prompt = render_instructions(&self.prompt_template, instructions.as_deref());
        if let Some(language) = &self.output_language {
            prompt.push_str(&format!("\n\nRespond in {}.", language));
        }
        prompt
    }

    fn encode_file(path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(VitenError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    fn image_part(path: &Path, mime_type: &str) -> Result<Value> {
        let data = Self::encode_file(path)?;
        Ok(json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{}", mime_type, data) }
        }))
    }

    fn audio_part(path: &Path) -> Result<Value> {
        let data = Self::encode_file(path)?;
        let format = match path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref()
        {
            Some("wav") => "wav",
            _ => "mp3",
        };
        Ok(json!({
            "type": "input_audio",
            "input_audio": { "data": data, "format": format }
        }))
    }

    /// Assemble the user-message content parts for the request's media.
    async fn content_parts(&self, request: &MediaRequest) -> Result<Vec<Value>> {
        let mut parts: Vec<Value> = Vec::new();

        if let Some(context) = &request.context_text {
            parts.push(json!({
                "type": "text",
                "text": format!("Context from the surrounding document:\n{}", context)
            }));
        }

        match self.media_type {
            MediaType::Image => {
                parts.push(Self::image_part(&request.path, &request.mime_type)?);
            }
            MediaType::Audio => {
                parts.push(Self::audio_part(&request.path)?);
            }
            MediaType::Video => {
                let temp = tempfile::tempdir()?;
                let frame_paths =
                    frames::extract_frames(&request.path, &request.video, temp.path()).await?;
                if frame_paths.is_empty() {
                    return Err(VitenError::MediaProcessing(format!(
                        "no frames extracted from {}",
                        request.path.display()
                    )));
                }
                for frame in &frame_paths {
                    parts.push(Self::image_part(frame, "image/jpeg")?);
                }

                // The audio track is optional; a silent video still gets
                // its frames analyzed.
                let audio_path = temp.path().join("track.mp3");
                match frames::extract_audio_track(&request.path, &audio_path).await {
                    Ok(()) => parts.push(Self::audio_part(&audio_path)?),
                    Err(e) => warn!("Skipping audio track for {}: {}", request.path.display(), e),
                }
            }
            MediaType::Text => {
                return Err(VitenError::InvalidInput {
                    field: "media_type",
                    reason: "no analyzer for text documents".to_string(),
                })
            }
        }

        Ok(parts)
    }
}

#[async_trait]
impl MediaAnalyzer for OpenAiMediaAnalyzer {
    #[instrument(skip_all, fields(path = %request.path.display()))]
    async fn analyze(&self, request: &MediaRequest) -> Result<MediaAnalysisResult> {
        let parts = self.content_parts(request).await?;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt(request.user_prompt.as_deref()) },
                { "role": "user", "content": parts }
            ],
            "max_completion_tokens": self.max_output_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "media_analysis",
                    "strict": true,
                    "schema": Self::response_schema()
                }
            }
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VitenError::OpenAI(format!(
                "analysis request failed with status {}: {}",
                status.as_u16(),
                detail
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| VitenError::OpenAI("empty analyzer response".to_string()))?;

        let result: MediaAnalysisResult = serde_json::from_str(content).map_err(|e| {
            VitenError::OpenAI(format!(
                "analyzer response failed schema validation: {}",
                e
            ))
        })?;

        let mut result = result.normalized();

        // Timecode validation needs a duration; probe one when the model
        // did not report it.
        if result.duration_seconds.is_none()
            && matches!(self.media_type, MediaType::Audio | MediaType::Video)
        {
            match frames::probe_duration(&request.path).await {
                Ok(duration) => result.duration_seconds = duration,
                Err(e) => debug!("Duration probe unavailable: {}", e),
            }
        }

        debug!("Analyzed {} as {}", request.path.display(), self.media_type);
        Ok(result)
    }
}
