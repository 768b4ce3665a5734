//! Prompt templates for Viten.
//!
//! Analyzer prompts carry a `{custom_instructions}` placeholder that is
//! replaced at request time; when no instructions are given the placeholder
//! collapses to an empty string.

use serde::{Deserialize, Serialize};

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    pub analyzers: AnalyzerPrompts,
    pub rag: RagPrompts,
}

/// Prompts for the media analyzers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerPrompts {
    pub image: String,
    pub audio: String,
    pub video: String,
    /// Per-kind extra instructions injected at `{custom_instructions}`.
    pub image_instructions: Option<String>,
    pub audio_instructions: Option<String>,
    pub video_instructions: Option<String>,
}

impl Default for AnalyzerPrompts {
    fn default() -> Self {
        Self {
            image: r#"Analyze this image for a searchable knowledge base.

Provide:
- "description": a thorough description of what the image shows
- "alt_text": a one-line accessible caption
- "ocr_text": all readable text in the image, preserving layout where possible
- "keywords": 5-10 search keywords

{custom_instructions}"#
                .to_string(),

            audio: r#"Transcribe and analyze this audio recording for a searchable knowledge base.

Provide:
- "description": a summary of what the recording covers
- "transcription": the full transcript, with [MM:SS] markers at topic changes
- "participants": the speakers you can distinguish
- "action_items": concrete follow-ups mentioned, if any
- "keywords": 5-10 search keywords
- "duration_seconds": total duration if determinable

{custom_instructions}"#
                .to_string(),

            video: r#"Analyze this video (sampled frames plus audio track) for a searchable knowledge base.

Provide:
- "description": what happens in the video
- "transcription": transcript of the audio track, with [MM:SS] markers
- "ocr_text": any text visible in the frames
- "keywords": 5-10 search keywords
- "duration_seconds": total duration if determinable

{custom_instructions}"#
                .to_string(),

            image_instructions: None,
            audio_instructions: None,
            video_instructions: None,
        }
    }
}

/// Prompts for RAG answer generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagPrompts {
    pub system: String,
}

impl Default for RagPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a helpful assistant that answers questions from the user's knowledge base.

Guidelines:
- Answer based ONLY on the provided context
- If the context doesn't contain the answer, say so clearly
- Cite sources by their [n] markers when relevant
- Format your answer as Markdown"#
                .to_string(),
        }
    }
}

/// Replace the `{custom_instructions}` placeholder in a template.
///
/// A missing instruction collapses the placeholder (and a trailing newline
/// pair before it) to nothing rather than leaving the marker in the prompt.
pub fn render_instructions(template: &str, custom_instructions: Option<&str>) -> String {
    match custom_instructions {
        Some(instructions) if !instructions.is_empty() => {
            template.replace("{custom_instructions}", instructions)
        }
        _ => template
            .replace("\n\n{custom_instructions}", "")
            .replace("{custom_instructions}", ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_instructions() {
        let rendered = render_instructions("Do X.\n\n{custom_instructions}", Some("Focus on Y."));
        assert_eq!(rendered, "Do X.\n\nFocus on Y.");
    }

    #[test]
    fn test_render_without_instructions() {
        let rendered = render_instructions("Do X.\n\n{custom_instructions}", None);
        assert_eq!(rendered, "Do X.");
        assert!(!rendered.contains("{custom_instructions}"));
    }

    #[test]
    fn test_default_analyzer_prompts_carry_placeholder() {
        let prompts = AnalyzerPrompts::default();
        assert!(prompts.image.contains("{custom_instructions}"));
        assert!(prompts.audio.contains("{custom_instructions}"));
        assert!(prompts.video.contains("{custom_instructions}"));
    }
}
