//! Vector-text formation.
//!
//! The hierarchical strategy turns a chunk plus its parent document into
//! the string that is actually embedded and searched: document title,
//! section breadcrumbs, a kind-specific body, and the media source path
//! when relevant. The strategy is pure; identical inputs yield identical
//! strings.

use crate::store::{Chunk, ChunkType, Document};
use serde_json::Value;

/// Hierarchical vector-text strategy.
#[derive(Debug, Clone)]
pub struct HierarchicalContext {
    include_document_title: bool,
}

impl Default for HierarchicalContext {
    fn default() -> Self {
        Self {
            include_document_title: true,
        }
    }
}

impl HierarchicalContext {
    pub fn new(include_document_title: bool) -> Self {
        Self {
            include_document_title,
        }
    }

    /// Produce the vector text for a chunk.
    pub fn vector_text(&self, chunk: &Chunk, document: &Document) -> String {
        let mut lines: Vec<String> = Vec::new();

        if self.include_document_title {
            if let Some(title) = document.title() {
                lines.push(format!("Document: {}", title));
            }
        }

        let headers = chunk.headers();
        if !headers.is_empty() {
            lines.push(format!("Section: {}", headers.join(" > ")));
        }

        match chunk.chunk_type {
            ChunkType::Text => {
                lines.push("Type: Text".to_string());
                lines.push(chunk.content.clone());
            }
            ChunkType::Code => {
                lines.push("Type: Code".to_string());
                lines.push(chunk.content.clone());
            }
            ChunkType::ImageRef => {
                if chunk.meta_flag("_enriched") {
                    lines.push("Type: Image".to_string());
                    lines.push(format!("Description: {}", chunk.content));
                    if let Some(ocr) = chunk.meta_str("_vision_ocr_text") {
                        lines.push(format!("Visible text: {}", ocr));
                    }
                    push_keywords(&mut lines, chunk, "_vision_keywords");
                } else {
                    lines.push("Type: Image Reference".to_string());
                    if let Some(alt) = chunk.meta_str("alt") {
                        lines.push(format!("Description: {}", alt));
                    }
                }
            }
            ChunkType::AudioRef => {
                if chunk.meta_flag("_enriched") {
                    lines.push("Type: Audio".to_string());
                    if let Some(transcription) = chunk.meta_str("_audio_transcription") {
                        lines.push(format!("Transcription: {}", transcription));
                    }
                    push_list(&mut lines, chunk, "_audio_participants", "Speakers");
                    push_list(&mut lines, chunk, "_audio_action_items", "Action items");
                    push_keywords(&mut lines, chunk, "_audio_keywords");
                    if let Some(duration) = chunk.meta_f64("_audio_duration_seconds") {
                        lines.push(format!("Duration: {}s", duration));
                    }
                } else {
                    lines.push("Type: Audio Reference".to_string());
                    if let Some(alt) = chunk.meta_str("alt") {
                        lines.push(format!("Description: {}", alt));
                    }
                }
            }
            ChunkType::VideoRef => {
                if chunk.meta_flag("_enriched") {
                    lines.push("Type: Video".to_string());
                    lines.push(format!("Description: {}", chunk.content));
                    if let Some(transcription) = chunk.meta_str("_video_transcription") {
                        lines.push(format!("Audio transcription: {}", transcription));
                    }
                    if let Some(ocr) = chunk.meta_str("_video_ocr_text") {
                        lines.push(format!("Visible text: {}", ocr));
                    }
                    push_keywords(&mut lines, chunk, "_video_keywords");
                    if let Some(duration) = chunk.meta_f64("_video_duration_seconds") {
                        lines.push(format!("Duration: {}s", duration));
                    }
                } else {
                    lines.push("Type: Video Reference".to_string());
                    if let Some(alt) = chunk.meta_str("alt") {
                        lines.push(format!("Description: {}", alt));
                    }
                }
            }
        }

        let source = chunk
            .meta_str("_original_path")
            .or_else(|| chunk.meta_str("parent_media_path"));
        if let Some(source) = source {
            lines.push(format!("Source: {}", source));
        }

        lines.join("\n")
    }
}

fn meta_string_list(chunk: &Chunk, key: &str) -> Option<Vec<String>> {
    chunk.metadata.get(key).and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn push_keywords(lines: &mut Vec<String>, chunk: &Chunk, key: &str) {
    if let Some(keywords) = meta_string_list(chunk, key) {
        if !keywords.is_empty() {
            lines.push(format!("Keywords: {}", keywords.join(", ")));
        }
    }
}

fn push_list(lines: &mut Vec<String>, chunk: &Chunk, key: &str, label: &str) {
    if let Some(items) = meta_string_list(chunk, key) {
        if !items.is_empty() {
            lines.push(format!("{}: {}", label, items.join(", ")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MediaType;
    use serde_json::json;

    fn doc() -> Document {
        let mut doc = Document::new("body", MediaType::Text);
        doc.metadata.insert("title".into(), json!("Field Notes"));
        doc
    }

    #[test]
    fn test_text_chunk_vector_text() {
        let mut chunk = Chunk::new("Alpine flora overview.", ChunkType::Text, 0);
        chunk.set_meta("headers", json!(["Flora", "Alpine"]));

        let text = HierarchicalContext::default().vector_text(&chunk, &doc());
        assert_eq!(
            text,
            "Document: Field Notes\nSection: Flora > Alpine\nType: Text\nAlpine flora overview."
        );
    }

    #[test]
    fn test_title_can_be_disabled() {
        let chunk = Chunk::new("content", ChunkType::Text, 0);
        let text = HierarchicalContext::new(false).vector_text(&chunk, &doc());
        assert!(!text.contains("Document:"));
    }

    #[test]
    fn test_unenriched_image_uses_alt() {
        let mut chunk = Chunk::new("figures/peak.png", ChunkType::ImageRef, 0);
        chunk.set_meta("alt", json!("summit panorama"));

        let text = HierarchicalContext::default().vector_text(&chunk, &doc());
        assert!(text.contains("Type: Image Reference"));
        assert!(text.contains("Description: summit panorama"));
    }

    #[test]
    fn test_enriched_image_uses_analysis_fields() {
        let mut chunk = Chunk::new("A snowy summit at dawn.", ChunkType::ImageRef, 0);
        chunk.set_meta("_enriched", json!(true));
        chunk.set_meta("_vision_ocr_text", json!("ELEV 2469 M"));
        chunk.set_meta("_vision_keywords", json!(["mountain", "snow"]));
        chunk.set_meta("_original_path", json!("/photos/peak.png"));

        let text = HierarchicalContext::default().vector_text(&chunk, &doc());
        assert!(text.contains("Type: Image"));
        assert!(!text.contains("Image Reference"));
        assert!(text.contains("Description: A snowy summit at dawn."));
        assert!(text.contains("Visible text: ELEV 2469 M"));
        assert!(text.contains("Keywords: mountain, snow"));
        assert!(text.contains("Source: /photos/peak.png"));
    }

    #[test]
    fn test_enriched_audio_sections() {
        let mut chunk = Chunk::new("Weekly planning call.", ChunkType::AudioRef, 0);
        chunk.set_meta("_enriched", json!(true));
        chunk.set_meta("_audio_transcription", json!("[00:05] Intro"));
        chunk.set_meta("_audio_participants", json!(["Kim", "Ola"]));
        chunk.set_meta("_audio_action_items", json!(["send agenda"]));
        chunk.set_meta("_audio_duration_seconds", json!(90.0));

        let text = HierarchicalContext::default().vector_text(&chunk, &doc());
        assert!(text.contains("Type: Audio"));
        assert!(text.contains("Transcription: [00:05] Intro"));
        assert!(text.contains("Speakers: Kim, Ola"));
        assert!(text.contains("Action items: send agenda"));
        assert!(text.contains("Duration: 90s"));
    }

    #[test]
    fn test_strategy_is_deterministic() {
        let mut chunk = Chunk::new("content", ChunkType::VideoRef, 0);
        chunk.set_meta("_enriched", json!(true));
        chunk.set_meta("_video_transcription", json!("hello"));

        let strategy = HierarchicalContext::default();
        let document = doc();
        assert_eq!(
            strategy.vector_text(&chunk, &document),
            strategy.vector_text(&chunk, &document)
        );
    }
}
