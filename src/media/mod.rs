//! Media processing: pipeline, steps, timecodes, queue and read-model.

mod pipeline;
mod queue;
mod service;
mod steps;
mod timecode;

pub use pipeline::{MediaContext, MediaPipeline, ProcessingStep};
pub use queue::MediaQueueProcessor;
pub use service::{MediaDetails, MediaService, TimelineEntry};
pub use steps::{standard_pipeline, OcrStep, SummaryStep, TranscriptionStep};
pub use timecode::{format_seconds, Timecode, TimecodeParser};

use crate::analyzers::MediaAnalysisResult;
use crate::store::{Chunk, MediaType};
use serde_json::json;

/// Write the analyzer result into a media-reference chunk.
///
/// The chunk's content becomes the analysis description and its metadata
/// gains the per-kind enrichment fields plus the `_enriched` flag and
/// `_original_path`. Used both by the summary step and by inline
/// enrichment during ingestion.
pub fn apply_enrichment(
    chunk: &mut Chunk,
    analysis: &MediaAnalysisResult,
    media_kind: MediaType,
    media_path: &str,
) {
    let description = analysis
        .description
        .clone()
        .or_else(|| analysis.alt_text.clone())
        .unwrap_or_else(|| {
            std::path::Path::new(media_path)
                .file_name()
                .map(|n| format!("Media file {}", n.to_string_lossy()))
                .unwrap_or_else(|| format!("Media file {}", media_path))
        });
    chunk.content = description;

    chunk.set_meta("_enriched", json!(true));
    chunk.set_meta("_original_path", json!(media_path));
    chunk.metadata.remove("_pending_enrichment");

    match media_kind {
        MediaType::Image => {
            if let Some(alt) = &analysis.alt_text {
                chunk.set_meta("alt", json!(alt));
            }
            if let Some(ocr) = &analysis.ocr_text {
                chunk.set_meta("_vision_ocr_text", json!(ocr));
            }
            if let Some(keywords) = &analysis.keywords {
                chunk.set_meta("_vision_keywords", json!(keywords));
            }
        }
        MediaType::Audio => {
            if let Some(transcription) = &analysis.transcription {
                chunk.set_meta("_audio_transcription", json!(transcription));
            }
            if let Some(participants) = &analysis.participants {
                chunk.set_meta("_audio_participants", json!(participants));
            }
            if let Some(items) = &analysis.action_items {
                chunk.set_meta("_audio_action_items", json!(items));
            }
            if let Some(keywords) = &analysis.keywords {
                chunk.set_meta("_audio_keywords", json!(keywords));
            }
            if let Some(duration) = analysis.duration_seconds {
                chunk.set_meta("_audio_duration_seconds", json!(duration));
            }
        }
        MediaType::Video => {
            if let Some(transcription) = &analysis.transcription {
                chunk.set_meta("_video_transcription", json!(transcription));
            }
            if let Some(ocr) = &analysis.ocr_text {
                chunk.set_meta("_video_ocr_text", json!(ocr));
            }
            if let Some(keywords) = &analysis.keywords {
                chunk.set_meta("_video_keywords", json!(keywords));
            }
            if let Some(duration) = analysis.duration_seconds {
                chunk.set_meta("_video_duration_seconds", json!(duration));
            }
        }
        MediaType::Text => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkType;

    #[test]
    fn test_apply_enrichment_overwrites_content_and_flags() {
        let mut chunk = Chunk::new("/pics/cat.png", ChunkType::ImageRef, 0);
        chunk.set_meta("_pending_enrichment", json!(true));

        let analysis = MediaAnalysisResult {
            description: Some("A cat on a windowsill.".to_string()),
            ocr_text: Some("WHISKAS".to_string()),
            keywords: Some(vec!["cat".to_string()]),
            ..Default::default()
        };
        apply_enrichment(&mut chunk, &analysis, MediaType::Image, "/pics/cat.png");

        assert_eq!(chunk.content, "A cat on a windowsill.");
        assert!(chunk.meta_flag("_enriched"));
        assert_eq!(chunk.meta_str("_original_path"), Some("/pics/cat.png"));
        assert_eq!(chunk.meta_str("_vision_ocr_text"), Some("WHISKAS"));
        assert!(!chunk.metadata.contains_key("_pending_enrichment"));
    }

    #[test]
    fn test_apply_enrichment_falls_back_to_file_name() {
        let mut chunk = Chunk::new("/m/talk.mp3", ChunkType::AudioRef, 0);
        let analysis = MediaAnalysisResult::default();
        apply_enrichment(&mut chunk, &analysis, MediaType::Audio, "/m/talk.mp3");
        assert_eq!(chunk.content, "Media file talk.mp3");
    }
}
