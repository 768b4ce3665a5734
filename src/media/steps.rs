//! Built-in media pipeline steps: summary, transcription, OCR.

use super::pipeline::{MediaContext, ProcessingStep};
use super::timecode::TimecodeParser;
use crate::chunking::{split_text, SmartSplitter, SplitterConfig};
use crate::config::{MediaSettings, OcrParserMode};
use crate::error::Result;
use crate::parser::MarkdownNodeParser;
use crate::store::{Chunk, ChunkType};
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

/// Produces the single summary chunk for a media document.
///
/// Always runs. The chunk's type mirrors the document's media kind and
/// its content is the analysis description.
pub struct SummaryStep {
    max_size: usize,
}

impl SummaryStep {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn from_settings(settings: &MediaSettings) -> Self {
        Self::new(settings.chunk_sizes.summary())
    }
}

#[async_trait]
impl ProcessingStep for SummaryStep {
    fn step_name(&self) -> &'static str {
        "summary"
    }

    async fn process(&self, ctx: MediaContext) -> Result<MediaContext> {
        let media_path = ctx.media_path.to_string_lossy().to_string();
        let chunk_type = ChunkType::for_media(ctx.document.media_type);

        let mut chunk = Chunk::new("", chunk_type, ctx.base_index);
        super::apply_enrichment(&mut chunk, &ctx.analysis, ctx.document.media_type, &media_path);
        chunk.set_meta("role", json!("summary"));

        if chunk.content.chars().count() > self.max_size {
            chunk.content = chunk.content.chars().take(self.max_size).collect();
        }

        Ok(ctx.with_chunks(vec![chunk], true))
    }
}

/// Splits the analysis transcription into transcript chunks, optionally
/// enriched with `start_seconds` parsed from `[MM:SS]` tokens.
pub struct TranscriptionStep {
    chunk_size: usize,
    enable_timecodes: bool,
    strict_ordering: bool,
    parser: TimecodeParser,
}

impl TranscriptionStep {
    pub fn new(chunk_size: usize, enable_timecodes: bool, strict_ordering: bool) -> Self {
        Self {
            chunk_size,
            enable_timecodes,
            strict_ordering,
            parser: TimecodeParser::new(),
        }
    }

    pub fn from_settings(settings: &MediaSettings) -> Self {
        Self::new(
            settings.chunk_sizes.transcript(),
            settings.enable_timecodes,
            settings.strict_timecode_ordering,
        )
    }

    /// Assign `start_seconds` to each chunk.
    ///
    /// A chunk's own timecode wins when valid; otherwise the value is
    /// inherited from the last known one plus a uniform delta of
    /// `duration / total_chunks`. The first chunk without any timecode
    /// starts at 0. Tokens past the media duration (or going backwards,
    /// in strict mode) are dropped.
    fn assign_timecodes(&self, chunks: &mut [Chunk], duration: Option<f64>) {
        let total = chunks.len();
        if total == 0 {
            return;
        }
        let delta = duration.map_or(0.0, |d| d / total as f64);
        let mut last: Option<f64> = None;

        for chunk in chunks.iter_mut() {
            let token = self.parser.parse(&chunk.content).filter(|tc| {
                if duration.is_some_and(|d| tc.seconds > d) {
                    return false;
                }
                if self.strict_ordering && last.is_some_and(|l| tc.seconds < l) {
                    return false;
                }
                true
            });

            let start = match token {
                Some(tc) => {
                    chunk.set_meta("timecode_original", json!(tc.original));
                    tc.seconds
                }
                None => last.map_or(0.0, |l| l + delta),
            };

            chunk.set_meta("start_seconds", json!(start));
            last = Some(start);
        }
    }
}

#[async_trait]
impl ProcessingStep for TranscriptionStep {
    fn step_name(&self) -> &'static str {
        "transcription"
    }

    fn should_run(&self, ctx: &MediaContext) -> bool {
        ctx.analysis.transcription.is_some()
    }

    async fn process(&self, ctx: MediaContext) -> Result<MediaContext> {
        let Some(transcription) = ctx.analysis.transcription.clone() else {
            return Ok(ctx);
        };
        let media_path = ctx.media_path.to_string_lossy().to_string();

        let mut chunks: Vec<Chunk> = split_text(&transcription, self.chunk_size)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let mut chunk = Chunk::new(piece, ChunkType::Text, ctx.base_index + i as i64);
                chunk.set_meta("role", json!("transcript"));
                chunk.set_meta("parent_media_path", json!(media_path));
                chunk
            })
            .collect();

        if self.enable_timecodes {
            self.assign_timecodes(&mut chunks, ctx.analysis.duration_seconds);
        }

        Ok(ctx.with_chunks(chunks, true))
    }
}

/// Splits recognized text from the analysis into OCR chunks.
pub struct OcrStep {
    text_chunk_size: usize,
    code_chunk_size: usize,
    mode: OcrParserMode,
}

impl OcrStep {
    pub fn new(text_chunk_size: usize, code_chunk_size: usize, mode: OcrParserMode) -> Self {
        Self {
            text_chunk_size,
            code_chunk_size,
            mode,
        }
    }

    pub fn from_settings(settings: &MediaSettings) -> Self {
        Self::new(
            settings.chunk_sizes.ocr_text,
            settings.chunk_sizes.ocr_code,
            settings.ocr_parser_mode,
        )
    }
}

#[async_trait]
impl ProcessingStep for OcrStep {
    fn step_name(&self) -> &'static str {
        "ocr"
    }

    fn should_run(&self, ctx: &MediaContext) -> bool {
        ctx.analysis.ocr_text.is_some()
    }

    async fn process(&self, ctx: MediaContext) -> Result<MediaContext> {
        let Some(ocr_text) = ctx.analysis.ocr_text.clone() else {
            return Ok(ctx);
        };
        let media_path = ctx.media_path.to_string_lossy().to_string();
        let splitter = SmartSplitter::new(SplitterConfig {
            text_chunk_size: self.text_chunk_size,
            code_chunk_size: self.code_chunk_size,
        });

        let mut chunks = match self.mode {
            OcrParserMode::Markdown => {
                let segments = MarkdownNodeParser::new().parse(&ocr_text);
                splitter.split(&segments, ctx.base_index)
            }
            OcrParserMode::Plain => {
                splitter.split_plain_text(&ocr_text, self.text_chunk_size, ctx.base_index)
            }
        };

        for chunk in &mut chunks {
            chunk.set_meta("role", json!("ocr"));
            chunk.set_meta("parent_media_path", json!(media_path));
        }

        // OCR output that parses mostly as code usually means UI strings
        // are tripping the Markdown fence detection.
        if self.mode == OcrParserMode::Markdown && !chunks.is_empty() {
            let code_chunks = chunks
                .iter()
                .filter(|c| c.chunk_type == ChunkType::Code)
                .count();
            let code_ratio = code_chunks as f64 / chunks.len() as f64;
            if code_ratio > 0.5 {
                warn!(
                    "OCR output for {} is {:.0}% code chunks; consider ocr_parser_mode=plain",
                    media_path,
                    code_ratio * 100.0
                );
            }
        }

        Ok(ctx.with_chunks(chunks, true))
    }
}

/// The standard pipeline: summary, then transcription, then OCR.
pub fn standard_pipeline(settings: &MediaSettings) -> super::MediaPipeline {
    super::MediaPipeline::new(vec![
        Box::new(SummaryStep::from_settings(settings)),
        Box::new(TranscriptionStep::from_settings(settings)),
        Box::new(OcrStep::from_settings(settings)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::MediaAnalysisResult;
    use crate::store::{Document, MediaType};

    fn audio_ctx(analysis: MediaAnalysisResult) -> MediaContext {
        let mut document = Document::new("/m/talk.mp3", MediaType::Audio);
        document
            .metadata
            .insert("source".into(), json!("/m/talk.mp3"));
        MediaContext::new("/m/talk.mp3", document, analysis, 0)
    }

    #[tokio::test]
    async fn test_summary_step_emits_one_ref_chunk() {
        let analysis = MediaAnalysisResult {
            description: Some("A planning call about Q3.".to_string()),
            ..Default::default()
        };
        let ctx = SummaryStep::new(1500)
            .process(audio_ctx(analysis))
            .await
            .unwrap();

        assert_eq!(ctx.chunks.len(), 1);
        let summary = &ctx.chunks[0];
        assert_eq!(summary.chunk_type, ChunkType::AudioRef);
        assert_eq!(summary.content, "A planning call about Q3.");
        assert_eq!(summary.meta_str("role"), Some("summary"));
        assert!(summary.meta_flag("_enriched"));
        assert_eq!(ctx.base_index, 1);
    }

    #[tokio::test]
    async fn test_summary_truncates_to_max_size() {
        let analysis = MediaAnalysisResult {
            description: Some("x".repeat(3000)),
            ..Default::default()
        };
        let ctx = SummaryStep::new(500)
            .process(audio_ctx(analysis))
            .await
            .unwrap();
        assert_eq!(ctx.chunks[0].content.chars().count(), 500);
    }

    #[tokio::test]
    async fn test_transcription_step_skipped_without_transcript() {
        let step = TranscriptionStep::new(2000, true, false);
        assert!(!step.should_run(&audio_ctx(MediaAnalysisResult::default())));
    }

    #[tokio::test]
    async fn test_transcript_timecodes_and_inheritance() {
        let analysis = MediaAnalysisResult {
            transcription: Some("[00:05] Intro\n\n[00:30] Main\n\n[01:15] End".to_string()),
            duration_seconds: Some(90.0),
            ..Default::default()
        };
        let step = TranscriptionStep::new(600, true, false);
        let ctx = step.process(audio_ctx(analysis)).await.unwrap();

        // Short transcript fits one chunk; its first token wins.
        assert_eq!(ctx.chunks.len(), 1);
        let chunk = &ctx.chunks[0];
        assert_eq!(chunk.meta_f64("start_seconds"), Some(5.0));
        assert_eq!(chunk.meta_str("timecode_original"), Some("[00:05]"));
        assert_eq!(chunk.meta_str("role"), Some("transcript"));
        assert_eq!(chunk.meta_str("parent_media_path"), Some("/m/talk.mp3"));
    }

    #[tokio::test]
    async fn test_timecode_exceeding_duration_is_dropped() {
        let mut chunks = vec![
            Chunk::new("[00:05] fine", ChunkType::Text, 0),
            Chunk::new("[59:59] way past the end", ChunkType::Text, 1),
        ];
        let step = TranscriptionStep::new(2000, true, false);
        step.assign_timecodes(&mut chunks, Some(90.0));

        assert_eq!(chunks[0].meta_f64("start_seconds"), Some(5.0));
        // Invalid token: inherits 5 + 90/2.
        assert_eq!(chunks[1].meta_f64("start_seconds"), Some(50.0));
        assert!(chunks[1].meta_str("timecode_original").is_none());
    }

    #[tokio::test]
    async fn test_first_chunk_without_timecode_starts_at_zero() {
        let mut chunks = vec![
            Chunk::new("no marker here", ChunkType::Text, 0),
            Chunk::new("also bare", ChunkType::Text, 1),
        ];
        let step = TranscriptionStep::new(2000, true, false);
        step.assign_timecodes(&mut chunks, Some(60.0));

        assert_eq!(chunks[0].meta_f64("start_seconds"), Some(0.0));
        assert_eq!(chunks[1].meta_f64("start_seconds"), Some(30.0));
    }

    #[tokio::test]
    async fn test_strict_ordering_drops_backwards_tokens() {
        let mut chunks = vec![
            Chunk::new("[01:00] later", ChunkType::Text, 0),
            Chunk::new("[00:10] earlier", ChunkType::Text, 1),
        ];
        let strict = TranscriptionStep::new(2000, true, true);
        strict.assign_timecodes(&mut chunks, Some(120.0));
        assert_eq!(chunks[0].meta_f64("start_seconds"), Some(60.0));
        assert_eq!(chunks[1].meta_f64("start_seconds"), Some(120.0));
        assert!(chunks[1].meta_str("timecode_original").is_none());

        let mut chunks = vec![
            Chunk::new("[01:00] later", ChunkType::Text, 0),
            Chunk::new("[00:10] earlier", ChunkType::Text, 1),
        ];
        let lax = TranscriptionStep::new(2000, true, false);
        lax.assign_timecodes(&mut chunks, Some(120.0));
        assert_eq!(chunks[1].meta_f64("start_seconds"), Some(10.0));
    }

    #[tokio::test]
    async fn test_ocr_step_markdown_mode_detects_code() {
        let analysis = MediaAnalysisResult {
            ocr_text: Some("Slide title\n\n```python\nprint('demo')\n```".to_string()),
            ..Default::default()
        };
        let step = OcrStep::new(1800, 2000, OcrParserMode::Markdown);
        let ctx = step.process(audio_ctx(analysis)).await.unwrap();

        assert_eq!(ctx.chunks.len(), 2);
        assert_eq!(ctx.chunks[0].chunk_type, ChunkType::Text);
        assert_eq!(ctx.chunks[1].chunk_type, ChunkType::Code);
        assert!(ctx.chunks.iter().all(|c| c.meta_str("role") == Some("ocr")));
    }

    #[tokio::test]
    async fn test_ocr_step_plain_mode_has_no_code() {
        let analysis = MediaAnalysisResult {
            ocr_text: Some("Menu\n\n```looks like a fence```\n\nFooter".to_string()),
            ..Default::default()
        };
        let step = OcrStep::new(1800, 2000, OcrParserMode::Plain);
        let ctx = step.process(audio_ctx(analysis)).await.unwrap();

        assert!(!ctx.chunks.is_empty());
        assert!(ctx
            .chunks
            .iter()
            .all(|c| c.chunk_type == ChunkType::Text));
    }

    #[tokio::test]
    async fn test_standard_pipeline_order_and_indexes() {
        let analysis = MediaAnalysisResult {
            description: Some("Talk about rivers.".to_string()),
            transcription: Some("[00:01] hello".to_string()),
            ocr_text: Some("CHAPTER ONE".to_string()),
            duration_seconds: Some(30.0),
            ..Default::default()
        };
        let pipeline = standard_pipeline(&MediaSettings::default());
        let ctx = pipeline.run(audio_ctx(analysis)).await.unwrap();

        assert_eq!(ctx.chunks.len(), 3);
        assert_eq!(ctx.chunks[0].meta_str("role"), Some("summary"));
        assert_eq!(ctx.chunks[1].meta_str("role"), Some("transcript"));
        assert_eq!(ctx.chunks[2].meta_str("role"), Some("ocr"));
        let indexes: Vec<i64> = ctx.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }
}
