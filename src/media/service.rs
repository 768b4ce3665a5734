//! Media read-model and reprocessing.

use super::pipeline::MediaContext;
use super::steps::standard_pipeline;
use super::timecode::format_seconds;
use crate::analyzers::{retry_with_backoff, AnalyzerSet, MediaRequest, RateLimiterSet};
use crate::config::MediaSettings;
use crate::context::HierarchicalContext;
use crate::embedding::Embedder;
use crate::error::{Result, VitenError};
use crate::store::{Chunk, ChunkType, Document, MediaType, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Roles owned by the media pipeline; reprocessing replaces them.
const PIPELINE_ROLES: &[&str] = &["summary", "transcript", "ocr"];

/// One entry of the media timeline.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub chunk_id: i64,
    pub start_seconds: f64,
    pub content_preview: String,
    pub role: String,
    pub chunk_type: ChunkType,
}

impl TimelineEntry {
    /// `MM:SS` below one hour, `H:MM:SS` from there.
    pub fn formatted_time(&self) -> String {
        format_seconds(self.start_seconds)
    }
}

/// Aggregated view over a media document's chunks.
#[derive(Debug, Clone)]
pub struct MediaDetails {
    pub document_id: i64,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub ocr_text: Option<String>,
    pub timeline: Vec<TimelineEntry>,
}

/// Read-model aggregation and reprocessing over stored media documents.
pub struct MediaService {
    store: Arc<SqliteStore>,
    analyzers: Arc<AnalyzerSet>,
    limiters: Arc<RateLimiterSet>,
    settings: MediaSettings,
    strategy: HierarchicalContext,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MediaService {
    pub fn new(
        store: Arc<SqliteStore>,
        analyzers: Arc<AnalyzerSet>,
        limiters: Arc<RateLimiterSet>,
        settings: MediaSettings,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            store,
            analyzers,
            limiters,
            settings,
            strategy: HierarchicalContext::default(),
            embedder,
        }
    }

    /// Aggregate the stored media chunks of a document.
    #[instrument(skip(self))]
    pub fn get_media_details(
        &self,
        document_id: i64,
        include_transcript: bool,
        include_ocr: bool,
    ) -> Result<MediaDetails> {
        let _document = self
            .store
            .get_document(document_id)?
            .ok_or(VitenError::NotFound {
                entity: "document",
                id: document_id.to_string(),
            })?;

        let chunks = self.store.get_chunks(document_id)?;

        let summary = chunks
            .iter()
            .find(|c| c.meta_str("role") == Some("summary"))
            .map(|c| c.content.clone());

        let concat = |role: &str| -> Option<String> {
            let parts: Vec<&str> = chunks
                .iter()
                .filter(|c| c.meta_str("role") == Some(role))
                .map(|c| c.content.as_str())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n\n"))
            }
        };

        let transcript = if include_transcript {
            concat("transcript")
        } else {
            None
        };
        let ocr_text = if include_ocr { concat("ocr") } else { None };

        let mut timeline: Vec<TimelineEntry> = chunks
            .iter()
            .filter_map(|chunk| {
                let start_seconds = chunk.meta_f64("start_seconds")?;
                Some(TimelineEntry {
                    chunk_id: chunk.id.unwrap_or_default(),
                    start_seconds,
                    content_preview: preview(&chunk.content),
                    role: chunk.meta_str("role").unwrap_or("transcript").to_string(),
                    chunk_type: chunk.chunk_type,
                })
            })
            .collect();
        timeline.sort_by(|a, b| {
            a.start_seconds
                .partial_cmp(&b.start_seconds)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        timeline.truncate(self.settings.max_timeline_items);

        Ok(MediaDetails {
            document_id,
            summary,
            transcript,
            ocr_text,
            timeline,
        })
    }

    /// Re-analyze a media document and rebuild its pipeline chunks.
    ///
    /// Role-tagged chunks (summary, transcript, ocr) are deleted before the
    /// fresh ones are created, so no duplicates can appear; the whole swap
    /// is one atomic save.
    #[instrument(skip(self, custom_instructions))]
    pub async fn reprocess_document(
        &self,
        document_id: i64,
        custom_instructions: Option<&str>,
    ) -> Result<Document> {
        let document = self
            .store
            .get_document(document_id)?
            .ok_or(VitenError::NotFound {
                entity: "document",
                id: document_id.to_string(),
            })?;

        if document.media_type == MediaType::Text {
            return Err(VitenError::InvalidInput {
                field: "media_type",
                reason: "only media documents can be reprocessed".to_string(),
            });
        }

        let source = document
            .source()
            .ok_or(VitenError::InvalidInput {
                field: "metadata.source",
                reason: "media document has no source path".to_string(),
            })?
            .to_string();
        if !Path::new(&source).exists() {
            return Err(VitenError::FileNotFound(source.into()));
        }

        // Retain chunks the pipeline does not own, renumbered densely, with
        // their embeddings carried over so the atomic save restores them.
        let mut retained: Vec<Chunk> = Vec::new();
        for chunk in self.store.get_chunks(document_id)? {
            let role = chunk.meta_str("role");
            if role.is_some_and(|r| PIPELINE_ROLES.contains(&r)) {
                continue;
            }
            let mut kept = chunk;
            if let Some(id) = kept.id {
                kept.embedding = self.store.get_embedding(id)?;
            }
            kept.chunk_index = retained.len() as i64;
            retained.push(kept);
        }

        self.limiters.wait(document.media_type).await;
        let analyzer = self.analyzers.for_media(document.media_type)?;
        let request = MediaRequest::new(&source, document.media_type)
            .with_user_prompt(custom_instructions.map(str::to_string));
        let base_delay = Duration::from_millis(self.settings.retry_base_delay_ms);
        let analysis =
            retry_with_backoff(self.settings.max_retries, base_delay, || {
                analyzer.analyze(&request)
            })
            .await?;

        let ctx = MediaContext::new(&source, document.clone(), analysis, retained.len() as i64)
            .with_user_instructions(custom_instructions.map(str::to_string));
        let ctx = standard_pipeline(&self.settings).run(ctx).await?;

        let mut chunks = retained;
        chunks.extend(ctx.chunks);
        crate::ingest::prepare_embeddings(
            &self.strategy,
            self.embedder.as_deref(),
            &document,
            &mut chunks,
        )
        .await?;

        let (saved, saved_chunks) = self.store.save(document, chunks)?;
        info!(
            "Reprocessed document {} into {} chunks",
            document_id,
            saved_chunks.len()
        );
        Ok(saved)
    }
}

fn preview(content: &str) -> String {
    const MAX: usize = 100;
    let mut preview: String = content.chars().take(MAX).collect();
    if content.chars().count() > MAX {
        preview.push('…');
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{MediaAnalysisResult, MediaAnalyzer};
    use crate::config::RateSettings;
    use crate::store::Chunk;
    use async_trait::async_trait;
    use serde_json::json;

    const DIM: usize = 3;

    /// Echoes the custom instructions back into the description so tests
    /// can observe them.
    struct EchoAnalyzer;

    #[async_trait]
    impl MediaAnalyzer for EchoAnalyzer {
        async fn analyze(&self, request: &MediaRequest) -> crate::error::Result<MediaAnalysisResult> {
            let description = match &request.user_prompt {
                Some(instructions) => format!("Summary focused on: {}", instructions),
                None => "Plain summary.".to_string(),
            };
            Ok(MediaAnalysisResult {
                description: Some(description),
                transcription: Some("[00:03] fresh transcript".to_string()),
                duration_seconds: Some(30.0),
                ..Default::default()
            })
        }
    }

    fn service(store: Arc<SqliteStore>) -> MediaService {
        let analyzer = Arc::new(EchoAnalyzer);
        let analyzers = Arc::new(AnalyzerSet::new(
            analyzer.clone(),
            analyzer.clone(),
            analyzer,
        ));
        let limiters = Arc::new(RateLimiterSet::new(&RateSettings {
            image_rpm: 60_000,
            audio_rpm: 60_000,
            video_rpm: 60_000,
        }));
        MediaService::new(
            store,
            analyzers,
            limiters,
            crate::config::MediaSettings {
                max_retries: 0,
                retry_base_delay_ms: 1,
                ..Default::default()
            },
            None,
        )
    }

    fn seed_media_document(store: &SqliteStore) -> (i64, String) {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("lecture.mp3");
        std::fs::File::create(&clip).unwrap();
        let clip_str = clip.to_string_lossy().to_string();
        std::mem::forget(dir);

        let mut doc = Document::new(&clip_str, MediaType::Audio);
        doc.metadata.insert("source".into(), json!(clip_str.clone()));

        let mut summary = Chunk::new("Old summary.", ChunkType::AudioRef, 0);
        summary.set_meta("role", json!("summary"));
        summary.set_meta("_enriched", json!(true));
        let mut t1 = Chunk::new("[00:05] old part one", ChunkType::Text, 1);
        t1.set_meta("role", json!("transcript"));
        t1.set_meta("start_seconds", json!(5.0));
        let mut t2 = Chunk::new("[00:20] old part two", ChunkType::Text, 2);
        t2.set_meta("role", json!("transcript"));
        t2.set_meta("start_seconds", json!(20.0));
        let mut ocr = Chunk::new("OLD OCR", ChunkType::Text, 3);
        ocr.set_meta("role", json!("ocr"));
        ocr.set_meta("start_seconds", json!(90.0));

        let (saved, _) = store.save(doc, vec![summary, t1, t2, ocr]).unwrap();
        (saved.id.unwrap(), clip_str)
    }

    #[test]
    fn test_get_media_details_aggregates_roles() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        let (doc_id, _) = seed_media_document(&store);

        let details = service(store).get_media_details(doc_id, true, true).unwrap();
        assert_eq!(details.summary.as_deref(), Some("Old summary."));
        assert_eq!(
            details.transcript.as_deref(),
            Some("[00:05] old part one\n\n[00:20] old part two")
        );
        assert_eq!(details.ocr_text.as_deref(), Some("OLD OCR"));

        // Timeline sorted by start_seconds, transcripts before the late OCR.
        assert_eq!(details.timeline.len(), 3);
        assert_eq!(details.timeline[0].start_seconds, 5.0);
        assert_eq!(details.timeline[0].formatted_time(), "00:05");
        assert_eq!(details.timeline[2].role, "ocr");
    }

    #[test]
    fn test_get_media_details_can_exclude_sections() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        let (doc_id, _) = seed_media_document(&store);

        let details = service(store).get_media_details(doc_id, false, false).unwrap();
        assert!(details.summary.is_some());
        assert!(details.transcript.is_none());
        assert!(details.ocr_text.is_none());
    }

    #[test]
    fn test_get_media_details_unknown_document() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        let result = service(store).get_media_details(999, true, true);
        assert!(matches!(result, Err(VitenError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_reprocess_replaces_role_chunks() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        let (doc_id, _) = seed_media_document(&store);

        let saved = service(store.clone())
            .reprocess_document(doc_id, Some("Focus on medical terms"))
            .await
            .unwrap();
        assert_eq!(saved.id, Some(doc_id));

        let chunks = store.get_chunks(doc_id).unwrap();
        // Fresh summary + fresh transcript; the old four are gone.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].meta_str("role"), Some("summary"));
        assert_eq!(
            chunks[0].content,
            "Summary focused on: Focus on medical terms"
        );
        assert_eq!(chunks[1].meta_str("role"), Some("transcript"));
        assert_eq!(chunks[1].meta_f64("start_seconds"), Some(3.0));

        // No duplicate chunk indexes.
        let mut indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        indexes.dedup();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_reprocess_rejects_text_documents() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        let mut doc = Document::new("plain text", MediaType::Text);
        doc.metadata.insert("source".into(), json!("/notes/t.md"));
        let (saved, _) = store
            .save(doc, vec![Chunk::new("x", ChunkType::Text, 0)])
            .unwrap();

        let result = service(store)
            .reprocess_document(saved.id.unwrap(), None)
            .await;
        assert!(matches!(result, Err(VitenError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_reprocess_requires_source_on_disk() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        let mut doc = Document::new("/gone/clip.mp3", MediaType::Audio);
        doc.metadata.insert("source".into(), json!("/gone/clip.mp3"));
        let (saved, _) = store
            .save(doc, vec![Chunk::new("x", ChunkType::AudioRef, 0)])
            .unwrap();

        let result = service(store)
            .reprocess_document(saved.id.unwrap(), None)
            .await;
        assert!(matches!(result, Err(VitenError::FileNotFound(_))));
    }

    #[test]
    fn test_preview_truncation() {
        assert_eq!(preview("short"), "short");
        let long = "a".repeat(150);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 101);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn test_timeline_entry_formatted_time() {
        let entry = TimelineEntry {
            chunk_id: 1,
            start_seconds: 75.0,
            content_preview: "x".to_string(),
            role: "transcript".to_string(),
            chunk_type: ChunkType::Text,
        };
        assert_eq!(entry.formatted_time(), "01:15");

        let late = TimelineEntry {
            start_seconds: 3700.0,
            ..entry
        };
        assert_eq!(late.formatted_time(), "1:01:40");
    }
}
