//! Draining the persistent media task queue.

use super::pipeline::MediaContext;
use super::steps::standard_pipeline;
use crate::analyzers::{retry_with_backoff, AnalyzerSet, MediaRequest, RateLimiterSet};
use crate::config::MediaSettings;
use crate::context::HierarchicalContext;
use crate::embedding::Embedder;
use crate::error::{Result, VitenError};
use crate::store::{MediaTask, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Processes queued media analysis tasks under the configured rate limits.
///
/// Driven by explicit calls only; an external scheduler decides when the
/// queue drains.
pub struct MediaQueueProcessor {
    store: Arc<SqliteStore>,
    analyzers: Arc<AnalyzerSet>,
    limiters: Arc<RateLimiterSet>,
    settings: MediaSettings,
    strategy: HierarchicalContext,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MediaQueueProcessor {
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

    /// Pick and process one pending task.
    ///
    /// Returns true iff a task was picked. Task failures are recorded on
    /// the task row, not surfaced as errors.
    #[instrument(skip(self))]
    pub async fn process_one(&self) -> Result<bool> {
        let Some(task) = self.store.claim_next_media_task()? else {
            return Ok(false);
        };
        let task_id = task.id.unwrap_or_default();

        match self.run_task(task).await {
            Ok(completed) => {
                self.store.complete_media_task(&completed)?;
                info!("Media task {} completed", task_id);
            }
            Err(error) => {
                self.store.fail_media_task(task_id, &error.to_string())?;
            }
        }
        Ok(true)
    }

    /// Drain up to `max_tasks` pending tasks.
    pub async fn process_batch(&self, max_tasks: usize) -> Result<usize> {
        let mut processed = 0;
        while processed < max_tasks {
            if !self.process_one().await? {
                break;
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn run_task(&self, mut task: MediaTask) -> Result<MediaTask> {
        let path = Path::new(&task.media_path);
        if !path.exists() {
            return Err(VitenError::FileNotFound(path.to_path_buf()));
        }

        self.limiters.wait(task.media_type).await;

        let analyzer = self.analyzers.for_media(task.media_type)?;
        let request = MediaRequest::new(path, task.media_type)
            .with_context(task.context_text.clone())
            .with_user_prompt(task.user_prompt.clone());
        let base_delay = Duration::from_millis(self.settings.retry_base_delay_ms);
        let analysis =
            retry_with_backoff(self.settings.max_retries, base_delay, || {
                analyzer.analyze(&request)
            })
            .await?;

        // Direct media documents were persisted at enqueue time with a
        // pending placeholder chunk; rebuild their chunk set from the
        // analysis. A reference embedded in a Markdown document instead
        // gets its pending chunk enriched in place.
        if let Some(document) = self.store.find_document_by_source(&task.media_path)? {
            let ctx = MediaContext::new(&task.media_path, document.clone(), analysis.clone(), 0)
                .with_user_instructions(task.user_prompt.clone());
            let ctx = standard_pipeline(&self.settings).run(ctx).await?;

            let mut chunks = ctx.chunks;
            crate::ingest::prepare_embeddings(
                &self.strategy,
                self.embedder.as_deref(),
                &document,
                &mut chunks,
            )
            .await?;

            let (_, saved_chunks) = self.store.save(document, chunks)?;

            task.result_chunk_id = saved_chunks
                .iter()
                .find(|c| c.meta_str("role") == Some("summary"))
                .and_then(|c| c.id);
        } else if let Some(mut chunk) = self.store.find_pending_media_chunk(&task.media_path)? {
            let document = chunk
                .document_id
                .and_then(|id| self.store.get_document(id).transpose())
                .transpose()?
                .ok_or(VitenError::NotFound {
                    entity: "document",
                    id: task.media_path.clone(),
                })?;

            crate::media::apply_enrichment(&mut chunk, &analysis, task.media_type, &task.media_path);
            let mut single = vec![chunk];
            crate::ingest::prepare_embeddings(
                &self.strategy,
                self.embedder.as_deref(),
                &document,
                &mut single,
            )
            .await?;
            let chunk = single.remove(0);
            self.store.update_chunk(&chunk)?;
            task.result_chunk_id = chunk.id;
        } else {
            return Err(VitenError::NotFound {
                entity: "document",
                id: task.media_path.clone(),
            });
        }
        task.description = analysis.description;
        task.alt_text = analysis.alt_text;
        task.keywords = analysis.keywords;
        task.ocr_text = analysis.ocr_text;
        task.transcription = analysis.transcription;
        task.participants = analysis.participants;
        task.action_items = analysis.action_items;
        task.duration_seconds = analysis.duration_seconds;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{MediaAnalysisResult, MediaAnalyzer};
    use crate::config::RateSettings;
    use crate::store::{Chunk, ChunkType, Document, EmbeddingStatus, MediaType, TaskStatus};
    use async_trait::async_trait;
    use serde_json::json;

    const DIM: usize = 3;

    struct FakeAnalyzer {
        fail: bool,
    }

    #[async_trait]
    impl MediaAnalyzer for FakeAnalyzer {
        async fn analyze(&self, _request: &MediaRequest) -> Result<MediaAnalysisResult> {
            if self.fail {
                return Err(VitenError::OpenAI("401 unauthorized".to_string()));
            }
            Ok(MediaAnalysisResult {
                description: Some("A standup recording.".to_string()),
                transcription: Some("[00:02] Good morning everyone".to_string()),
                duration_seconds: Some(60.0),
                ..Default::default()
            })
        }
    }

    fn processor(store: Arc<SqliteStore>, fail: bool) -> MediaQueueProcessor {
        let analyzer = Arc::new(FakeAnalyzer { fail });
        let analyzers = Arc::new(crate::analyzers::AnalyzerSet::new(
            analyzer.clone(),
            analyzer.clone(),
            analyzer,
        ));
        let limiters = Arc::new(RateLimiterSet::new(&RateSettings {
            image_rpm: 60_000,
            audio_rpm: 60_000,
            video_rpm: 60_000,
        }));
        MediaQueueProcessor::new(
            store,
            analyzers,
            limiters,
            MediaSettings {
                max_retries: 0,
                retry_base_delay_ms: 1,
                ..Default::default()
            },
            None,
        )
    }

    fn seed_direct_media(store: &SqliteStore) -> String {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("standup.mp3");
        std::fs::File::create(&clip).unwrap();
        let clip_str = clip.to_string_lossy().to_string();
        // The tempdir guard would delete the file; leak it for the test.
        std::mem::forget(dir);

        let mut doc = Document::new(&clip_str, MediaType::Audio);
        doc.metadata.insert("source".into(), json!(clip_str.clone()));
        let mut placeholder = Chunk::new(&clip_str, ChunkType::AudioRef, 0);
        placeholder.set_meta("_pending_enrichment", json!(true));
        placeholder.set_meta("_original_path", json!(clip_str.clone()));
        placeholder.embedding_status = EmbeddingStatus::Pending;
        store.save(doc, vec![placeholder]).unwrap();

        store
            .enqueue_media_task(crate::store::MediaTask::new(
                &clip_str,
                MediaType::Audio,
                "audio/mpeg",
            ))
            .unwrap();
        clip_str
    }

    #[tokio::test]
    async fn test_process_one_on_empty_queue() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        assert!(!processor(store, false).process_one().await.unwrap());
    }

    #[tokio::test]
    async fn test_process_one_completes_direct_media_task() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        let clip_str = seed_direct_media(&store);

        let picked = processor(store.clone(), false).process_one().await.unwrap();
        assert!(picked);

        let task = store.claim_next_media_task().unwrap();
        assert!(task.is_none(), "queue should be drained");

        let document = store.find_document_by_source(&clip_str).unwrap().unwrap();
        let chunks = store.get_chunks(document.id.unwrap()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].meta_str("role"), Some("summary"));
        assert_eq!(chunks[0].content, "A standup recording.");
        assert_eq!(chunks[1].meta_str("role"), Some("transcript"));
        assert_eq!(chunks[1].meta_f64("start_seconds"), Some(2.0));
        // Without an embedder the chunks wait for the batch manager.
        assert!(chunks
            .iter()
            .all(|c| c.embedding_status == EmbeddingStatus::Pending));
    }

    #[tokio::test]
    async fn test_failed_analysis_marks_task_failed() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        seed_direct_media(&store);

        let picked = processor(store.clone(), true).process_one().await.unwrap();
        assert!(picked);

        // The single task is no longer pending and carries the error.
        assert!(store.claim_next_media_task().unwrap().is_none());
        let failed = store.get_media_task(1).unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("401"));
    }

    #[tokio::test]
    async fn test_process_batch_stops_at_limit() {
        let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
        seed_direct_media(&store);
        seed_direct_media(&store);

        let processed = processor(store.clone(), false).process_batch(1).await.unwrap();
        assert_eq!(processed, 1);
        assert!(store.claim_next_media_task().unwrap().is_some());
    }
}
