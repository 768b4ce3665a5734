//! The ingestion pipeline.
//!
//! Orchestrates parse → split → optional media enrichment → vector-text
//! formation → embed → persist. Direct media documents route around the
//! parser and become a single enriched reference chunk (plus transcript
//! and OCR chunks from the pipeline). In async mode embedding and media
//! analysis are deferred to the batch manager and the media task queue.

use crate::analyzers::{retry_with_backoff, AnalyzerSet, MediaRequest, RateLimiterSet};
use crate::chunking::SmartSplitter;
use crate::config::{MediaSettings, ProcessingSettings};
use crate::context::HierarchicalContext;
use crate::embedding::Embedder;
use crate::error::{Result, VitenError};
use crate::media::{standard_pipeline, apply_enrichment, MediaContext};
use crate::parser::MarkdownNodeParser;
use crate::store::{
    Chunk, ChunkType, Document, EmbeddingStatus, MediaTask, MediaType, SqliteStore,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// When embedding and media analysis happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Embed and analyze inline, before persisting.
    #[default]
    Sync,
    /// Persist pending chunks; the batch manager and media queue catch up.
    Async,
}

/// Options for a single ingest call.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    pub mode: IngestMode,
    pub enrich_media: bool,
}

/// Orchestrates document ingestion end to end.
pub struct IngestionPipeline {
    store: Arc<SqliteStore>,
    embedder: Arc<dyn Embedder>,
    analyzers: Arc<AnalyzerSet>,
    limiters: Arc<RateLimiterSet>,
    parser: MarkdownNodeParser,
    splitter: SmartSplitter,
    strategy: HierarchicalContext,
    media_settings: MediaSettings,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<SqliteStore>,
        embedder: Arc<dyn Embedder>,
        analyzers: Arc<AnalyzerSet>,
        limiters: Arc<RateLimiterSet>,
        processing: &ProcessingSettings,
        media_settings: MediaSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            analyzers,
            limiters,
            parser: MarkdownNodeParser::new(),
            splitter: SmartSplitter::new(crate::chunking::SplitterConfig {
                text_chunk_size: processing.chunk_size(),
                code_chunk_size: processing.code_chunk_size(),
            }),
            strategy: HierarchicalContext::default(),
            media_settings,
        }
    }

    /// Ingest one document and return it with its assigned id.
    #[instrument(skip(self, document), fields(media_type = %document.media_type))]
    pub async fn ingest(&self, document: Document, options: IngestOptions) -> Result<Document> {
        if document.media_type != MediaType::Text {
            return self.ingest_direct_media(document, options).await;
        }

        let segments = self.parser.parse(&document.content);
        let mut chunks = self.splitter.split(&segments, 0);
        debug!("Split document into {} chunks", chunks.len());

        if options.enrich_media {
            self.enrich_embedded_media(&document, &mut chunks, options.mode)
                .await?;
        }

        let embedder = match options.mode {
            IngestMode::Sync => Some(self.embedder.as_ref() as &dyn Embedder),
            IngestMode::Async => None,
        };
        prepare_embeddings(&self.strategy, embedder, &document, &mut chunks).await?;

        let (saved, saved_chunks) = self.store.save(document, chunks)?;
        info!(
            "Ingested document {:?} with {} chunks",
            saved.id,
            saved_chunks.len()
        );
        Ok(saved)
    }

    /// The direct branch for image/audio/video documents.
    async fn ingest_direct_media(
        &self,
        document: Document,
        options: IngestOptions,
    ) -> Result<Document> {
        let source = document
            .source()
            .ok_or(VitenError::InvalidInput {
                field: "metadata.source",
                reason: "media documents require a source path".to_string(),
            })?
            .to_string();
        if !Path::new(&source).exists() {
            return Err(VitenError::FileNotFound(source.into()));
        }

        let mut chunks: Vec<Chunk>;

        if options.enrich_media && options.mode == IngestMode::Sync {
            match self.analyze_media(&document, &source, None).await {
                Ok(analysis) => {
                    let ctx =
                        MediaContext::new(&source, document.clone(), analysis, 0);
                    let ctx = standard_pipeline(&self.media_settings).run(ctx).await?;
                    chunks = ctx.chunks;
                }
                Err(error) => {
                    // Enrichment failure leaves a searchable placeholder
                    // rather than aborting the ingest.
                    warn!("Media enrichment failed for {}: {}", source, error);
                    let mut placeholder = self.placeholder_chunk(&document, &source);
                    placeholder.set_meta("_media_error", json!(error.to_string()));
                    chunks = vec![placeholder];
                }
            }
        } else {
            let mut placeholder = self.placeholder_chunk(&document, &source);
            if options.enrich_media {
                placeholder.set_meta("_pending_enrichment", json!(true));
                let mut task = MediaTask::new(
                    &source,
                    document.media_type,
                    crate::analyzers::mime_for_path(Path::new(&source)),
                );
                task.context_text = document.title();
                self.store.enqueue_media_task(task)?;
            }
            chunks = vec![placeholder];
        }

        let embedder = match options.mode {
            IngestMode::Sync => Some(self.embedder.as_ref() as &dyn Embedder),
            IngestMode::Async => None,
        };
        prepare_embeddings(&self.strategy, embedder, &document, &mut chunks).await?;

        let (saved, saved_chunks) = self.store.save(document, chunks)?;
        info!(
            "Ingested media document {:?} with {} chunks",
            saved.id,
            saved_chunks.len()
        );
        Ok(saved)
    }

    fn placeholder_chunk(&self, document: &Document, source: &str) -> Chunk {
        let mut chunk = Chunk::new(
            source,
            ChunkType::for_media(document.media_type),
            0,
        );
        chunk.set_meta("_original_path", json!(source));
        if let Some(title) = document.title() {
            chunk.set_meta("alt", json!(title));
        }
        chunk
    }

    /// Walk media-reference chunks of a parsed document, enriching inline
    /// (sync) or enqueueing media tasks (async).
    async fn enrich_embedded_media(
        &self,
        document: &Document,
        chunks: &mut [Chunk],
        mode: IngestMode,
    ) -> Result<()> {
        // Neighbor excerpts are collected up front since enrichment
        // rewrites chunk contents.
        let excerpts: Vec<String> = chunks.iter().map(|c| excerpt(&c.content)).collect();

        for i in 0..chunks.len() {
            if !chunks[i].chunk_type.is_media_ref() || chunks[i].meta_flag("_enriched") {
                continue;
            }

            let reference = chunks[i].content.clone();
            if is_remote_reference(&reference) {
                debug!("Skipping remote media reference {}", reference);
                continue;
            }

            let Some(resolved) = resolve_media_path(&reference, document.source()) else {
                warn!("Media reference {} not found on disk", reference);
                chunks[i].set_meta(
                    "_media_error",
                    json!(format!("file not found: {}", reference)),
                );
                continue;
            };
            let resolved_str = resolved.to_string_lossy().to_string();

            let media_kind = match chunks[i].chunk_type {
                ChunkType::AudioRef => MediaType::Audio,
                ChunkType::VideoRef => MediaType::Video,
                _ => MediaType::Image,
            };
            let context_text = neighbor_context(&excerpts, &chunks[i].headers(), i);

            match mode {
                IngestMode::Sync => {
                    match self
                        .analyze_media_kind(media_kind, &resolved_str, Some(context_text))
                        .await
                    {
                        Ok(analysis) => {
                            apply_enrichment(&mut chunks[i], &analysis, media_kind, &resolved_str);
                        }
                        Err(error) => {
                            warn!("Enrichment of {} failed: {}", resolved_str, error);
                            chunks[i].set_meta("_media_error", json!(error.to_string()));
                        }
                    }
                }
                IngestMode::Async => {
                    let mut task = MediaTask::new(
                        &resolved_str,
                        media_kind,
                        crate::analyzers::mime_for_path(&resolved),
                    );
                    task.context_text = Some(context_text);
                    self.store.enqueue_media_task(task)?;
                    chunks[i].set_meta("_pending_enrichment", json!(true));
                    chunks[i].set_meta("_original_path", json!(resolved_str));
                }
            }
        }
        Ok(())
    }

    async fn analyze_media(
        &self,
        document: &Document,
        source: &str,
        context_text: Option<String>,
    ) -> Result<crate::analyzers::MediaAnalysisResult> {
        self.analyze_media_kind(document.media_type, source, context_text)
            .await
    }

    async fn analyze_media_kind(
        &self,
        media_kind: MediaType,
        source: &str,
        context_text: Option<String>,
    ) -> Result<crate::analyzers::MediaAnalysisResult> {
        self.limiters.wait(media_kind).await;
        let analyzer = self.analyzers.for_media(media_kind)?;
        let mut request = MediaRequest::new(source, media_kind).with_context(context_text);
        request.video = self.media_settings.video.clone();

        let base_delay = Duration::from_millis(self.media_settings.retry_base_delay_ms);
        retry_with_backoff(self.media_settings.max_retries, base_delay, || {
            analyzer.analyze(&request)
        })
        .await
    }
}

/// Form each chunk's vector text and either embed it now or mark it
/// pending with the text stashed for the batch manager.
///
/// Chunks already carrying an embedding (retained across a reprocess)
/// are left untouched.
pub(crate) async fn prepare_embeddings(
    strategy: &HierarchicalContext,
    embedder: Option<&dyn Embedder>,
    document: &Document,
    chunks: &mut [Chunk],
) -> Result<()> {
    let todo: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, chunk)| chunk.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    let texts: Vec<String> = todo
        .iter()
        .map(|&i| strategy.vector_text(&chunks[i], document))
        .collect();

    match embedder {
        Some(embedder) => {
            if texts.is_empty() {
                return Ok(());
            }
            let vectors = embedder.embed_documents(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(VitenError::Embedding(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    texts.len()
                )));
            }
            for (&i, vector) in todo.iter().zip(vectors) {
                chunks[i].embedding = Some(vector);
                chunks[i].embedding_status = EmbeddingStatus::Ready;
                chunks[i].metadata.remove("_vector_source");
            }
        }
        None => {
            for (&i, text) in todo.iter().zip(texts) {
                chunks[i].embedding_status = EmbeddingStatus::Pending;
                chunks[i].set_meta("_vector_source", json!(text));
            }
        }
    }
    Ok(())
}

/// Whether a media reference points outside the local filesystem.
fn is_remote_reference(reference: &str) -> bool {
    if reference.starts_with("data:") {
        return true;
    }
    match url::Url::parse(reference) {
        Ok(parsed) => parsed.scheme() != "file" && parsed.scheme().len() > 1,
        Err(_) => false,
    }
}

/// Resolve a media reference: absolute, then relative to the document's
/// source directory, then relative to the working directory.
fn resolve_media_path(reference: &str, document_source: Option<&str>) -> Option<PathBuf> {
    let as_path = Path::new(reference);
    if as_path.is_absolute() {
        return as_path.exists().then(|| as_path.to_path_buf());
    }

    if let Some(source) = document_source {
        if let Some(dir) = Path::new(source).parent() {
            let candidate = dir.join(as_path);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    let cwd_candidate = std::env::current_dir().ok()?.join(as_path);
    cwd_candidate.exists().then_some(cwd_candidate)
}

fn excerpt(content: &str) -> String {
    const MAX: usize = 200;
    content.chars().take(MAX).collect()
}

/// Build the context text for an embedded media reference from its
/// breadcrumbs and neighboring chunk excerpts.
fn neighbor_context(excerpts: &[String], headers: &[String], index: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !headers.is_empty() {
        parts.push(format!("Section: {}", headers.join(" > ")));
    }
    if index > 0 {
        parts.push(format!("Before: {}", excerpts[index - 1]));
    }
    if index + 1 < excerpts.len() {
        parts.push(format!("After: {}", excerpts[index + 1]));
    }
    parts.join("\n")
}
