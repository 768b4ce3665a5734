//! The media processing pipeline: immutable context, step contract,
//! ordered executor.

use crate::analyzers::MediaAnalysisResult;
use crate::error::{Result, VitenError};
use crate::store::{Chunk, Document};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Immutable context flowing through the processing steps.
///
/// Steps never mutate a context; they return a new one through
/// [`MediaContext::with_chunks`].
#[derive(Debug, Clone)]
pub struct MediaContext {
    pub media_path: PathBuf,
    pub document: Document,
    pub analysis: MediaAnalysisResult,
    /// Chunks accumulated by earlier steps.
    pub chunks: Vec<Chunk>,
    /// Next free chunk index.
    pub base_index: i64,
    pub user_instructions: Option<String>,
}

impl MediaContext {
    pub fn new(
        media_path: impl Into<PathBuf>,
        document: Document,
        analysis: MediaAnalysisResult,
        base_index: i64,
    ) -> Self {
        Self {
            media_path: media_path.into(),
            document,
            analysis,
            chunks: Vec::new(),
            base_index,
            user_instructions: None,
        }
    }

    pub fn with_user_instructions(mut self, instructions: Option<String>) -> Self {
        self.user_instructions = instructions;
        self
    }

    /// Return a new context with the chunks appended.
    ///
    /// When `increment_index` is set, `base_index` advances past the new
    /// chunks so the next step continues the dense numbering.
    pub fn with_chunks(self, new_chunks: Vec<Chunk>, increment_index: bool) -> Self {
        let added = new_chunks.len() as i64;
        let mut chunks = self.chunks;
        chunks.extend(new_chunks);
        Self {
            base_index: if increment_index {
                self.base_index + added
            } else {
                self.base_index
            },
            chunks,
            ..self
        }
    }
}

/// A single stage of the media pipeline.
#[async_trait]
pub trait ProcessingStep: Send + Sync {
    /// Unique lowercase identifier.
    fn step_name(&self) -> &'static str;

    /// Whether this step applies to the given context.
    fn should_run(&self, _ctx: &MediaContext) -> bool {
        true
    }

    /// A failing optional step is logged and skipped instead of aborting
    /// the pipeline.
    fn is_optional(&self) -> bool {
        false
    }

    async fn process(&self, ctx: MediaContext) -> Result<MediaContext>;
}

/// Ordered executor over processing steps.
pub struct MediaPipeline {
    steps: Vec<Box<dyn ProcessingStep>>,
}

impl MediaPipeline {
    pub fn new(steps: Vec<Box<dyn ProcessingStep>>) -> Self {
        Self { steps }
    }

    /// Run every applicable step in declared order.
    pub async fn run(&self, mut ctx: MediaContext) -> Result<MediaContext> {
        for step in &self.steps {
            if !step.should_run(&ctx) {
                debug!("Skipping step '{}'", step.step_name());
                continue;
            }

            // Steps consume the context, so keep a restore point in case an
            // optional step fails.
            let checkpoint = ctx.clone();
            match step.process(ctx).await {
                Ok(next) => {
                    debug!(
                        "Step '{}' produced {} chunks",
                        step.step_name(),
                        next.chunks.len().saturating_sub(checkpoint.chunks.len())
                    );
                    ctx = next;
                }
                Err(error) if step.is_optional() => {
                    warn!("Optional step '{}' failed: {}", step.step_name(), error);
                    ctx = checkpoint;
                }
                Err(error) => {
                    return Err(VitenError::processing_step(step.step_name(), error));
                }
            }
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkType, MediaType};

    fn ctx() -> MediaContext {
        MediaContext::new(
            "/m/clip.mp4",
            Document::new("/m/clip.mp4", MediaType::Video),
            MediaAnalysisResult::default(),
            0,
        )
    }

    struct AddChunk {
        name: &'static str,
        optional: bool,
        fail: bool,
    }

    #[async_trait]
    impl ProcessingStep for AddChunk {
        fn step_name(&self) -> &'static str {
            self.name
        }

        fn is_optional(&self) -> bool {
            self.optional
        }

        async fn process(&self, ctx: MediaContext) -> Result<MediaContext> {
            if self.fail {
                return Err(VitenError::MediaProcessing(format!("{} broke", self.name)));
            }
            let chunk = Chunk::new(self.name, ChunkType::Text, ctx.base_index);
            Ok(ctx.with_chunks(vec![chunk], true))
        }
    }

    #[test]
    fn test_with_chunks_advances_base_index() {
        let ctx = ctx();
        let chunks = vec![
            Chunk::new("a", ChunkType::Text, 0),
            Chunk::new("b", ChunkType::Text, 1),
        ];
        let next = ctx.with_chunks(chunks, true);
        assert_eq!(next.base_index, 2);
        assert_eq!(next.chunks.len(), 2);

        let frozen = next.with_chunks(vec![Chunk::new("c", ChunkType::Text, 2)], false);
        assert_eq!(frozen.base_index, 2);
        assert_eq!(frozen.chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let pipeline = MediaPipeline::new(vec![
            Box::new(AddChunk { name: "one", optional: false, fail: false }),
            Box::new(AddChunk { name: "two", optional: false, fail: false }),
        ]);
        let result = pipeline.run(ctx()).await.unwrap();
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0].content, "one");
        assert_eq!(result.chunks[1].content, "two");
        assert_eq!(result.chunks[1].chunk_index, 1);
    }

    #[tokio::test]
    async fn test_optional_failure_is_swallowed() {
        let pipeline = MediaPipeline::new(vec![
            Box::new(AddChunk { name: "first", optional: false, fail: false }),
            Box::new(AddChunk { name: "broken", optional: true, fail: true }),
            Box::new(AddChunk { name: "last", optional: false, fail: false }),
        ]);
        let result = pipeline.run(ctx()).await.unwrap();
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[1].content, "last");
    }

    #[tokio::test]
    async fn test_required_failure_aborts_with_step_name() {
        let pipeline = MediaPipeline::new(vec![Box::new(AddChunk {
            name: "required",
            optional: false,
            fail: true,
        })]);
        match pipeline.run(ctx()).await {
            Err(VitenError::ProcessingStep { step, .. }) => assert_eq!(step, "required"),
            other => panic!("expected ProcessingStep error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_should_run_gates_step() {
        struct Gated;
        #[async_trait]
        impl ProcessingStep for Gated {
            fn step_name(&self) -> &'static str {
                "gated"
            }
            fn should_run(&self, ctx: &MediaContext) -> bool {
                ctx.analysis.transcription.is_some()
            }
            async fn process(&self, ctx: MediaContext) -> Result<MediaContext> {
                let chunk = Chunk::new("never", ChunkType::Text, ctx.base_index);
                Ok(ctx.with_chunks(vec![chunk], true))
            }
        }

        let pipeline = MediaPipeline::new(vec![Box::new(Gated)]);
        let result = pipeline.run(ctx()).await.unwrap();
        assert!(result.chunks.is_empty());
    }
}
