//! Retrieval-augmented question answering over the knowledge base.

mod history;

pub use history::{ChatHistoryManager, HistoryPolicy};

use crate::config::{Prompts, RagSettings};
use crate::error::{Result, VitenError};
use crate::llm::{ChatMessage, GenerationResult, LlmProvider};
use crate::search::{SearchEngine, SearchMode, SearchOptions};
use crate::store::ChunkResult;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Options for a single `ask` call.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Retrieve whole documents instead of chunks.
    pub full_docs: bool,
    /// Neighboring chunks pulled in around each match (chunk mode).
    pub context_window: i64,
    /// Metadata filters forwarded to retrieval.
    pub filters: Vec<(String, serde_json::Value)>,
}

/// An answer with its supporting sources and generation metrics.
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<ChunkResult>,
    pub generation: GenerationResult,
}

/// RAG engine: retrieve, build a source-annotated prompt, generate.
pub struct RagEngine {
    search: Arc<SearchEngine>,
    llm: Arc<dyn LlmProvider>,
    settings: RagSettings,
    prompts: Prompts,
}

impl RagEngine {
    pub fn new(
        search: Arc<SearchEngine>,
        llm: Arc<dyn LlmProvider>,
        settings: RagSettings,
        prompts: Prompts,
    ) -> Self {
        Self {
            search,
            llm,
            settings,
            prompts,
        }
    }

    /// Answer a question from the knowledge base.
    #[instrument(skip(self, options, history), fields(query = %query))]
    pub async fn ask(
        &self,
        query: &str,
        mode: SearchMode,
        options: &AskOptions,
        history: &[ChatMessage],
    ) -> Result<RagAnswer> {
        if query.trim().is_empty() {
            return Err(VitenError::InvalidInput {
                field: "query",
                reason: "empty question".to_string(),
            });
        }

        let search_options = SearchOptions {
            filters: options.filters.clone(),
            limit: self.settings.context_chunks,
            context_window: if options.full_docs {
                0
            } else {
                options.context_window
            },
        };

        let sources = self.search.search_chunks(query, mode, &search_options).await?;
        info!("Retrieved {} source chunks", sources.len());

        let context = if options.full_docs {
            build_document_context(&sources)
        } else {
            build_chunk_context(&sources)
        };

        let system_prompt = format!("{}\n\nContext:\n{}", self.prompts.rag.system, context);
        debug!("System prompt is {} chars", system_prompt.len());

        let generation = self
            .llm
            .generate(
                query,
                Some(&system_prompt),
                self.settings.temperature,
                self.settings.max_tokens,
                history,
            )
            .await?;

        Ok(RagAnswer {
            answer: generation.text.clone(),
            sources,
            generation,
        })
    }
}

/// Chunk-mode context: `[i] <title> (score: s)` blocks.
fn build_chunk_context(sources: &[ChunkResult]) -> String {
    if sources.is_empty() {
        return "(no matching content found)".to_string();
    }

    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let title = source
                .document
                .as_ref()
                .and_then(|d| d.title())
                .unwrap_or_else(|| "untitled".to_string());
            format!(
                "[{}] {} (score: {:.4})\n{}",
                i + 1,
                title,
                source.score,
                source.chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Full-document context: each document once, whole content.
fn build_document_context(sources: &[ChunkResult]) -> String {
    if sources.is_empty() {
        return "(no matching content found)".to_string();
    }

    let mut seen: std::collections::HashSet<i64> = std::collections::HashSet::new();
    let mut blocks: Vec<String> = Vec::new();

    for source in sources {
        let Some(document) = &source.document else {
            continue;
        };
        let Some(doc_id) = document.id else { continue };
        if !seen.insert(doc_id) {
            continue;
        }
        let label = document
            .source()
            .map(str::to_string)
            .or_else(|| document.title())
            .unwrap_or_else(|| format!("document {}", doc_id));
        blocks.push(format!("[{}]\n{}", label, document.content));
    }

    blocks.join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::store::{Chunk, ChunkType, Document, MatchType, MediaType, SqliteStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        fn dimensions(&self) -> usize {
            3
        }
    }

    /// Records the prompt it was called with and echoes a fixed answer.
    struct FakeLlm {
        seen_system: Mutex<Option<String>>,
        seen_history_len: Mutex<usize>,
    }

    #[async_trait]
    impl LlmProvider for FakeLlm {
        async fn generate(
            &self,
            _prompt: &str,
            system_prompt: Option<&str>,
            _temperature: f32,
            _max_tokens: Option<u32>,
            history: &[ChatMessage],
        ) -> Result<GenerationResult> {
            *self.seen_system.lock().unwrap() = system_prompt.map(str::to_string);
            *self.seen_history_len.lock().unwrap() = history.len();
            Ok(GenerationResult {
                text: "The answer.".to_string(),
                model: "fake-model".to_string(),
                input_tokens: 10,
                output_tokens: 3,
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    fn seeded_engine() -> (Arc<FakeLlm>, RagEngine) {
        let store = Arc::new(SqliteStore::in_memory(3).unwrap());
        let mut doc = Document::new("Full body of the note.", MediaType::Text);
        doc.metadata.insert("source".into(), json!("/notes/n.md"));
        let mut chunk = Chunk::new("Answer-bearing chunk content.", ChunkType::Text, 0);
        chunk.embedding = Some(vec![1.0, 0.0, 0.0]);
        store.save(doc, vec![chunk]).unwrap();

        let search = Arc::new(SearchEngine::new(store, Arc::new(FixedEmbedder), 60));
        let llm = Arc::new(FakeLlm {
            seen_system: Mutex::new(None),
            seen_history_len: Mutex::new(0),
        });
        let engine = RagEngine::new(
            search,
            llm.clone(),
            RagSettings::default(),
            Prompts::default(),
        );
        (llm, engine)
    }

    #[tokio::test]
    async fn test_ask_returns_answer_and_sources() {
        let (llm, engine) = seeded_engine();
        let answer = engine
            .ask("what is in the note", SearchMode::Vector, &AskOptions::default(), &[])
            .await
            .unwrap();

        assert_eq!(answer.answer, "The answer.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.generation.output_tokens, 3);

        let system = llm.seen_system.lock().unwrap().clone().unwrap();
        assert!(system.contains("ONLY on the provided context"));
        assert!(system.contains("[1] n.md"));
        assert!(system.contains("Answer-bearing chunk content."));
    }

    #[tokio::test]
    async fn test_ask_full_docs_uses_document_content() {
        let (llm, engine) = seeded_engine();
        let options = AskOptions {
            full_docs: true,
            ..Default::default()
        };
        engine
            .ask("question", SearchMode::Vector, &options, &[])
            .await
            .unwrap();

        let system = llm.seen_system.lock().unwrap().clone().unwrap();
        assert!(system.contains("[/notes/n.md]"));
        assert!(system.contains("Full body of the note."));
    }

    #[tokio::test]
    async fn test_ask_forwards_history() {
        let (llm, engine) = seeded_engine();
        let history = vec![
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
        ];
        engine
            .ask("follow-up", SearchMode::Vector, &AskOptions::default(), &history)
            .await
            .unwrap();
        assert_eq!(*llm.seen_history_len.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let (_, engine) = seeded_engine();
        let result = engine
            .ask("", SearchMode::Hybrid, &AskOptions::default(), &[])
            .await;
        assert!(matches!(result, Err(VitenError::InvalidInput { .. })));
    }

    #[test]
    fn test_chunk_context_block_format() {
        let chunk = Chunk::new("body", ChunkType::Text, 0);
        let mut doc = Document::new("d", MediaType::Text);
        doc.id = Some(1);
        doc.metadata.insert("title".into(), json!("My Note"));
        let sources = vec![ChunkResult {
            chunk,
            document: Some(doc),
            score: 0.0328,
            match_type: MatchType::Hybrid,
        }];

        let context = build_chunk_context(&sources);
        assert!(context.starts_with("[1] My Note (score: 0.0328)\nbody"));
    }
}
