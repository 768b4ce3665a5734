//! Embedding generation for semantic search and retrieval.

mod batch;
mod openai;

pub use batch::{
    encode_request_lines, parse_custom_id, parse_result_lines, BatchEmbeddingClient,
    BatchRequestLine, BatchResultLine, HttpBatchClient, RemoteBatchStatus,
};
pub use openai::OpenAiEmbedder;

use crate::error::Result;
use async_trait::async_trait;

/// Trait for embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of document texts.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed dimension of every produced vector.
    fn dimensions(&self) -> usize;
}
