//! Viten - Local-first Semantic Knowledge Base
//!
//! Viten turns heterogeneous documents (Markdown with embedded media,
//! standalone images, audio and video) into a chunked, dual-indexed
//! SQLite store and answers questions over it.
//!
//! The name "Viten" comes from the Norwegian word for "knowledge."
//!
//! # Overview
//!
//! Viten allows you to:
//! - Ingest Markdown and media files into a searchable knowledge base
//! - Enrich media through AI analysis (descriptions, transcripts, OCR)
//! - Search by meaning, by keywords, or both fused with RRF
//! - Ask questions and get answers grounded in your own documents
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Configuration and prompt templates
//! - `parser` - Markdown parsing into typed segments
//! - `chunking` - Smart splitting of segments into chunks
//! - `store` - SQLite store with FTS and vector indexes
//! - `context` - Vector-text formation per chunk
//! - `media` - Media pipeline, task queue and read-model
//! - `analyzers` - External media analyzers, rate limiting, retry
//! - `embedding` - Embedding generation, sync and batched
//! - `batch` - Batch embedding job management
//! - `ingest` - The ingestion pipeline
//! - `search` - Vector, FTS and hybrid search
//! - `llm` - Chat LLM provider contract
//! - `rag` - Retrieval-augmented question answering
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use viten::config::Settings;
//! use viten::store::{Document, MediaType, SqliteStore};
//!
//! fn main() -> viten::Result<()> {
//!     let settings = Settings::load()?;
//!     let store = Arc::new(SqliteStore::new(
//!         &settings.db_path(),
//!         settings.embedding.dimensions,
//!     )?);
//!     println!("{} documents indexed", store.count_documents()?);
//!     Ok(())
//! }
//! ```

pub mod analyzers;
pub mod batch;
pub mod chunking;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod media;
pub mod openai;
pub mod parser;
pub mod rag;
pub mod search;
pub mod store;

pub use error::{Result, VitenError};
