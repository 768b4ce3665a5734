//! Error types for Viten.

use std::path::PathBuf;
use thiserror::Error;

/// Library-level error type for Viten operations.
#[derive(Error, Debug)]
pub enum VitenError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("External tool not found: {name}. {install_hint}")]
    DependencyMissing {
        name: &'static str,
        install_hint: &'static str,
    },

    #[error("Media processing failed: {0}")]
    MediaProcessing(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Processing step '{step}' failed: {source}")]
    ProcessingStep {
        step: &'static str,
        #[source]
        source: Box<VitenError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Batch job error: {0}")]
    Batch(String),

    #[error("RAG error: {0}")]
    Rag(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),
}

impl VitenError {
    /// Build the error a failed non-optional pipeline step surfaces.
    pub fn processing_step(step: &'static str, source: VitenError) -> Self {
        VitenError::ProcessingStep {
            step,
            source: Box::new(source),
        }
    }
}

/// Result type alias for Viten operations.
pub type Result<T> = std::result::Result<T, VitenError>;
