//! OpenAI client configuration shared by the embedder, analyzers and LLM provider.

use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

use crate::error::{Result, VitenError};

/// Default timeout for OpenAI API requests (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create an OpenAI client with configured timeout.
///
/// Uses a 5-minute timeout by default to prevent hung API calls.
pub fn create_client() -> Result<Client<OpenAIConfig>> {
    create_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create an OpenAI client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| VitenError::OpenAI(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Client::with_config(OpenAIConfig::default()).with_http_client(http_client))
}

/// Base URL for raw HTTP calls that async-openai does not cover.
pub fn api_base() -> String {
    std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

/// API key for raw HTTP calls.
pub fn api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| VitenError::OpenAI("OPENAI_API_KEY environment variable not set".to_string()))
}

/// A reqwest client with the default request timeout applied.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| VitenError::OpenAI(format!("Failed to create HTTP client: {}", e)))
}
