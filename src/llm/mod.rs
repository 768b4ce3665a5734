//! Chat LLM provider contract.

mod openai;

pub use openai::OpenAiProvider;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// A single conversation turn. Transient; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Token count of the content, used by history budgeting.
    pub tokens: usize,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        let content = content.into();
        // Rough token estimate when the caller has no exact count.
        let tokens = content.chars().count().div_ceil(4);
        Self {
            role,
            content,
            tokens,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Outcome of one generation call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: Option<String>,
}

/// Contract of a chat LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for `prompt`, optionally preceded by a system
    /// prompt and prior conversation turns. Role mapping onto the concrete
    /// API is the provider's concern.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: Option<u32>,
        history: &[ChatMessage],
    ) -> Result<GenerationResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_token_estimate() {
        let msg = ChatMessage::user("12345678");
        assert_eq!(msg.tokens, 2);
        assert_eq!(ChatMessage::user("").tokens, 0);
    }
}
