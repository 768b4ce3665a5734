//! OpenAI chat provider implementation.

use super::{ChatMessage, ChatRole, GenerationResult, LlmProvider};
use crate::error::{Result, VitenError};
use crate::openai::create_client;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Chat provider backed by the OpenAI API.
pub struct OpenAiProvider {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(model: &str) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            model: model.to_string(),
        })
    }

    fn map_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let mapped = match message.role {
            ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map_err(|e| VitenError::Rag(e.to_string()))?
                .into(),
            ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map_err(|e| VitenError::Rag(e.to_string()))?
                .into(),
            ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map_err(|e| VitenError::Rag(e.to_string()))?
                .into(),
        };
        Ok(mapped)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: Option<u32>,
        history: &[ChatMessage],
    ) -> Result<GenerationResult> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Some(system) = system_prompt {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .map_err(|e| VitenError::Rag(e.to_string()))?
                    .into(),
            );
        }
        for turn in history {
            messages.push(Self::map_message(turn)?);
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .map_err(|e| VitenError::Rag(e.to_string()))?
                .into(),
        );

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(messages)
            .temperature(temperature);
        if let Some(max_tokens) = max_tokens {
            builder.max_tokens(max_tokens);
        }
        let request = builder
            .build()
            .map_err(|e| VitenError::Rag(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| VitenError::OpenAI(format!("Failed to generate response: {}", e)))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| VitenError::Rag("Empty response from LLM".to_string()))?;
        let text = choice
            .message
            .content
            .clone()
            .ok_or_else(|| VitenError::Rag("Empty response from LLM".to_string()))?;
        let finish_reason = choice
            .finish_reason
            .as_ref()
            .map(|r| format!("{:?}", r).to_lowercase());

        let (input_tokens, output_tokens) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        debug!(
            "Generated {} output tokens from {} input tokens",
            output_tokens, input_tokens
        );

        Ok(GenerationResult {
            text,
            model: response.model,
            input_tokens,
            output_tokens,
            finish_reason,
        })
    }
}
