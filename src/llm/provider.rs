//! The chat-with-JSON-output dependency boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One chat turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum LlmError {
    /// Transport or provider-side failure; propagated to the caller.
    #[error("llm provider error: {0}")]
    Provider(String),

    /// The model's output could not be parsed as JSON.
    #[error("invalid llm response: {0}")]
    InvalidResponse(String),

    #[error("missing api key: set {0}")]
    MissingApiKey(String),
}

/// Abstraction over chat models that can answer in JSON, so multiple vendors
/// plug into the handlers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run a chat completion and return the parsed JSON payload.
    async fn chat_json(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<Value, LlmError>;

    /// Produce an object shaped by a JSON schema from a single prompt.
    async fn generate_object(
        &self,
        prompt: &str,
        schema: &Value,
        temperature: f32,
    ) -> Result<Value, LlmError> {
        let messages = vec![
            ChatMessage::system(
                "You extract structured data. Respond with a single JSON value and nothing else.",
            ),
            ChatMessage::user(format!(
                "{prompt}\n\nThe response must be a JSON value conforming to this JSON schema:\n{schema}"
            )),
        ];
        self.chat_json(&messages, temperature).await
    }
}

/// Pull the first JSON object or array out of free-form model text.
pub fn extract_json(content: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(content.trim()) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (content.find(open), content.rfind(close)) {
            if end > start {
                if let Ok(value) = serde_json::from_str::<Value>(&content[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}
