//! OpenAI-compatible chat client.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::provider::{extract_json, ChatMessage, LlmError, LlmProvider};

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: std::env::var("WEBPILOT_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("WEBPILOT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        }
    }
}

pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(OpenAiConfig::default())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat_json(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<Value, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingApiKey("OPENAI_API_KEY".to_string()))?;

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": temperature,
            "response_format": { "type": "json_object" },
        });

        debug!(
            target: "llm",
            model = %self.config.model,
            messages = messages.len(),
            "chat completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Provider(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!(
                "chat completion failed with {status}: {detail}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| LlmError::Provider(err.to_string()))?;

        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LlmError::InvalidResponse("completion payload missing message content".to_string())
            })?;

        extract_json(content)
            .ok_or_else(|| LlmError::InvalidResponse(format!("content is not JSON: {content}")))
    }
}
