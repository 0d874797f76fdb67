//! Deterministic provider used for tests and offline development.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::llm::provider::{ChatMessage, LlmError, LlmProvider};

/// Plays back a scripted queue of JSON responses and records every prompt it
/// was asked.
#[derive(Default)]
pub struct ScriptedLlmProvider {
    responses: Mutex<VecDeque<Value>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmProvider {
    pub fn new(responses: impl IntoIterator<Item = Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: Value) {
        self.responses.lock().push_back(response);
    }

    /// Every user-turn prompt seen so far, for assertions.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlmProvider {
    async fn chat_json(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<Value, LlmError> {
        if let Some(last_user) = messages.iter().rev().find(|m| m.role == "user") {
            self.prompts.lock().push(last_user.content.clone());
        }
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Provider("scripted response queue exhausted".to_string()))
    }
}
