//! LLM provider surface: the trait the handlers depend on plus two thin
//! clients (an OpenAI-compatible HTTP client and a scripted mock).

pub mod mock;
pub mod openai;
pub mod provider;
pub mod schema;

pub use mock::ScriptedLlmProvider;
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use provider::{extract_json, ChatMessage, LlmError, LlmProvider};
