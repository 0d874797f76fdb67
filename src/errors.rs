//! Top-level error taxonomy.

use serde_json::Value;
use thiserror::Error;

use action_primitives::ActionError;
use cdp_adapter::CdpError;
use perceiver_structural::PerceiveError;

use crate::llm::LlmError;

/// Everything a webpilot call can fail with. Every variant carries a short
/// human message and maps to a machine-tractable kind tag.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// A page or context was used before startup completed.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error(transparent)]
    Cdp(#[from] CdpError),

    #[error(transparent)]
    Perceive(#[from] PerceiveError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Observe returned no candidates, or a resolved XPath matched nothing.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Extract output did not conform to the requested schema; carries the
    /// offending payload.
    #[error("schema validation failed: {reason}")]
    SchemaValidation { reason: String, payload: Value },

    #[error("unsupported method: {0}")]
    Unsupported(String),
}

impl AutomationError {
    /// Stable tag for logs and metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            AutomationError::NotInitialized(_) => "not_initialized",
            AutomationError::Cdp(_) => "cdp",
            AutomationError::Perceive(_) => "perceive",
            AutomationError::Action(_) => "action",
            AutomationError::Llm(_) => "llm",
            AutomationError::Timeout { .. } => "timeout",
            AutomationError::ElementNotFound(_) => "element_not_found",
            AutomationError::SchemaValidation { .. } => "schema_validation",
            AutomationError::Unsupported(_) => "unsupported",
        }
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
