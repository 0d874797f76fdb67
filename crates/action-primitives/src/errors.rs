//! Error types for action dispatch.

use thiserror::Error;

/// Failures raised while resolving or executing an element-level action.
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    /// A resolved XPath matched zero nodes.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The click path failed; carries the target XPath and the captured cause.
    #[error("click: {cause} (xpath {xpath})")]
    ClickFailed { xpath: String, cause: String },

    /// A non-click method failed against a resolved element.
    #[error("{method}: {cause} (xpath {xpath})")]
    MethodFailed {
        method: String,
        xpath: String,
        cause: String,
    },

    /// An iframe step in an absolute path could not be resolved.
    #[error("frame chain unresolved: {0}")]
    FrameChainUnresolved(String),

    /// A wait bound elapsed.
    #[error("wait timeout: {0}")]
    WaitTimeout(String),

    /// The context was cancelled or its deadline passed.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// The dispatcher was asked to run a method outside the closed set.
    #[error("unsupported method: {0}")]
    Unsupported(String),

    /// CDP communication failure.
    #[error("cdp i/o: {0}")]
    CdpIo(String),

    /// Invariant violation inside the dispatcher.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Whether a self-heal retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionError::ElementNotFound(_)
                | ActionError::ClickFailed { .. }
                | ActionError::MethodFailed { .. }
                | ActionError::WaitTimeout(_)
                | ActionError::CdpIo(_)
        )
    }

    /// Short machine-tractable tag for logs and act metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::ElementNotFound(_) => "element_not_found",
            ActionError::ClickFailed { .. } => "click_failed",
            ActionError::MethodFailed { .. } => "method_failed",
            ActionError::FrameChainUnresolved(_) => "frame_chain_unresolved",
            ActionError::WaitTimeout(_) => "wait_timeout",
            ActionError::Interrupted(_) => "interrupted",
            ActionError::Unsupported(_) => "unsupported",
            ActionError::CdpIo(_) => "cdp_io",
            ActionError::Internal(_) => "internal",
        }
    }
}

impl From<cdp_adapter::CdpError> for ActionError {
    fn from(err: cdp_adapter::CdpError) -> Self {
        ActionError::CdpIo(err.to_string())
    }
}
