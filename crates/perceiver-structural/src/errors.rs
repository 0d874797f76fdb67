//! Error types for structural perception.

use cdp_adapter::CdpError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PerceiveError {
    /// A CDP exchange failed while gathering page structure.
    #[error("cdp failure: {0}")]
    Cdp(#[from] CdpError),

    /// A frame named in a walk could not be located.
    #[error("frame not found: {0}")]
    FrameNotFound(String),

    /// A CDP payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Invariant violation inside the perceiver.
    #[error("internal error: {0}")]
    Internal(String),
}
