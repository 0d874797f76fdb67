//! Error surface for the CDP adapter.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level failure categories for CDP traffic.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
pub enum CdpErrorKind {
    /// Websocket/process level failure.
    #[error("cdp i/o failure")]
    Io,
    /// A command exceeded its deadline.
    #[error("cdp command timed out")]
    Timeout,
    /// The browser answered with a protocol error payload.
    #[error("cdp protocol error")]
    Protocol,
    /// The target (page, frame) went away under us.
    #[error("cdp target closed")]
    TargetClosed,
    /// Invariant violation inside the adapter.
    #[error("cdp internal error")]
    Internal,
}

/// A failed CDP exchange, carrying the method that failed and a cause hint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdpError {
    pub kind: CdpErrorKind,
    pub method: Option<String>,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl CdpError {
    pub fn new(kind: CdpErrorKind) -> Self {
        Self {
            kind,
            method: None,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn is_target_closed(&self) -> bool {
        matches!(self.kind, CdpErrorKind::TargetClosed)
    }
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(method) = &self.method {
            write!(f, " during {method}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, ": {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CdpError {}
