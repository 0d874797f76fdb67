//! Execution context threaded through every primitive.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Runtime context for one action attempt: deadline, cooperative
/// cancellation, and a correlation id for tracing.
#[derive(Clone)]
pub struct ExecCtx {
    pub deadline: Instant,
    pub cancel_token: CancellationToken,
    pub action_id: String,
}

impl ExecCtx {
    pub fn new(deadline: Instant, cancel_token: CancellationToken) -> Self {
        Self {
            deadline,
            cancel_token,
            action_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Context bounded only by a timeout from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout, CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_timed_out(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
