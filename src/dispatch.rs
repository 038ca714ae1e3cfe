//! Participant callback dispatch
//!
//! [`ParticipantClient`] is the transport seam: one async call per endpoint,
//! one outcome per attempt. [`Dispatcher`] wraps a client with the bounded
//! per-call timeout (distinct from any LRA time limit) and classifies
//! failures into retryable transport errors vs participant-reported refusals.

use crate::{CoordinatorError, LraId, ParticipantStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Failure of a single callback attempt
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// Attempt exceeded the dispatcher's per-call timeout (retryable)
    #[error("callback timed out after {timeout_millis}ms")]
    Timeout { timeout_millis: u64 },
    /// Participant unreachable or the transport failed mid-call (retryable)
    #[error("transport failure: {0}")]
    Transport(Box<str>),
}

impl CallbackError {
    /// Both variants are retryable; participant refusals arrive as a
    /// successful call returning `FailedToComplete`/`FailedToCompensate`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }

    /// Lift a callback failure into the coordinator taxonomy, naming the
    /// endpoint that failed
    pub fn into_coordinator(self, target: &str) -> CoordinatorError {
        match self {
            Self::Timeout { timeout_millis } => CoordinatorError::CallbackTimeout {
                target: target.into(),
                timeout_millis,
            },
            Self::Transport(reason) => CoordinatorError::CallbackTransport {
                target: target.into(),
                reason,
            },
        }
    }
}

/// Transport abstraction for participant callbacks.
///
/// `target` is the opaque endpoint the participant registered. Implementations
/// must produce exactly one outcome per call and must not retry internally;
/// retries are the recovery engine's job.
#[async_trait]
pub trait ParticipantClient: Send + Sync + 'static {
    /// Ask the participant to complete its work for `lra`
    async fn complete(
        &self,
        target: &str,
        lra: &LraId,
        parent: Option<&LraId>,
    ) -> Result<ParticipantStatus, CallbackError>;

    /// Ask the participant to compensate its work for `lra`
    async fn compensate(
        &self,
        target: &str,
        lra: &LraId,
        parent: Option<&LraId>,
    ) -> Result<ParticipantStatus, CallbackError>;

    /// Query the participant's own view of its status for `lra`
    async fn status(
        &self,
        target: &str,
        lra: &LraId,
    ) -> Result<ParticipantStatus, CallbackError>;

    /// Tell the participant the coordinator is dropping its record
    async fn forget(&self, target: &str, lra: &LraId) -> Result<(), CallbackError>;
}

/// Client wrapper enforcing the per-call timeout
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn ParticipantClient>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ParticipantClient>, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    fn elapsed(&self) -> CallbackError {
        CallbackError::Timeout {
            timeout_millis: self.call_timeout.as_millis() as u64,
        }
    }

    pub async fn complete(
        &self,
        target: &str,
        lra: &LraId,
        parent: Option<&LraId>,
    ) -> Result<ParticipantStatus, CallbackError> {
        tokio::time::timeout(self.call_timeout, self.client.complete(target, lra, parent))
            .await
            .map_err(|_| self.elapsed())?
    }

    pub async fn compensate(
        &self,
        target: &str,
        lra: &LraId,
        parent: Option<&LraId>,
    ) -> Result<ParticipantStatus, CallbackError> {
        tokio::time::timeout(self.call_timeout, self.client.compensate(target, lra, parent))
            .await
            .map_err(|_| self.elapsed())?
    }

    pub async fn status(
        &self,
        target: &str,
        lra: &LraId,
    ) -> Result<ParticipantStatus, CallbackError> {
        tokio::time::timeout(self.call_timeout, self.client.status(target, lra))
            .await
            .map_err(|_| self.elapsed())?
    }

    pub async fn forget(&self, target: &str, lra: &LraId) -> Result<(), CallbackError> {
        tokio::time::timeout(self.call_timeout, self.client.forget(target, lra))
            .await
            .map_err(|_| self.elapsed())?
    }
}

/// Retry policy governing recovery backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts after which the delay stops growing
    pub max_attempts: u32,
    /// Initial delay before first retry (milliseconds)
    pub initial_delay_millis: u64,
    /// Maximum delay cap (milliseconds)
    pub max_delay_millis: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_millis: 1000,
            max_delay_millis: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let delay = self.initial_delay_millis as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = delay.min(self.max_delay_millis as f64);
        Duration::from_millis(capped as u64)
    }

    /// Is a participant last tried at `last_attempt` due for another try?
    pub fn due(&self, attempt: u32, last_attempt_millis: Option<u64>, now: u64) -> bool {
        match last_attempt_millis {
            None => true,
            Some(last) => {
                now.saturating_sub(last) >= self.delay_for_attempt(attempt).as_millis() as u64
            }
        }
    }
}
