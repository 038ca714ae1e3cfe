//! Coordinator error taxonomy

use crate::{EnlistmentId, LraId, LraStatus, ParticipantStatus};

/// Errors surfaced by the coordinator and its stores
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Unknown LRA id (never existed, or already purged)
    #[error("LRA not found: {0}")]
    NotFound(LraId),

    /// Unknown participant enlistment within a known LRA
    #[error("participant {enlistment} not enlisted in {lra}")]
    ParticipantNotFound {
        lra: LraId,
        enlistment: EnlistmentId,
    },

    /// Compare-and-set mismatch: a concurrent actor already moved the LRA.
    /// Always recoverable by re-reading the current status.
    #[error("LRA {lra} is {actual}, expected {expected}")]
    IllegalStateTransition {
        lra: LraId,
        expected: LraStatus,
        actual: LraStatus,
    },

    /// Participant status update rejected by the monotonic state machine
    #[error("participant {enlistment} in {lra} is {actual}, cannot become {requested}")]
    IllegalParticipantTransition {
        lra: LraId,
        enlistment: EnlistmentId,
        actual: ParticipantStatus,
        requested: ParticipantStatus,
    },

    /// `begin` named a parent that does not exist or is already terminal
    #[error("invalid parent LRA: {0}")]
    InvalidParent(LraId),

    /// Enlistment attempted on a terminal, non-recovering LRA
    #[error("LRA {0} has finished; enlistment rejected")]
    LraFinished(LraId),

    /// A participant callback exceeded the per-call timeout (retryable)
    #[error("callback to {target} timed out after {timeout_millis}ms")]
    CallbackTimeout {
        target: Box<str>,
        timeout_millis: u64,
    },

    /// A participant callback failed at the transport level (retryable)
    #[error("callback to {target} failed: {reason}")]
    CallbackTransport { target: Box<str>, reason: Box<str> },

    /// A participant explicitly reported it cannot honor the instruction
    #[error("participant {enlistment} in {lra} reported {status}")]
    ParticipantFailure {
        lra: LraId,
        enlistment: EnlistmentId,
        status: ParticipantStatus,
    },

    /// A participant's local decision diverged from the coordinator's
    /// instruction; surfaced for admin resolution, never auto-resolved
    #[error("heuristic outcome {status} for participant {enlistment} in {lra}")]
    HeuristicOutcome {
        lra: LraId,
        enlistment: EnlistmentId,
        status: ParticipantStatus,
    },

    /// Forget attempted on a participant that is not yet terminal
    #[error("participant {enlistment} in {lra} is still {status}; cannot forget")]
    NotForgettable {
        lra: LraId,
        enlistment: EnlistmentId,
        status: ParticipantStatus,
    },

    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(Box<str>),
}

impl CoordinatorError {
    /// Should the recovery engine keep retrying after this error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CallbackTimeout { .. }
                | Self::CallbackTransport { .. }
                | Self::IllegalStateTransition { .. }
        )
    }
}
