//! The two state machines: LRA lifecycle and participant lifecycle
//!
//! Both are strictly forward-only. Every mutation in the registry and the
//! participant store goes through a compare-and-set that consults the edge
//! tables here, so no component can ever observe a regression.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an LRA
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LraStatus {
    /// Running; the only state accepting client close/cancel
    Active,
    /// Completion callbacks are in flight
    Closing,
    /// Compensation callbacks are in flight
    Cancelling,
    /// Every participant completed
    Closed,
    /// Every participant compensated
    Cancelled,
    /// Close could not finish; participants pending or failed
    FailedToClose,
    /// Cancel could not finish; participants pending or failed
    FailedToCancel,
}

impl LraStatus {
    /// Terminal for client-visible purposes.
    ///
    /// `FailedToClose`/`FailedToCancel` count as terminal even though the
    /// recovery engine may still promote them to `Closed`/`Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Cancelled | Self::FailedToClose | Self::FailedToCancel
        )
    }

    /// Callbacks in flight (`Closing` or `Cancelling`)
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::Closing | Self::Cancelling)
    }

    /// On the compensation side of the state machine
    pub fn is_cancel_path(&self) -> bool {
        matches!(self, Self::Cancelling | Self::Cancelled | Self::FailedToCancel)
    }

    /// Needs recovery attention: a pass may still move it forward
    pub fn needs_recovery(&self) -> bool {
        matches!(
            self,
            Self::Closing | Self::Cancelling | Self::FailedToClose | Self::FailedToCancel
        )
    }

    /// Is `next` reachable from `self` in one legal step?
    ///
    /// `Closing -> Cancelling` is the policy edge allowing cancellation to
    /// override an in-flight close. `FailedToClose -> Closed` (and the cancel
    /// mirror) is how recovery promotes a stuck LRA once every participant
    /// settles.
    pub fn can_transition_to(&self, next: LraStatus) -> bool {
        use LraStatus::*;
        matches!(
            (*self, next),
            (Active, Closing)
                | (Active, Cancelling)
                | (Closing, Closed)
                | (Closing, FailedToClose)
                | (Closing, Cancelling)
                | (Cancelling, Cancelled)
                | (Cancelling, FailedToCancel)
                | (FailedToClose, Closed)
                | (FailedToCancel, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Closing => "Closing",
            Self::Cancelling => "Cancelling",
            Self::Closed => "Closed",
            Self::Cancelled => "Cancelled",
            Self::FailedToClose => "FailedToClose",
            Self::FailedToCancel => "FailedToCancel",
        }
    }
}

impl std::fmt::Display for LraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of one participant enlistment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantStatus {
    /// Enlisted, no instruction delivered yet
    Active,
    /// Reported by a participant running its own prepare phase
    Preparing,
    /// Prepare finished, awaiting the coordinator's decision
    Prepared,
    /// Completion callback delivered, outcome pending
    Completing,
    /// Completion finished
    Completed,
    /// Participant reported it cannot complete
    FailedToComplete,
    /// Compensation callback delivered, outcome pending
    Compensating,
    /// Compensation finished
    Compensated,
    /// Participant reported it cannot compensate
    FailedToCompensate,
    /// One-phase participant committed without a compensation leg
    CommittedOnePhase,
    /// Participant made no changes; nothing to complete or undo
    ReadOnly,
    /// Participant rolled back against a close instruction
    HeuristicRollback,
    /// Participant committed against a cancel instruction
    HeuristicCommit,
    /// Participant outcome unknown after a partial failure
    HeuristicHazard,
    /// Some of the participant's work committed and some rolled back
    HeuristicMixed,
}

impl ParticipantStatus {
    /// No further callbacks will change this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::FailedToComplete
                | Self::Compensated
                | Self::FailedToCompensate
                | Self::CommittedOnePhase
                | Self::ReadOnly
        ) || self.is_heuristic()
    }

    /// Terminal-but-flagged: surfaced for admin resolution, never auto-resolved
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            Self::HeuristicRollback
                | Self::HeuristicCommit
                | Self::HeuristicHazard
                | Self::HeuristicMixed
        )
    }

    /// Terminal status that satisfies a close instruction
    pub fn is_complete_outcome(&self) -> bool {
        matches!(self, Self::Completed | Self::CommittedOnePhase | Self::ReadOnly)
    }

    /// Terminal status that satisfies a cancel instruction
    pub fn is_compensate_outcome(&self) -> bool {
        matches!(self, Self::Compensated | Self::ReadOnly)
    }

    /// Participant explicitly refused the instruction (non-retryable)
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FailedToComplete | Self::FailedToCompensate)
    }

    /// Is `next` reachable from `self` in one legal step?
    ///
    /// Heuristic states are reachable from either in-flight state.
    /// `Completing -> Compensating` mirrors the LRA-level `Closing ->
    /// Cancelling` policy edge.
    pub fn can_transition_to(&self, next: ParticipantStatus) -> bool {
        use ParticipantStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (*self, next),
            (Active, Preparing)
                | (Active, Completing)
                | (Active, Compensating)
                | (Active, CommittedOnePhase)
                | (Active, ReadOnly)
                | (Preparing, Prepared)
                | (Prepared, Completing)
                | (Prepared, Compensating)
                | (Completing, Completed)
                | (Completing, FailedToComplete)
                | (Completing, Compensating)
                | (Compensating, Compensated)
                | (Compensating, FailedToCompensate)
        ) || (matches!(self, Completing | Compensating) && next.is_heuristic())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Preparing => "Preparing",
            Self::Prepared => "Prepared",
            Self::Completing => "Completing",
            Self::Completed => "Completed",
            Self::FailedToComplete => "FailedToComplete",
            Self::Compensating => "Compensating",
            Self::Compensated => "Compensated",
            Self::FailedToCompensate => "FailedToCompensate",
            Self::CommittedOnePhase => "CommittedOnePhase",
            Self::ReadOnly => "ReadOnly",
            Self::HeuristicRollback => "HeuristicRollback",
            Self::HeuristicCommit => "HeuristicCommit",
            Self::HeuristicHazard => "HeuristicHazard",
            Self::HeuristicMixed => "HeuristicMixed",
        }
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lra_edges_are_forward_only() {
        use LraStatus::*;
        let all = [
            Active,
            Closing,
            Cancelling,
            Closed,
            Cancelled,
            FailedToClose,
            FailedToCancel,
        ];
        // Nothing ever leads back to Active
        for s in all {
            assert!(!s.can_transition_to(Active));
        }
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Cancelling));
        assert!(FailedToClose.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Cancelled));
        assert!(!Cancelling.can_transition_to(Closing));
    }

    #[test]
    fn terminal_participant_status_never_regresses() {
        use ParticipantStatus::*;
        let terminals = [
            Completed,
            FailedToComplete,
            Compensated,
            FailedToCompensate,
            CommittedOnePhase,
            ReadOnly,
            HeuristicRollback,
            HeuristicCommit,
            HeuristicHazard,
            HeuristicMixed,
        ];
        let all = [
            Active, Preparing, Prepared, Completing, Compensating,
        ];
        for t in terminals {
            assert!(t.is_terminal());
            for next in all {
                assert!(!t.can_transition_to(next));
            }
        }
    }

    #[test]
    fn heuristics_reachable_only_from_in_flight() {
        use ParticipantStatus::*;
        assert!(Completing.can_transition_to(HeuristicHazard));
        assert!(Compensating.can_transition_to(HeuristicCommit));
        assert!(!Active.can_transition_to(HeuristicMixed));
        assert!(!Prepared.can_transition_to(HeuristicRollback));
    }

    #[test]
    fn one_phase_terminals_reachable_from_active() {
        use ParticipantStatus::*;
        assert!(Active.can_transition_to(CommittedOnePhase));
        assert!(Active.can_transition_to(ReadOnly));
        assert!(!Completing.can_transition_to(CommittedOnePhase));
    }
}
