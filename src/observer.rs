//! Coordinator observer trait

use crate::{EnlistmentId, LraId, LraStatus, ParticipantStatus};

/// Observer trait for external observability
pub trait LraObserver: Send + Sync + 'static {
    fn on_begin(&self, lra: &LraId, parent: Option<&LraId>);
    fn on_enlist(&self, lra: &LraId, enlistment: &EnlistmentId);
    fn on_close_requested(&self, lra: &LraId);
    fn on_cancel_requested(&self, lra: &LraId);
    fn on_finished(&self, lra: &LraId, status: LraStatus);
    fn on_callback_failed(&self, lra: &LraId, enlistment: &EnlistmentId, error: &str);
    fn on_heuristic(&self, lra: &LraId, enlistment: &EnlistmentId, status: ParticipantStatus);
    fn on_recovery_pass(&self, scanned: usize, recovered: usize);
}

/// No-op observer
pub struct NoOpObserver;

impl LraObserver for NoOpObserver {
    fn on_begin(&self, _lra: &LraId, _parent: Option<&LraId>) {}
    fn on_enlist(&self, _lra: &LraId, _enlistment: &EnlistmentId) {}
    fn on_close_requested(&self, _lra: &LraId) {}
    fn on_cancel_requested(&self, _lra: &LraId) {}
    fn on_finished(&self, _lra: &LraId, _status: LraStatus) {}
    fn on_callback_failed(&self, _lra: &LraId, _enlistment: &EnlistmentId, _error: &str) {}
    fn on_heuristic(&self, _lra: &LraId, _enlistment: &EnlistmentId, _status: ParticipantStatus) {}
    fn on_recovery_pass(&self, _scanned: usize, _recovered: usize) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl LraObserver for TracingObserver {
    fn on_begin(&self, lra: &LraId, parent: Option<&LraId>) {
        match parent {
            Some(parent) => {
                tracing::info!(lra = %lra, parent = %parent, "Nested LRA started")
            }
            None => tracing::info!(lra = %lra, "LRA started"),
        }
    }

    fn on_enlist(&self, lra: &LraId, enlistment: &EnlistmentId) {
        tracing::info!(lra = %lra, participant = %enlistment, "Participant enlisted");
    }

    fn on_close_requested(&self, lra: &LraId) {
        tracing::info!(lra = %lra, "Close requested");
    }

    fn on_cancel_requested(&self, lra: &LraId) {
        tracing::info!(lra = %lra, "Cancel requested");
    }

    fn on_finished(&self, lra: &LraId, status: LraStatus) {
        tracing::info!(lra = %lra, status = %status, "LRA finished");
    }

    fn on_callback_failed(&self, lra: &LraId, enlistment: &EnlistmentId, error: &str) {
        tracing::warn!(lra = %lra, participant = %enlistment, error = %error, "Callback failed");
    }

    fn on_heuristic(&self, lra: &LraId, enlistment: &EnlistmentId, status: ParticipantStatus) {
        tracing::error!(lra = %lra, participant = %enlistment, status = %status, "Heuristic outcome");
    }

    fn on_recovery_pass(&self, scanned: usize, recovered: usize) {
        tracing::debug!(scanned, recovered, "Recovery pass finished");
    }
}
