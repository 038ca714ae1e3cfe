//! Coordinator statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters across all LRAs handled by one coordinator
pub struct CoordinatorStats {
    pub lras_begun: AtomicU64,
    pub lras_closed: AtomicU64,
    pub lras_cancelled: AtomicU64,
    pub participants_enlisted: AtomicU64,
    pub callbacks_attempted: AtomicU64,
    pub callbacks_failed: AtomicU64,
    pub timeouts_fired: AtomicU64,
    pub recovery_passes: AtomicU64,
    pub heuristic_outcomes: AtomicU64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self {
            lras_begun: AtomicU64::new(0),
            lras_closed: AtomicU64::new(0),
            lras_cancelled: AtomicU64::new(0),
            participants_enlisted: AtomicU64::new(0),
            callbacks_attempted: AtomicU64::new(0),
            callbacks_failed: AtomicU64::new(0),
            timeouts_fired: AtomicU64::new(0),
            recovery_passes: AtomicU64::new(0),
            heuristic_outcomes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            lras_begun: self.lras_begun.load(Ordering::Relaxed),
            lras_closed: self.lras_closed.load(Ordering::Relaxed),
            lras_cancelled: self.lras_cancelled.load(Ordering::Relaxed),
            participants_enlisted: self.participants_enlisted.load(Ordering::Relaxed),
            callbacks_attempted: self.callbacks_attempted.load(Ordering::Relaxed),
            callbacks_failed: self.callbacks_failed.load(Ordering::Relaxed),
            timeouts_fired: self.timeouts_fired.load(Ordering::Relaxed),
            recovery_passes: self.recovery_passes.load(Ordering::Relaxed),
            heuristic_outcomes: self.heuristic_outcomes.load(Ordering::Relaxed),
        }
    }
}

impl Default for CoordinatorStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorStatsSnapshot {
    pub lras_begun: u64,
    pub lras_closed: u64,
    pub lras_cancelled: u64,
    pub participants_enlisted: u64,
    pub callbacks_attempted: u64,
    pub callbacks_failed: u64,
    pub timeouts_fired: u64,
    pub recovery_passes: u64,
    pub heuristic_outcomes: u64,
}
