//! The coordinator: drives LRAs through their lifecycle and fans out
//! participant callbacks
//!
//! All lifecycle mutation goes through the registry's compare-and-set, so a
//! client `close`, a timeout-driven `cancel` and a recovery pass can race on
//! the same LRA and at most one of them effects any given transition; the
//! losers re-read and converge on the same terminal state.

use crate::{
    now_millis, CoordinatorConfig, CoordinatorError, CoordinatorStats, CoordinatorStatsSnapshot,
    Dispatcher, Enlisted, EnlistmentId, LraId, LraObserver, LraRecord, LraRegistry, LraStatus,
    NoOpObserver, ParticipantClient, ParticipantEndpoints, ParticipantRecord, ParticipantStatus,
    ParticipantStore,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Which way an LRA is being terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Close,
    Cancel,
}

impl Direction {
    /// Direction implied by a status already past `Active`
    pub(crate) fn of(status: LraStatus) -> Option<Direction> {
        match status {
            LraStatus::Closing | LraStatus::Closed | LraStatus::FailedToClose => {
                Some(Direction::Close)
            }
            LraStatus::Cancelling | LraStatus::Cancelled | LraStatus::FailedToCancel => {
                Some(Direction::Cancel)
            }
            LraStatus::Active => None,
        }
    }

    fn terminating(self) -> LraStatus {
        match self {
            Direction::Close => LraStatus::Closing,
            Direction::Cancel => LraStatus::Cancelling,
        }
    }

    fn succeeded(self) -> LraStatus {
        match self {
            Direction::Close => LraStatus::Closed,
            Direction::Cancel => LraStatus::Cancelled,
        }
    }

    fn failed(self) -> LraStatus {
        match self {
            Direction::Close => LraStatus::FailedToClose,
            Direction::Cancel => LraStatus::FailedToCancel,
        }
    }

    fn in_flight(self) -> ParticipantStatus {
        match self {
            Direction::Close => ParticipantStatus::Completing,
            Direction::Cancel => ParticipantStatus::Compensating,
        }
    }

    /// Did this terminal participant status satisfy the instruction?
    fn is_clean(self, status: ParticipantStatus) -> bool {
        match self {
            Direction::Close => status.is_complete_outcome(),
            Direction::Cancel => status.is_compensate_outcome(),
        }
    }
}

/// Per-participant result of one drive pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    /// Terminal and satisfying the instruction
    Settled,
    /// Participant refused the instruction (non-retryable)
    Failed,
    /// Local decision diverged from the instruction
    Heuristic,
    /// Not terminal yet; recovery retries later
    Retry,
}

/// Aggregate of one drive pass over an LRA's participants
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DriveSummary {
    pub settled: usize,
    pub failed: usize,
    pub heuristic: usize,
    pub retry: usize,
}

impl DriveSummary {
    fn absorb(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Settled => self.settled += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Heuristic => self.heuristic += 1,
            Outcome::Retry => self.retry += 1,
        }
    }

    /// Every participant terminal and satisfied
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.heuristic == 0 && self.retry == 0
    }

    /// Some participant is still awaiting a terminal answer
    pub fn has_pending(&self) -> bool {
        self.retry > 0
    }
}

/// The LRA coordinator
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) registry: Arc<dyn LraRegistry>,
    pub(crate) participants: Arc<dyn ParticipantStore>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) config: CoordinatorConfig,
    pub(crate) observer: Arc<dyn LraObserver>,
    pub(crate) stats: Arc<CoordinatorStats>,
}

impl Coordinator {
    /// Wire a coordinator over its stores and transport client
    pub fn new(
        registry: Arc<dyn LraRegistry>,
        participants: Arc<dyn ParticipantStore>,
        client: Arc<dyn ParticipantClient>,
        config: CoordinatorConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(client, config.callback_timeout);
        Self {
            registry,
            participants,
            dispatcher,
            config,
            observer: Arc::new(NoOpObserver),
            stats: Arc::new(CoordinatorStats::new()),
        }
    }

    /// Replace the default no-op observer
    pub fn with_observer(mut self, observer: Arc<dyn LraObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Snapshot of the lifetime counters
    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Start a new LRA in `Active` status
    pub fn begin(
        &self,
        parent: Option<&LraId>,
        client_id: Option<&str>,
        time_limit: Option<Duration>,
    ) -> Result<LraId, CoordinatorError> {
        let record = self.registry.begin(parent, client_id, time_limit)?;
        self.stats.lras_begun.fetch_add(1, Ordering::Relaxed);
        self.observer.on_begin(&record.id, parent);
        Ok(record.id)
    }

    /// Enlist a participant.
    ///
    /// Admitted only while the LRA is `Active`, or while a stuck termination
    /// is in recovery. Idempotent on identical endpoints; different endpoints
    /// replace the old ones and trigger an immediate recovery attempt so
    /// in-flight callbacks are redirected to the new location.
    pub async fn enlist(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        endpoints: ParticipantEndpoints,
        one_phase: bool,
    ) -> Result<EnlistmentId, CoordinatorError> {
        let record = self.registry.get(lra)?;
        if record.status != LraStatus::Active && !record.recovering {
            return Err(CoordinatorError::LraFinished(lra.clone()));
        }

        let outcome = self
            .participants
            .enlist(lra, enlistment, endpoints, one_phase)?;
        if outcome == Enlisted::New {
            // A close or cancel may have started between the status check and
            // the insert; a fresh record that termination's fan-out never saw
            // must not survive the race
            let after = self.registry.get(lra)?;
            if after.status != LraStatus::Active && !after.recovering {
                let _ = self.participants.remove(lra, enlistment);
                return Err(CoordinatorError::LraFinished(lra.clone()));
            }
            self.stats.participants_enlisted.fetch_add(1, Ordering::Relaxed);
            self.observer.on_enlist(lra, enlistment);
        }
        if outcome == Enlisted::Replaced {
            if let Err(err) = crate::recovery::recover_lra(self, lra, true).await {
                tracing::warn!(
                    lra = %lra,
                    participant = %enlistment,
                    error = %err,
                    "Recovery attempt after endpoint replace failed"
                );
            }
        }
        Ok(enlistment.clone())
    }

    /// Move a relocated participant's callbacks to new endpoints
    pub async fn replace_participant(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        endpoints: ParticipantEndpoints,
    ) -> Result<(), CoordinatorError> {
        self.participants.replace(lra, enlistment, endpoints)?;
        if let Err(err) = crate::recovery::recover_lra(self, lra, true).await {
            tracing::warn!(
                lra = %lra,
                participant = %enlistment,
                error = %err,
                "Recovery attempt after endpoint replace failed"
            );
        }
        Ok(())
    }

    /// Remove every record carrying this enlistment id, across all LRAs.
    /// Returns how many were removed.
    pub fn delete_participant(&self, enlistment: &EnlistmentId) -> Result<usize, CoordinatorError> {
        let found = self.participants.locate(enlistment)?;
        for record in &found {
            self.participants.remove(&record.lra, enlistment)?;
        }
        Ok(found.len())
    }

    /// Close the LRA: complete every participant, then `Closed` or
    /// `FailedToClose`. Idempotent on terminal LRAs.
    pub async fn close(&self, lra: &LraId) -> Result<LraStatus, CoordinatorError> {
        self.observer.on_close_requested(lra);
        self.end(lra, Direction::Close, false).await
    }

    /// Cancel the LRA: compensate every participant, then `Cancelled` or
    /// `FailedToCancel`. Allowed from `Active` and, overriding an in-flight
    /// close, from `Closing`. Idempotent on terminal LRAs.
    pub async fn cancel(&self, lra: &LraId) -> Result<LraStatus, CoordinatorError> {
        self.observer.on_cancel_requested(lra);
        self.end(lra, Direction::Cancel, true).await
    }

    /// Timeout-driven cancel: fires only if the LRA is still `Active`. A
    /// close or cancel that won the race makes this a silent no-op.
    pub(crate) async fn cancel_expired(&self, lra: &LraId) -> Result<LraStatus, CoordinatorError> {
        self.observer.on_cancel_requested(lra);
        self.end(lra, Direction::Cancel, false).await
    }

    /// Current lifecycle status of the LRA
    pub fn status(&self, lra: &LraId) -> Result<LraStatus, CoordinatorError> {
        Ok(self.registry.get(lra)?.status)
    }

    /// Full registry record for the LRA
    pub fn get_info(&self, lra: &LraId) -> Result<LraRecord, CoordinatorError> {
        self.registry.get(lra)
    }

    /// Every known LRA, optionally filtered by status
    pub fn all_lras(
        &self,
        filter: Option<LraStatus>,
    ) -> Result<Vec<LraRecord>, CoordinatorError> {
        self.registry.list(filter)
    }

    /// One participant's outcome, as an error when it is stuck.
    ///
    /// Heuristic and refused outcomes come back as errors carrying the stored
    /// status, so a caller can correlate a `FailedToClose`/`FailedToCancel`
    /// LRA with the responsible participant. A participant still working is
    /// queried live through its status endpoint when it registered one.
    pub async fn check_participant(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
    ) -> Result<ParticipantStatus, CoordinatorError> {
        let record = self.participants.get(lra, enlistment)?;
        if record.status.is_heuristic() {
            return Err(CoordinatorError::HeuristicOutcome {
                lra: lra.clone(),
                enlistment: enlistment.clone(),
                status: record.status,
            });
        }
        if record.status.is_failure() {
            return Err(CoordinatorError::ParticipantFailure {
                lra: lra.clone(),
                enlistment: enlistment.clone(),
                status: record.status,
            });
        }
        if record.status.is_terminal() {
            return Ok(record.status);
        }
        match &record.endpoints.status {
            Some(target) => self
                .dispatcher
                .status(target, lra)
                .await
                .map_err(|err| err.into_coordinator(target)),
            None => Ok(record.status),
        }
    }

    /// Terminal status reached and no participant still awaiting an outcome
    pub fn is_finished(&self, lra: &LraId) -> Result<bool, CoordinatorError> {
        let record = self.registry.get(lra)?;
        Ok(record.status.is_terminal() && !self.participants.has_pending(lra)?)
    }

    /// Re-drive every LRA stuck mid-termination
    pub async fn trigger_recovery(&self) -> Result<crate::RecoveryReport, CoordinatorError> {
        crate::recovery::recover_all(self, true).await
    }

    /// Re-drive one LRA, ignoring retry backoff
    pub async fn trigger_recovery_for(&self, lra: &LraId) -> Result<LraStatus, CoordinatorError> {
        crate::recovery::recover_lra(self, lra, true).await
    }

    // === Internal machinery ===

    /// Move the LRA out of `Active` (or `Closing`, for a cancel override) and
    /// drive every participant to an outcome.
    async fn end(
        &self,
        lra: &LraId,
        direction: Direction,
        override_closing: bool,
    ) -> Result<LraStatus, CoordinatorError> {
        loop {
            let record = self.registry.get(lra)?;
            let (from, to) = match (record.status, direction) {
                (LraStatus::Active, _) => (LraStatus::Active, direction.terminating()),
                (LraStatus::Closing, Direction::Cancel) if override_closing => {
                    (LraStatus::Closing, LraStatus::Cancelling)
                }
                // Idempotent on terminal LRAs; a same-direction termination
                // already in flight is equally a no-op for this caller
                (status, _) => return Ok(status),
            };
            match self.registry.transition(lra, from, to) {
                Ok(()) => break,
                Err(err) if err.is_retryable() => continue,
                Err(err) => return Err(err),
            }
        }

        // Children terminate before the parent's own fan-out begins
        self.end_children(lra, direction).await?;

        let record = self.registry.get(lra)?;
        self.drive_to_outcome(&record, direction, false, true).await
    }

    /// Depth-first termination of still-active children
    fn end_children<'a>(
        &'a self,
        lra: &'a LraId,
        direction: Direction,
    ) -> Pin<Box<dyn Future<Output = Result<(), CoordinatorError>> + Send + 'a>> {
        Box::pin(async move {
            for child in self.registry.children(lra)? {
                if child.status == LraStatus::Active {
                    match direction {
                        Direction::Close => self.close(&child.id).await?,
                        Direction::Cancel => self.cancel(&child.id).await?,
                    };
                }
            }
            Ok(())
        })
    }

    /// One full pass: fan out callbacks, then decide the LRA's status
    pub(crate) async fn drive_to_outcome(
        &self,
        record: &LraRecord,
        direction: Direction,
        replay: bool,
        force: bool,
    ) -> Result<LraStatus, CoordinatorError> {
        let summary = self.drive_participants(record, direction, replay, force).await?;
        self.conclude(record, direction, summary).await
    }

    /// Fan out one callback per non-terminal participant, in parallel, and
    /// wait for every outcome. One participant's failure neither masks nor
    /// blocks the others.
    async fn drive_participants(
        &self,
        record: &LraRecord,
        direction: Direction,
        replay: bool,
        force: bool,
    ) -> Result<DriveSummary, CoordinatorError> {
        let now = now_millis();
        let mut summary = DriveSummary::default();
        let mut join = JoinSet::new();

        for participant in self.participants.list_for(&record.id)? {
            if participant.status.is_terminal() {
                summary.absorb(classify_stored(direction, participant.status));
                continue;
            }
            if !force
                && !self.config.retry.due(
                    participant.attempts,
                    participant.last_attempt_millis,
                    now,
                )
            {
                summary.absorb(Outcome::Retry); // backoff not elapsed yet
                continue;
            }

            let task = DriveTask {
                participants: Arc::clone(&self.participants),
                dispatcher: self.dispatcher.clone(),
                observer: Arc::clone(&self.observer),
                stats: Arc::clone(&self.stats),
                lra: record.id.clone(),
                parent: record.parent.clone(),
                record: participant,
                direction,
                replay,
            };
            join.spawn(task.run());
        }

        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(outcome) => summary.absorb(outcome),
                // A panicked callback task is a lost attempt, not a lost LRA
                Err(_) => summary.absorb(Outcome::Retry),
            }
        }
        Ok(summary)
    }

    /// Decide the LRA's status from a drive summary, mark recovery state and
    /// settle clean participants
    async fn conclude(
        &self,
        record: &LraRecord,
        direction: Direction,
        summary: DriveSummary,
    ) -> Result<LraStatus, CoordinatorError> {
        tracing::debug!(
            lra = %record.id,
            settled = summary.settled,
            failed = summary.failed,
            heuristic = summary.heuristic,
            pending = summary.retry,
            "Drive pass finished"
        );

        // An enlistment that landed behind this pass's fan-out must not be
        // sealed under a clean terminal status; count it as pending so the
        // LRA stays in recovery until a later pass drives it
        let mut summary = summary;
        if summary.is_clean() && self.participants.has_pending(&record.id)? {
            summary.retry += 1;
        }

        let target = if summary.is_clean() {
            direction.succeeded()
        } else {
            direction.failed()
        };

        let current = self.registry.get(&record.id)?.status;
        if current != target {
            match self.registry.transition(&record.id, current, target) {
                Ok(()) => {}
                // Concurrent actor (or a cancel override) won; keep its result
                Err(err) if err.is_retryable() => {}
                Err(err) => return Err(err),
            }
        }

        self.registry
            .mark_recovering(&record.id, summary.has_pending())?;

        let final_status = self.registry.get(&record.id)?.status;
        if let Some(final_direction) = Direction::of(final_status) {
            if final_direction == direction {
                self.settle(record, direction).await?;
            }
        }

        if !summary.has_pending() {
            match final_status {
                LraStatus::Closed => {
                    self.stats.lras_closed.fetch_add(1, Ordering::Relaxed);
                }
                LraStatus::Cancelled => {
                    self.stats.lras_cancelled.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
            self.observer.on_finished(&record.id, final_status);
        }
        Ok(final_status)
    }

    /// Forget participants whose terminal status satisfied the instruction.
    /// Failed and heuristic records are retained so a caller can correlate a
    /// stuck LRA with the responsible participant.
    pub(crate) async fn settle(
        &self,
        record: &LraRecord,
        direction: Direction,
    ) -> Result<(), CoordinatorError> {
        for participant in self.participants.list_for(&record.id)? {
            if !direction.is_clean(participant.status) {
                continue;
            }
            if let Some(forget) = &participant.endpoints.forget {
                if let Err(err) = self.dispatcher.forget(forget, &record.id).await {
                    // Keep the record; the next recovery pass retries the forget
                    self.observer.on_callback_failed(
                        &record.id,
                        &participant.enlistment,
                        &err.to_string(),
                    );
                    continue;
                }
            }
            self.participants.forget(&record.id, &participant.enlistment)?;
        }
        Ok(())
    }
}

/// Classify a participant that was already terminal when the pass started
fn classify_stored(direction: Direction, status: ParticipantStatus) -> Outcome {
    if direction.is_clean(status) {
        Outcome::Settled
    } else if status.is_heuristic() {
        Outcome::Heuristic
    } else if direction == Direction::Close && status == ParticipantStatus::FailedToComplete {
        Outcome::Failed
    } else if direction == Direction::Cancel && status == ParticipantStatus::FailedToCompensate {
        Outcome::Failed
    } else {
        // Terminal the other way round (e.g. committed one-phase under a
        // cancel): the participant's decision diverged from the instruction
        Outcome::Heuristic
    }
}

/// Everything one spawned callback needs, owned so the task is `'static`
struct DriveTask {
    participants: Arc<dyn ParticipantStore>,
    dispatcher: Dispatcher,
    observer: Arc<dyn LraObserver>,
    stats: Arc<CoordinatorStats>,
    lra: LraId,
    parent: Option<LraId>,
    record: ParticipantRecord,
    direction: Direction,
    replay: bool,
}

impl DriveTask {
    async fn run(self) -> Outcome {
        let in_flight = self.direction.in_flight();

        // On replay, a participant with a status endpoint may already hold the
        // answer from an attempt that landed before the coordinator crashed
        if self.replay && self.record.status == in_flight {
            if let Some(status_ep) = &self.record.endpoints.status {
                if let Ok(answer) = self.dispatcher.status(status_ep, &self.lra).await {
                    if answer.is_terminal() {
                        return self.apply_answer(answer);
                    }
                }
            }
        }

        // Two-phase participants are observably Completing/Compensating while
        // the callback is in flight. One-phase participants stay Active so
        // CommittedOnePhase/ReadOnly answers can land on their direct edges.
        if !(self.direction == Direction::Close && self.record.one_phase)
            && self.record.status != in_flight
        {
            if self
                .participants
                .update_status(&self.lra, &self.record.enlistment, self.record.status, in_flight)
                .is_err()
            {
                // Raced with another actor or the participant is mid-prepare;
                // the next pass re-reads
                return Outcome::Retry;
            }
        }

        let _ = self
            .participants
            .record_attempt(&self.lra, &self.record.enlistment, now_millis());
        self.stats.callbacks_attempted.fetch_add(1, Ordering::Relaxed);

        let answer = match self.direction {
            Direction::Close => {
                self.dispatcher
                    .complete(&self.record.endpoints.complete, &self.lra, self.parent.as_ref())
                    .await
            }
            Direction::Cancel => {
                self.dispatcher
                    .compensate(
                        &self.record.endpoints.compensate,
                        &self.lra,
                        self.parent.as_ref(),
                    )
                    .await
            }
        };

        match answer {
            Ok(status) => self.apply_answer(status),
            Err(err) => {
                self.stats.callbacks_failed.fetch_add(1, Ordering::Relaxed);
                self.observer
                    .on_callback_failed(&self.lra, &self.record.enlistment, &err.to_string());
                Outcome::Retry
            }
        }
    }

    /// Record a participant's answer through the monotonic store and classify
    /// it for the LRA-level decision
    fn apply_answer(&self, answer: ParticipantStatus) -> Outcome {
        let current = match self.participants.get(&self.lra, &self.record.enlistment) {
            Ok(rec) => rec.status,
            Err(_) => return Outcome::Retry,
        };
        let normalized = normalize_answer(self.direction, current, answer);

        if !normalized.is_terminal() {
            return Outcome::Retry; // participant still working
        }

        if !self.store_terminal(current, normalized) {
            return Outcome::Retry;
        }

        if normalized.is_heuristic() {
            self.stats.heuristic_outcomes.fetch_add(1, Ordering::Relaxed);
            self.observer
                .on_heuristic(&self.lra, &self.record.enlistment, normalized);
            return Outcome::Heuristic;
        }
        if normalized.is_failure() {
            return Outcome::Failed;
        }
        if self.direction.is_clean(normalized) {
            return Outcome::Settled;
        }
        Outcome::Heuristic
    }

    /// CAS the answer in, stepping through the in-flight state when the
    /// direct edge is missing (e.g. a refusal answered from `Active`)
    fn store_terminal(&self, current: ParticipantStatus, target: ParticipantStatus) -> bool {
        if self
            .participants
            .update_status(&self.lra, &self.record.enlistment, current, target)
            .is_ok()
        {
            return true;
        }
        let in_flight = self.direction.in_flight();
        let _ = self
            .participants
            .update_status(&self.lra, &self.record.enlistment, current, in_flight);
        self.participants
            .update_status(&self.lra, &self.record.enlistment, in_flight, target)
            .is_ok()
    }
}

/// Map a participant's raw answer onto the legal edges of its state machine.
///
/// Divergent answers become heuristics: a participant that compensated
/// against a close instruction heuristically rolled back, one that completed
/// against a cancel heuristically committed. `ReadOnly` reported after the
/// in-flight mark is equivalent to the clean outcome for that direction.
fn normalize_answer(
    direction: Direction,
    current: ParticipantStatus,
    answer: ParticipantStatus,
) -> ParticipantStatus {
    use ParticipantStatus::*;
    match (direction, answer) {
        (Direction::Close, Compensated) | (Direction::Close, FailedToCompensate) => {
            HeuristicRollback
        }
        (Direction::Cancel, Completed) | (Direction::Cancel, CommittedOnePhase) => HeuristicCommit,
        (Direction::Close, ReadOnly) if current != Active => Completed,
        (Direction::Cancel, ReadOnly) if current != Active => Compensated,
        (Direction::Close, CommittedOnePhase) if current != Active => Completed,
        _ => answer,
    }
}
