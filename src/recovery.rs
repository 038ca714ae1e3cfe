//! Recovery engine
//!
//! Re-drives LRAs stuck mid-termination until every participant reaches a
//! terminal status. Recovery state is derived entirely from the registry and
//! the participant store, so a pass after a coordinator restart sees exactly
//! what the crashed process saw. Passes are monotonic: re-running one over an
//! already-settled LRA changes nothing.

use crate::coordinator::Direction;
use crate::{now_millis, Coordinator, CoordinatorError, LraId, LraStatus};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What one recovery pass did
#[derive(Clone, Debug, Default)]
pub struct RecoveryReport {
    /// LRAs that needed attention
    pub scanned: usize,
    /// LRAs promoted to `Closed`/`Cancelled` during this pass
    pub recovered: Vec<LraId>,
    /// LRAs still awaiting participant outcomes (or permanently stuck)
    pub pending: Vec<LraId>,
    /// Fully settled terminal LRAs whose records were dropped
    pub purged: Vec<LraId>,
}

/// One pass over every LRA needing recovery, then a purge sweep.
///
/// `force` ignores the per-participant retry backoff; on-demand triggers
/// force, the periodic engine does not.
pub(crate) async fn recover_all(
    coordinator: &Coordinator,
    force: bool,
) -> Result<RecoveryReport, CoordinatorError> {
    let mut report = RecoveryReport::default();

    for record in coordinator.registry.list(None)? {
        if !record.status.needs_recovery() {
            continue;
        }
        // Only statuses with pending or failed participants get re-driven
        if !record.recovering && record.status.is_terminal() {
            let has_pending = coordinator.participants.has_pending(&record.id)?;
            if !has_pending {
                continue; // permanently settled in a FailedTo* state
            }
        }
        report.scanned += 1;

        match recover_lra(coordinator, &record.id, force).await {
            Ok(LraStatus::Closed) | Ok(LraStatus::Cancelled) => {
                report.recovered.push(record.id);
            }
            Ok(_) => report.pending.push(record.id),
            Err(err) => {
                tracing::warn!(lra = %record.id, error = %err, "Recovery of LRA failed");
                report.pending.push(record.id);
            }
        }
    }

    report.purged = purge_settled(coordinator).await?;

    coordinator.stats.recovery_passes.fetch_add(1, Ordering::Relaxed);
    coordinator
        .observer
        .on_recovery_pass(report.scanned, report.recovered.len());
    Ok(report)
}

/// Re-drive one LRA. `Active` LRAs are left alone.
pub(crate) async fn recover_lra(
    coordinator: &Coordinator,
    lra: &LraId,
    force: bool,
) -> Result<LraStatus, CoordinatorError> {
    let record = coordinator.registry.get(lra)?;
    let direction = match record.status {
        LraStatus::Active => return Ok(LraStatus::Active),
        status => match Direction::of(status) {
            Some(direction) => direction,
            None => return Ok(status),
        },
    };
    coordinator
        .drive_to_outcome(&record, direction, true, force)
        .await
}

/// Drop registry records of terminal LRAs that have no participant records
/// left and have been settled longer than the purge grace period. Retries any
/// forget callbacks that failed when the LRA first settled.
async fn purge_settled(coordinator: &Coordinator) -> Result<Vec<LraId>, CoordinatorError> {
    let now = now_millis();
    let grace = coordinator.config.purge_grace.as_millis() as u64;
    let mut purged = Vec::new();

    for record in coordinator.registry.list(None)? {
        if !record.status.is_terminal() || record.recovering {
            continue;
        }
        if let Some(direction) = Direction::of(record.status) {
            coordinator.settle(&record, direction).await?;
        }
        if !coordinator.participants.list_for(&record.id)?.is_empty() {
            continue; // failed, heuristic or unforgotten records keep it alive
        }
        let finished = record.finished_at_millis.unwrap_or(record.created_at_millis);
        if now.saturating_sub(finished) < grace {
            continue;
        }
        coordinator.registry.purge(&record.id)?;
        purged.push(record.id);
    }
    Ok(purged)
}

/// Periodic recovery loop
pub struct RecoveryEngine {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RecoveryEngine {
    /// Spawn the loop; one non-forced pass per `interval`
    pub fn spawn(coordinator: Coordinator, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh engine
            // does not race the test or caller that just spawned it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = recover_all(&coordinator, false).await {
                            tracing::warn!(error = %err, "Recovery pass failed");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        });
        Self { handle, shutdown }
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{endpoints, test_coordinator, Script, ScriptedClient};
    use crate::{LraStatus, ParticipantStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn recovery_converges_once_participant_is_reachable() {
        let client = Arc::new(ScriptedClient::new());
        client.script("http://p2/complete", Script::Unreachable);
        let coordinator = test_coordinator(Arc::clone(&client));

        let lra = coordinator.begin(None, None, None).unwrap();
        coordinator
            .enlist(&lra, &"p1".into(), endpoints("http://p1"), false)
            .await
            .unwrap();
        coordinator
            .enlist(&lra, &"p2".into(), endpoints("http://p2"), false)
            .await
            .unwrap();

        assert_eq!(coordinator.close(&lra).await.unwrap(), LraStatus::FailedToClose);

        // Still unreachable: the pass leaves everything as it was
        let report = coordinator.trigger_recovery().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert!(report.recovered.is_empty());
        assert_eq!(coordinator.status(&lra).unwrap(), LraStatus::FailedToClose);

        // Participant comes back
        client.script(
            "http://p2/complete",
            Script::Answer(ParticipantStatus::Completed),
        );
        assert_eq!(
            coordinator.trigger_recovery_for(&lra).await.unwrap(),
            LraStatus::Closed
        );
        assert!(coordinator.participants.list_for(&lra).unwrap().is_empty());
        assert!(coordinator.is_finished(&lra).unwrap());

        // Repeated passes are monotonic no-ops
        let calls = client.calls_to("http://p2/complete");
        coordinator.trigger_recovery().await.unwrap();
        coordinator.trigger_recovery().await.unwrap();
        assert_eq!(coordinator.status(&lra).unwrap(), LraStatus::Closed);
        assert_eq!(client.calls_to("http://p2/complete"), calls);
    }

    #[tokio::test]
    async fn replacing_endpoints_redirects_a_stuck_lra() {
        let client = Arc::new(ScriptedClient::new());
        client.script("http://old/complete", Script::Unreachable);
        let coordinator = test_coordinator(Arc::clone(&client));

        let lra = coordinator.begin(None, None, None).unwrap();
        coordinator
            .enlist(&lra, &"p1".into(), endpoints("http://old"), false)
            .await
            .unwrap();
        assert_eq!(coordinator.close(&lra).await.unwrap(), LraStatus::FailedToClose);

        // The participant relocated; replace triggers an immediate attempt
        coordinator
            .replace_participant(&lra, &"p1".into(), endpoints("http://new"))
            .await
            .unwrap();
        assert_eq!(coordinator.status(&lra).unwrap(), LraStatus::Closed);
        assert_eq!(client.calls_to("http://new/complete"), 1);
    }

    #[tokio::test]
    async fn compensation_is_redriven_for_failed_cancels() {
        let client = Arc::new(ScriptedClient::new());
        client.script("http://p1/compensate", Script::Unreachable);
        let coordinator = test_coordinator(Arc::clone(&client));

        let lra = coordinator.begin(None, None, None).unwrap();
        coordinator
            .enlist(&lra, &"p1".into(), endpoints("http://p1"), false)
            .await
            .unwrap();
        assert_eq!(coordinator.cancel(&lra).await.unwrap(), LraStatus::FailedToCancel);

        client.script(
            "http://p1/compensate",
            Script::Answer(ParticipantStatus::Compensated),
        );
        assert_eq!(
            coordinator.trigger_recovery_for(&lra).await.unwrap(),
            LraStatus::Cancelled
        );
        assert_eq!(client.calls_to("http://p1/compensate"), 2);
    }

    #[tokio::test]
    async fn status_endpoint_answers_instead_of_reissuing() {
        let client = Arc::new(ScriptedClient::new());
        client.script("http://p1/complete", Script::Unreachable);
        let coordinator = test_coordinator(Arc::clone(&client));

        let lra = coordinator.begin(None, None, None).unwrap();
        let eps = endpoints("http://p1").with_status("http://p1/status");
        coordinator.enlist(&lra, &"p1".into(), eps, false).await.unwrap();
        assert_eq!(coordinator.close(&lra).await.unwrap(), LraStatus::FailedToClose);

        // The earlier completion actually landed; the participant's status
        // endpoint reports so and no second completion call goes out
        client.script(
            "http://p1/status",
            Script::Answer(ParticipantStatus::Completed),
        );
        assert_eq!(
            coordinator.trigger_recovery_for(&lra).await.unwrap(),
            LraStatus::Closed
        );
        assert_eq!(client.calls_to("http://p1/complete"), 1);
        assert_eq!(client.calls_to("http://p1/status"), 1);
    }

    #[tokio::test]
    async fn settled_lras_are_purged_after_grace() {
        let client = Arc::new(ScriptedClient::new());
        let mut coordinator = test_coordinator(Arc::clone(&client));
        coordinator.config.purge_grace = std::time::Duration::from_millis(0);

        let lra = coordinator.begin(None, None, None).unwrap();
        coordinator
            .enlist(&lra, &"p1".into(), endpoints("http://p1"), false)
            .await
            .unwrap();
        assert_eq!(coordinator.close(&lra).await.unwrap(), LraStatus::Closed);

        let report = coordinator.trigger_recovery().await.unwrap();
        assert_eq!(report.purged, vec![lra.clone()]);
        assert!(matches!(
            coordinator.status(&lra),
            Err(crate::CoordinatorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn periodic_engine_converges_in_background() {
        let client = Arc::new(ScriptedClient::new());
        client.script("http://p1/complete", Script::Unreachable);
        let coordinator = test_coordinator(Arc::clone(&client));

        let lra = coordinator.begin(None, None, None).unwrap();
        coordinator
            .enlist(&lra, &"p1".into(), endpoints("http://p1"), false)
            .await
            .unwrap();
        assert_eq!(coordinator.close(&lra).await.unwrap(), LraStatus::FailedToClose);

        let engine = RecoveryEngine::spawn(coordinator.clone(), Duration::from_millis(20));
        client.script(
            "http://p1/complete",
            Script::Answer(ParticipantStatus::Completed),
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if coordinator.status(&lra).unwrap() == LraStatus::Closed {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "engine never converged");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        engine.shutdown().await;
    }
}
