//! Timeout monitor
//!
//! Scans the registry for `Active` LRAs whose time limit has passed and
//! cancels them exactly as a client would. A close or cancel racing the scan
//! wins at the compare-and-set and the late cancel is silently dropped.

use crate::{now_millis, Coordinator};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background task cancelling expired LRAs
pub struct TimeoutMonitor {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl TimeoutMonitor {
    /// Spawn the scan loop
    pub fn spawn(coordinator: Coordinator, scan_interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scan_once(&coordinator).await,
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

/// One scan: cancel everything expired, tolerating concurrent transitions
pub(crate) async fn scan_once(coordinator: &Coordinator) {
    let due = match coordinator.registry.expired_active(now_millis()) {
        Ok(due) => due,
        Err(err) => {
            tracing::warn!(error = %err, "Timeout scan failed");
            return;
        }
    };

    for lra in due {
        tracing::info!(lra = %lra, "LRA time limit expired; cancelling");
        match coordinator.cancel_expired(&lra).await {
            Ok(status) if status.is_cancel_path() => {
                coordinator.stats.timeouts_fired.fetch_add(1, Ordering::Relaxed);
            }
            // Lost the race to a client close/cancel: benign
            Ok(_) => {}
            Err(err) if err.is_retryable() => {}
            Err(err) => {
                tracing::warn!(lra = %lra, error = %err, "Timeout cancel failed");
            }
        }
    }
}
