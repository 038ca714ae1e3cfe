//! Coordinator tunables
//!
//! Retry cadence and scan intervals are policy, not protocol: the contract
//! only requires that unacknowledged callbacks are eventually re-sent.

use crate::RetryPolicy;
use std::time::Duration;

/// Tunables for the coordinator and its background engines
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Bound on a single participant callback, independent of any LRA time
    /// limit
    pub callback_timeout: Duration,
    /// Backoff between recovery retries of an unreachable participant
    pub retry: RetryPolicy,
    /// Sleep between periodic recovery passes
    pub recovery_interval: Duration,
    /// Sleep between timeout-monitor scans for expired LRAs
    pub timeout_scan_interval: Duration,
    /// How long a fully settled terminal LRA stays queryable before the
    /// recovery engine purges its record
    pub purge_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            callback_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            recovery_interval: Duration::from_secs(5),
            timeout_scan_interval: Duration::from_millis(500),
            purge_grace: Duration::from_secs(300),
        }
    }
}
