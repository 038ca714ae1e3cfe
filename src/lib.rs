//! Long Running Action (LRA) Coordinator
//!
//! A saga-style coordinator for distributed, non-ACID units of work. Clients
//! begin an LRA, participants enlist completion and compensation callbacks
//! against it, and the coordinator drives every participant to a terminal
//! outcome when the LRA closes, cancels or times out. Participants that
//! cannot be reached leave the LRA in recovery until a later pass converges.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Wire the coordinator with stores and a transport client
//! let coordinator = Coordinator::new(
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(InMemoryParticipantStore::new()),
//!     Arc::new(MyHttpClient::new()),
//!     CoordinatorConfig::default(),
//! );
//!
//! // 2. Run the background engines
//! let monitor = TimeoutMonitor::spawn(coordinator.clone(), config.timeout_scan_interval);
//! let recovery = RecoveryEngine::spawn(coordinator.clone(), config.recovery_interval);
//!
//! // 3. Drive LRAs
//! let lra = coordinator.begin(None, Some("order-svc"), Some(timeout))?;
//! coordinator.enlist(&lra, &"p1".into(), endpoints, false).await?;
//! coordinator.close(&lra).await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod config;
mod error;
mod ids;
mod status;

// === Storage ===
mod participant;
mod registry;

// === Coordination ===
mod coordinator;
mod dispatch;
mod monitor;
mod recovery;

// === Observability ===
mod observer;
mod stats;

#[cfg(test)]
mod testutil;

// === Re-exports ===

// Types
pub use config::CoordinatorConfig;
pub use ids::{now_millis, EnlistmentId, LraId};
pub use status::{LraStatus, ParticipantStatus};

// Errors
pub use error::CoordinatorError;

// Storage
pub use participant::{
    Enlisted, InMemoryParticipantStore, ParticipantEndpoints, ParticipantRecord, ParticipantStore,
};
pub use registry::{InMemoryRegistry, LraRecord, LraRegistry};

// Coordination
pub use coordinator::Coordinator;
pub use dispatch::{CallbackError, Dispatcher, ParticipantClient, RetryPolicy};
pub use monitor::TimeoutMonitor;
pub use recovery::{RecoveryEngine, RecoveryReport};

// Observability
pub use observer::{LraObserver, NoOpObserver, TracingObserver};
pub use stats::{CoordinatorStats, CoordinatorStatsSnapshot};
