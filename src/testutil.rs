//! Scripted participant client for tests
//!
//! Behaviors are keyed by endpoint target so a test can make one participant
//! unreachable while another answers normally, then restore it and re-drive.

use crate::{
    CallbackError, Coordinator, CoordinatorConfig, InMemoryParticipantStore, InMemoryRegistry,
    LraId, ParticipantClient, ParticipantEndpoints, ParticipantStatus, RetryPolicy,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per-target behavior
#[derive(Clone, Copy, Debug)]
pub enum Script {
    Answer(ParticipantStatus),
    Unreachable,
}

pub struct ScriptedClient {
    scripts: Mutex<HashMap<Box<str>, Script>>,
    calls: Mutex<Vec<Box<str>>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Set (or replace) the behavior for one endpoint target
    pub fn script(&self, target: &str, script: Script) {
        self.scripts.lock().unwrap().insert(target.into(), script);
    }

    pub fn calls_to(&self, target: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_ref() == target)
            .count()
    }

    fn answer(
        &self,
        target: &str,
        default: ParticipantStatus,
    ) -> Result<ParticipantStatus, CallbackError> {
        self.calls.lock().unwrap().push(target.into());
        match self.scripts.lock().unwrap().get(target) {
            Some(Script::Answer(status)) => Ok(*status),
            Some(Script::Unreachable) => {
                Err(CallbackError::Transport("connection refused".into()))
            }
            None => Ok(default),
        }
    }
}

#[async_trait]
impl ParticipantClient for ScriptedClient {
    async fn complete(
        &self,
        target: &str,
        _lra: &LraId,
        _parent: Option<&LraId>,
    ) -> Result<ParticipantStatus, CallbackError> {
        self.answer(target, ParticipantStatus::Completed)
    }

    async fn compensate(
        &self,
        target: &str,
        _lra: &LraId,
        _parent: Option<&LraId>,
    ) -> Result<ParticipantStatus, CallbackError> {
        self.answer(target, ParticipantStatus::Compensated)
    }

    async fn status(
        &self,
        target: &str,
        _lra: &LraId,
    ) -> Result<ParticipantStatus, CallbackError> {
        self.answer(target, ParticipantStatus::Active)
    }

    async fn forget(&self, target: &str, _lra: &LraId) -> Result<(), CallbackError> {
        self.calls.lock().unwrap().push(target.into());
        match self.scripts.lock().unwrap().get(target) {
            Some(Script::Unreachable) => {
                Err(CallbackError::Transport("connection refused".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Coordinator over in-memory stores with test-friendly cadence
pub fn test_coordinator(client: Arc<ScriptedClient>) -> Coordinator {
    let config = CoordinatorConfig {
        callback_timeout: Duration::from_millis(250),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_millis: 0,
            max_delay_millis: 0,
            backoff_multiplier: 1.0,
        },
        recovery_interval: Duration::from_millis(30),
        timeout_scan_interval: Duration::from_millis(10),
        purge_grace: Duration::from_secs(300),
    };
    Coordinator::new(
        Arc::new(InMemoryRegistry::new()),
        Arc::new(InMemoryParticipantStore::new()),
        client,
        config,
    )
}

/// Endpoints under a common base, e.g. `http://p1/complete`
pub fn endpoints(base: &str) -> ParticipantEndpoints {
    ParticipantEndpoints::new(&format!("{base}/complete"), &format!("{base}/compensate"))
}
