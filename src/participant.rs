//! Durable participant enlistment store
//!
//! One record per `(LRA, enlistment)` pair. Participant identity is carried
//! entirely in serializable endpoint data, so the store can be rebuilt after a
//! coordinator restart without reconstructing any in-memory objects.

use crate::{CoordinatorError, EnlistmentId, LraId, ParticipantStatus};
use serde::{Deserialize, Serialize};

/// Callback endpoints a participant registers when it enlists.
///
/// The coordinator treats these as opaque addressable targets; the transport
/// lives behind [`crate::ParticipantClient`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEndpoints {
    pub complete: Box<str>,
    pub compensate: Box<str>,
    /// Optional endpoint the recovery engine can query instead of re-issuing
    /// a callback whose earlier attempt may have landed
    pub status: Option<Box<str>>,
    /// Optional endpoint told when the coordinator drops the record
    pub forget: Option<Box<str>>,
}

impl ParticipantEndpoints {
    pub fn new(complete: &str, compensate: &str) -> Self {
        Self {
            complete: complete.into(),
            compensate: compensate.into(),
            status: None,
            forget: None,
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_forget(mut self, forget: &str) -> Self {
        self.forget = Some(forget.into());
        self
    }
}

/// Durable record of one enlistment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub lra: LraId,
    pub enlistment: EnlistmentId,
    pub endpoints: ParticipantEndpoints,
    pub status: ParticipantStatus,
    /// Delivery attempts so far, drives recovery backoff
    pub attempts: u32,
    pub last_attempt_millis: Option<u64>,
    /// Commit-only participant with no compensation leg
    pub one_phase: bool,
}

/// What `enlist` found when it ran
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enlisted {
    /// First enlistment under this id
    New,
    /// Same id, identical endpoints: idempotent no-op
    Unchanged,
    /// Same id, different endpoints: treated as a replace
    Replaced,
}

/// Participant storage trait
pub trait ParticipantStore: Send + Sync + 'static {
    /// Record an enlistment.
    ///
    /// Idempotent: re-enlisting the same `(lra, enlistment)` with identical
    /// endpoints succeeds silently; different endpoints overwrite them
    /// (`Enlisted::Replaced`), which callers follow with a recovery attempt.
    fn enlist(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        endpoints: ParticipantEndpoints,
        one_phase: bool,
    ) -> Result<Enlisted, CoordinatorError>;

    /// Overwrite the stored endpoints for a relocated participant
    fn replace(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        endpoints: ParticipantEndpoints,
    ) -> Result<(), CoordinatorError>;

    fn get(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
    ) -> Result<ParticipantRecord, CoordinatorError>;

    /// Compare-and-set status update, monotonic per the participant state
    /// machine. Setting the already-stored value is an idempotent no-op.
    fn update_status(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        from: ParticipantStatus,
        to: ParticipantStatus,
    ) -> Result<(), CoordinatorError>;

    /// Bump the delivery-attempt counter, returns the new count
    fn record_attempt(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        now: u64,
    ) -> Result<u32, CoordinatorError>;

    /// Drop the record. Valid only once the status is terminal or heuristic.
    fn forget(&self, lra: &LraId, enlistment: &EnlistmentId) -> Result<(), CoordinatorError>;

    /// Drop the record unconditionally (participant deregistered itself)
    fn remove(&self, lra: &LraId, enlistment: &EnlistmentId) -> Result<(), CoordinatorError>;

    fn list_for(&self, lra: &LraId) -> Result<Vec<ParticipantRecord>, CoordinatorError>;

    /// Every record carrying this enlistment id, across all LRAs
    fn locate(&self, enlistment: &EnlistmentId) -> Result<Vec<ParticipantRecord>, CoordinatorError>;

    /// Does this LRA still have a participant that is not terminal?
    fn has_pending(&self, lra: &LraId) -> Result<bool, CoordinatorError> {
        Ok(self
            .list_for(lra)?
            .iter()
            .any(|rec| !rec.status.is_terminal()))
    }
}

/// In-memory participant store
pub struct InMemoryParticipantStore {
    data: std::sync::RwLock<std::collections::HashMap<LraId, Vec<ParticipantRecord>>>,
}

impl InMemoryParticipantStore {
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryParticipantStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> CoordinatorError {
    CoordinatorError::Storage(e.to_string().into())
}

fn not_enlisted(lra: &LraId, enlistment: &EnlistmentId) -> CoordinatorError {
    CoordinatorError::ParticipantNotFound {
        lra: lra.clone(),
        enlistment: enlistment.clone(),
    }
}

impl ParticipantStore for InMemoryParticipantStore {
    fn enlist(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        endpoints: ParticipantEndpoints,
        one_phase: bool,
    ) -> Result<Enlisted, CoordinatorError> {
        let mut data = self.data.write().map_err(poisoned)?;
        let records = data.entry(lra.clone()).or_default();

        if let Some(existing) = records.iter_mut().find(|rec| rec.enlistment == *enlistment) {
            if existing.endpoints == endpoints {
                return Ok(Enlisted::Unchanged);
            }
            existing.endpoints = endpoints;
            return Ok(Enlisted::Replaced);
        }

        records.push(ParticipantRecord {
            lra: lra.clone(),
            enlistment: enlistment.clone(),
            endpoints,
            status: ParticipantStatus::Active,
            attempts: 0,
            last_attempt_millis: None,
            one_phase,
        });
        Ok(Enlisted::New)
    }

    fn replace(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        endpoints: ParticipantEndpoints,
    ) -> Result<(), CoordinatorError> {
        let mut data = self.data.write().map_err(poisoned)?;
        let rec = data
            .get_mut(lra)
            .and_then(|records| records.iter_mut().find(|rec| rec.enlistment == *enlistment))
            .ok_or_else(|| not_enlisted(lra, enlistment))?;
        rec.endpoints = endpoints;
        Ok(())
    }

    fn get(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
    ) -> Result<ParticipantRecord, CoordinatorError> {
        let data = self.data.read().map_err(poisoned)?;
        data.get(lra)
            .and_then(|records| records.iter().find(|rec| rec.enlistment == *enlistment))
            .cloned()
            .ok_or_else(|| not_enlisted(lra, enlistment))
    }

    fn update_status(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        from: ParticipantStatus,
        to: ParticipantStatus,
    ) -> Result<(), CoordinatorError> {
        let mut data = self.data.write().map_err(poisoned)?;
        let rec = data
            .get_mut(lra)
            .and_then(|records| records.iter_mut().find(|rec| rec.enlistment == *enlistment))
            .ok_or_else(|| not_enlisted(lra, enlistment))?;

        if rec.status == to {
            return Ok(()); // retried delivery of the same outcome
        }
        if rec.status != from || !from.can_transition_to(to) {
            return Err(CoordinatorError::IllegalParticipantTransition {
                lra: lra.clone(),
                enlistment: enlistment.clone(),
                actual: rec.status,
                requested: to,
            });
        }

        rec.status = to;
        Ok(())
    }

    fn record_attempt(
        &self,
        lra: &LraId,
        enlistment: &EnlistmentId,
        now: u64,
    ) -> Result<u32, CoordinatorError> {
        let mut data = self.data.write().map_err(poisoned)?;
        let rec = data
            .get_mut(lra)
            .and_then(|records| records.iter_mut().find(|rec| rec.enlistment == *enlistment))
            .ok_or_else(|| not_enlisted(lra, enlistment))?;
        rec.attempts += 1;
        rec.last_attempt_millis = Some(now);
        Ok(rec.attempts)
    }

    fn forget(&self, lra: &LraId, enlistment: &EnlistmentId) -> Result<(), CoordinatorError> {
        let mut data = self.data.write().map_err(poisoned)?;
        let records = data.get_mut(lra).ok_or_else(|| not_enlisted(lra, enlistment))?;
        let rec = records
            .iter()
            .find(|rec| rec.enlistment == *enlistment)
            .ok_or_else(|| not_enlisted(lra, enlistment))?;

        if !rec.status.is_terminal() {
            return Err(CoordinatorError::NotForgettable {
                lra: lra.clone(),
                enlistment: enlistment.clone(),
                status: rec.status,
            });
        }

        records.retain(|rec| rec.enlistment != *enlistment);
        if records.is_empty() {
            data.remove(lra);
        }
        Ok(())
    }

    fn remove(&self, lra: &LraId, enlistment: &EnlistmentId) -> Result<(), CoordinatorError> {
        let mut data = self.data.write().map_err(poisoned)?;
        let records = data.get_mut(lra).ok_or_else(|| not_enlisted(lra, enlistment))?;
        let before = records.len();
        records.retain(|rec| rec.enlistment != *enlistment);
        if records.len() == before {
            return Err(not_enlisted(lra, enlistment));
        }
        if records.is_empty() {
            data.remove(lra);
        }
        Ok(())
    }

    fn list_for(&self, lra: &LraId) -> Result<Vec<ParticipantRecord>, CoordinatorError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(lra).cloned().unwrap_or_default())
    }

    fn locate(
        &self,
        enlistment: &EnlistmentId,
    ) -> Result<Vec<ParticipantRecord>, CoordinatorError> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data
            .values()
            .flatten()
            .filter(|rec| rec.enlistment == *enlistment)
            .cloned()
            .collect())
    }
}
