//! Durable LRA registry
//!
//! The registry is the system of record for LRA lifecycle state. All status
//! mutation goes through [`LraRegistry::transition`], a compare-and-set that
//! is the sole serialization primitive between the coordinator, the timeout
//! monitor and the recovery engine.

use crate::{now_millis, CoordinatorError, LraId, LraStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Durable record of one LRA
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LraRecord {
    pub id: LraId,
    /// Non-null means this LRA is nested under another
    pub parent: Option<LraId>,
    /// Client-supplied name, for inspection only
    pub client_id: Option<Box<str>>,
    pub status: LraStatus,
    pub created_at_millis: u64,
    /// Absolute deadline; `None` means no time limit
    pub expires_at_millis: Option<u64>,
    /// Stamped when the status first reached a terminal value; drives the
    /// purge grace period
    pub finished_at_millis: Option<u64>,
    /// Set while termination left non-terminal participants behind
    pub recovering: bool,
}

impl LraRecord {
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn expired(&self, now: u64) -> bool {
        self.expires_at_millis.map_or(false, |deadline| now >= deadline)
    }
}

/// Registry storage trait
pub trait LraRegistry: Send + Sync + 'static {
    /// Create an LRA in `Active` status and return its record.
    ///
    /// Fails with `InvalidParent` if `parent` is unknown or already terminal.
    fn begin(
        &self,
        parent: Option<&LraId>,
        client_id: Option<&str>,
        time_limit: Option<Duration>,
    ) -> Result<LraRecord, CoordinatorError>;

    /// Fails with `NotFound` for ids that never existed or were purged
    fn get(&self, id: &LraId) -> Result<LraRecord, CoordinatorError>;

    /// All records, optionally filtered by status. Order is stable within one
    /// call (insertion order for the in-memory store).
    fn list(&self, filter: Option<LraStatus>) -> Result<Vec<LraRecord>, CoordinatorError>;

    /// Direct children of `parent`
    fn children(&self, parent: &LraId) -> Result<Vec<LraRecord>, CoordinatorError>;

    fn set_expiry(
        &self,
        id: &LraId,
        expires_at_millis: Option<u64>,
    ) -> Result<(), CoordinatorError>;

    fn mark_recovering(&self, id: &LraId, recovering: bool) -> Result<(), CoordinatorError>;

    /// Compare-and-set status transition.
    ///
    /// Rejected with `IllegalStateTransition` when the stored status is not
    /// `from`, or when `from -> to` is not a legal edge. A rejection means a
    /// concurrent actor already made progress; callers re-read and move on.
    fn transition(
        &self,
        id: &LraId,
        from: LraStatus,
        to: LraStatus,
    ) -> Result<(), CoordinatorError>;

    /// Ids of `Active` LRAs whose deadline has passed, feed for the timeout
    /// monitor
    fn expired_active(&self, now: u64) -> Result<Vec<LraId>, CoordinatorError>;

    /// Remove a record. Rejected unless the stored status is terminal.
    fn purge(&self, id: &LraId) -> Result<(), CoordinatorError>;
}

/// In-memory registry
pub struct InMemoryRegistry {
    inner: std::sync::RwLock<Inner>,
}

struct Inner {
    records: std::collections::HashMap<LraId, LraRecord>,
    // Insertion order, so list() is stable across calls too
    order: Vec<LraId>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: std::sync::RwLock::new(Inner {
                records: std::collections::HashMap::new(),
                order: Vec::new(),
            }),
        }
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> CoordinatorError {
    CoordinatorError::Storage(e.to_string().into())
}

impl LraRegistry for InMemoryRegistry {
    fn begin(
        &self,
        parent: Option<&LraId>,
        client_id: Option<&str>,
        time_limit: Option<Duration>,
    ) -> Result<LraRecord, CoordinatorError> {
        let mut inner = self.inner.write().map_err(poisoned)?;

        if let Some(parent) = parent {
            match inner.records.get(parent) {
                Some(rec) if !rec.status.is_terminal() => {}
                _ => return Err(CoordinatorError::InvalidParent(parent.clone())),
            }
        }

        let now = now_millis();
        let record = LraRecord {
            id: LraId::mint(),
            parent: parent.cloned(),
            client_id: client_id.map(Into::into),
            status: LraStatus::Active,
            created_at_millis: now,
            expires_at_millis: time_limit.map(|limit| now + limit.as_millis() as u64),
            finished_at_millis: None,
            recovering: false,
        };

        inner.order.push(record.id.clone());
        inner.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn get(&self, id: &LraId) -> Result<LraRecord, CoordinatorError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))
    }

    fn list(&self, filter: Option<LraStatus>) -> Result<Vec<LraRecord>, CoordinatorError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|rec| filter.map_or(true, |status| rec.status == status))
            .cloned()
            .collect())
    }

    fn children(&self, parent: &LraId) -> Result<Vec<LraRecord>, CoordinatorError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|rec| rec.parent.as_ref() == Some(parent))
            .cloned()
            .collect())
    }

    fn set_expiry(
        &self,
        id: &LraId,
        expires_at_millis: Option<u64>,
    ) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let rec = inner
            .records
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))?;
        rec.expires_at_millis = expires_at_millis;
        Ok(())
    }

    fn mark_recovering(&self, id: &LraId, recovering: bool) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let rec = inner
            .records
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))?;
        rec.recovering = recovering;
        Ok(())
    }

    fn transition(
        &self,
        id: &LraId,
        from: LraStatus,
        to: LraStatus,
    ) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let rec = inner
            .records
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.clone()))?;

        if rec.status != from || !from.can_transition_to(to) {
            return Err(CoordinatorError::IllegalStateTransition {
                lra: id.clone(),
                expected: from,
                actual: rec.status,
            });
        }

        rec.status = to;
        if to.is_terminal() && rec.finished_at_millis.is_none() {
            rec.finished_at_millis = Some(now_millis());
        }
        Ok(())
    }

    fn expired_active(&self, now: u64) -> Result<Vec<LraId>, CoordinatorError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|rec| rec.status == LraStatus::Active && rec.expired(now))
            .map(|rec| rec.id.clone())
            .collect())
    }

    fn purge(&self, id: &LraId) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        match inner.records.get(id) {
            None => return Err(CoordinatorError::NotFound(id.clone())),
            Some(rec) if !rec.status.is_terminal() => {
                return Err(CoordinatorError::IllegalStateTransition {
                    lra: id.clone(),
                    expected: rec.status,
                    actual: rec.status,
                })
            }
            Some(_) => {}
        }
        inner.records.remove(id);
        inner.order.retain(|other| other != id);
        Ok(())
    }
}
