//! LRA identity types and the millisecond clock

use serde::{Deserialize, Serialize};

/// Unique identifier for a Long Running Action.
///
/// Opaque URI-like token (`urn:lra:<uuid>`). Clients treat it as a black box;
/// the coordinator only ever compares and hashes it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LraId(Box<str>);

impl LraId {
    /// Mint a fresh, globally unique LRA id
    pub fn mint() -> Self {
        Self(format!("urn:lra:{}", uuid::Uuid::new_v4()).into_boxed_str())
    }

    /// Wrap an id received from a client round-trip
    pub fn from_token(token: &str) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for LraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LraId({})", self.0)
    }
}

impl std::fmt::Display for LraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier a participant chooses for its enlistment, unique within one LRA
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnlistmentId(Box<str>);

impl EnlistmentId {
    /// Mint a coordinator-assigned enlistment id
    pub fn mint() -> Self {
        Self(format!("enlist:{}", uuid::Uuid::new_v4()).into_boxed_str())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EnlistmentId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Debug for EnlistmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnlistmentId({})", self.0)
    }
}

impl std::fmt::Display for EnlistmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current time in milliseconds since UNIX epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
