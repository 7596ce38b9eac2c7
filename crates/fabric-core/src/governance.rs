//! Read-only view of the governance lifecycle.
//!
//! Approval workflows live outside the fabric. Retrieval only needs to ask
//! "what is the status of memory X?", which is what [`StatusSource`] answers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a memory as decided by governance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Proposed,
    Active,
    Deprecated,
    Expired,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Proposed => "proposed",
            MemoryStatus::Active => "active",
            MemoryStatus::Deprecated => "deprecated",
            MemoryStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proposed" => Ok(MemoryStatus::Proposed),
            "active" => Ok(MemoryStatus::Active),
            "deprecated" => Ok(MemoryStatus::Deprecated),
            "expired" => Ok(MemoryStatus::Expired),
            other => Err(format!("unknown memory status: {other}")),
        }
    }
}

/// Status lookup consumed by retrieval.
pub trait StatusSource: Send + Sync {
    /// Recorded status, or `None` when governance has never seen the memory.
    fn status(&self, memory_id: &str) -> Option<MemoryStatus>;

    /// Effective status; unrecorded memories count as active.
    fn effective_status(&self, memory_id: &str) -> MemoryStatus {
        self.status(memory_id).unwrap_or(MemoryStatus::Active)
    }
}

/// Map-backed status source for tests and embedding callers.
#[derive(Debug, Default)]
pub struct InMemoryStatusSource {
    statuses: RwLock<HashMap<String, MemoryStatus>>,
}

impl InMemoryStatusSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, memory_id: impl Into<String>, status: MemoryStatus) {
        self.statuses.write().insert(memory_id.into(), status);
    }
}

impl StatusSource for InMemoryStatusSource {
    fn status(&self, memory_id: &str) -> Option<MemoryStatus> {
        self.statuses.read().get(memory_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecorded_defaults_to_active() {
        let src = InMemoryStatusSource::new();
        assert_eq!(src.status("m1"), None);
        assert_eq!(src.effective_status("m1"), MemoryStatus::Active);
        src.set("m1", MemoryStatus::Expired);
        assert_eq!(src.effective_status("m1"), MemoryStatus::Expired);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Deprecated".parse::<MemoryStatus>().unwrap(), MemoryStatus::Deprecated);
        assert!("archived".parse::<MemoryStatus>().is_err());
        assert_eq!(MemoryStatus::Proposed.to_string(), "proposed");
    }
}
