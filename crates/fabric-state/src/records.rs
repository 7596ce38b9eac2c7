//! Normalized records held by the read store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StateError};

/// Default memory category.
pub const DEFAULT_MEMORY_TYPE: &str = "general";

/// Default importance for new memories.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub source: Option<String>,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert request for a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub id: String,
    pub content: String,
    pub memory_type: String,
    pub source: Option<String>,
    pub importance: f64,
    /// Creation instant; `None` means "now".
    pub created_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            memory_type: DEFAULT_MEMORY_TYPE.to_string(),
            source: None,
            importance: DEFAULT_IMPORTANCE,
            created_at: None,
        }
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = memory_type.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Reject empty ids/types and importance outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StateError::InvalidInput("memory id must not be empty".into()));
        }
        if self.memory_type.trim().is_empty() {
            return Err(StateError::InvalidInput(
                "memory type must not be empty".into(),
            ));
        }
        validate_importance(self.importance)
    }
}

/// Partial update of a memory. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub importance: Option<f64>,
    /// Update instant; `None` means "now".
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemoryUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn importance(importance: f64) -> Self {
        Self {
            importance: Some(importance),
            ..Self::default()
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}

pub fn validate_importance(importance: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&importance) {
        return Err(StateError::InvalidInput(format!(
            "importance must be within [0, 1], got {importance}"
        )));
    }
    Ok(())
}

/// Optional filters applied to memory queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFilter {
    pub memory_type: Option<String>,
    pub source: Option<String>,
}

impl MemoryFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn matches(&self, memory: &Memory) -> bool {
        if let Some(ref t) = self.memory_type {
            if &memory.memory_type != t {
                return false;
            }
        }
        if let Some(ref s) = self.source {
            if memory.source.as_ref() != Some(s) {
                return false;
            }
        }
        true
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// A directed, weighted relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    pub weight: f64,
}

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub memories: u64,
    pub entities: u64,
    pub edges: u64,
    pub links: u64,
    pub fts_entries: u64,
    pub memories_by_type: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_defaults() {
        let m = NewMemory::new("a", "content");
        assert_eq!(m.memory_type, DEFAULT_MEMORY_TYPE);
        assert_eq!(m.importance, DEFAULT_IMPORTANCE);
        assert!(m.source.is_none());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn importance_out_of_range_rejected() {
        assert!(NewMemory::new("a", "c").with_importance(1.5).validate().is_err());
        assert!(NewMemory::new("a", "c").with_importance(-0.1).validate().is_err());
        assert!(NewMemory::new("a", "c").with_importance(f64::NAN).validate().is_err());
        assert!(NewMemory::new("a", "c").with_importance(1.0).validate().is_ok());
    }

    #[test]
    fn empty_id_rejected() {
        assert!(NewMemory::new(" ", "c").validate().is_err());
    }

    #[test]
    fn filter_matches_type_and_source() {
        let now = Utc::now();
        let m = Memory {
            id: "a".into(),
            content: "c".into(),
            memory_type: "decision".into(),
            source: Some("proj".into()),
            importance: 0.5,
            created_at: now,
            updated_at: now,
        };
        assert!(MemoryFilter::any().matches(&m));
        assert!(MemoryFilter::any().with_type("decision").matches(&m));
        assert!(!MemoryFilter::any().with_type("general").matches(&m));
        assert!(MemoryFilter::any().with_source("proj").matches(&m));
        assert!(!MemoryFilter::any().with_source("other").matches(&m));
    }
}
