//! Event records persisted in the append-only log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event payload: insertion-ordered map of JSON values.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Well-known event types emitted by the memory fabric.
pub mod kinds {
    pub const MEMORY_CREATED: &str = "memory_created";
    pub const MEMORY_UPDATED: &str = "memory_updated";
    pub const MEMORY_DELETED: &str = "memory_deleted";
    pub const ENTITY_UPSERTED: &str = "entity_upserted";
    pub const EDGE_ADDED: &str = "edge_added";
    pub const MEMORY_ENTITY_LINKED: &str = "memory_entity_linked";
}

/// One immutable fact in the log. Serialized as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Payload,
    pub correlation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Payload, correlation_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            correlation_id,
            timestamp: Utc::now(),
        }
    }

    /// String field from the payload, if present and a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Numeric field from the payload, if present and a number.
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }
}
