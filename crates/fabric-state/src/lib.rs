//! Fabric-State: event log and read store for Memory Fabric
//!
//! This crate owns everything that touches disk: the append-only JSONL event
//! log that is the system of record, and the SQLite read model (memories,
//! full-text index, entity graph) derived from it.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: durability, index consistency, and graph traversal.
//!
//! ## Key Components
//!
//! - `EventLog`: append, replay, filter, redacted export
//! - `ReadStore`: memories + FTS5 index + entities/edges
//! - `RedactionRules`: sensitive-key masking for exports

mod error;
pub mod event;
pub mod event_log;
mod graph;
pub mod records;
pub mod redaction;
pub mod sanitize;
pub mod schema;
mod store;

pub use error::{Result, StateError};
pub use event::{kinds, Event, Payload};
pub use event_log::{
    EventIter, EventLog, ExportReport, RetainAll, RetentionPolicy, RetentionReport, EVENTS_FILE,
};
pub use graph::DEFAULT_EDGE_WEIGHT;
pub use records::{
    validate_importance, Edge, Entity, Memory, MemoryFilter, MemoryUpdate, NewMemory, StoreCounts,
    DEFAULT_IMPORTANCE, DEFAULT_MEMORY_TYPE,
};
pub use redaction::{contains_secrets, scrub_secrets, RedactionRules, REDACTED_MARKER};
pub use store::{ReadStore, DB_FILE, DEFAULT_LOCK_TIMEOUT};
