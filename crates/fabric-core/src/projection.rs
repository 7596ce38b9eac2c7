//! Projection of log events into the read store.
//!
//! [`apply_event`] is the only path by which the fabric mutates the read
//! store, so replaying the log with [`rebuild`] reproduces exactly what the
//! live calls produced.

use fabric_state::{
    kinds, Entity, Event, EventLog, MemoryUpdate, NewMemory, Payload, ReadStore, StateError,
    DEFAULT_EDGE_WEIGHT, DEFAULT_IMPORTANCE, DEFAULT_MEMORY_TYPE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{FabricError, FabricResult};
use crate::metrics::METRICS;
use crate::obs;

/// Whether an event changed the read store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projected {
    Applied,
    /// Event type the read store does not model.
    Ignored,
}

/// Outcome of a full replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub events: usize,
    pub applied: usize,
    pub ignored: usize,
    /// Events that parsed but conflicted with the replayed state
    /// (duplicate create, unknown target, missing field).
    pub failed: usize,
    pub skipped_lines: usize,
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

pub fn memory_created_payload(memory: &NewMemory) -> Payload {
    to_payload(json!({
        "memory_id": memory.id,
        "content": memory.content,
        "memory_type": memory.memory_type,
        "source": memory.source,
        "importance": memory.importance,
    }))
}

pub fn memory_updated_payload(memory_id: &str, update: &MemoryUpdate) -> Payload {
    let mut payload = to_payload(json!({ "memory_id": memory_id }));
    if let Some(ref content) = update.content {
        payload.insert("content".into(), json!(content));
    }
    if let Some(importance) = update.importance {
        payload.insert("importance".into(), json!(importance));
    }
    payload
}

pub fn memory_deleted_payload(memory_id: &str) -> Payload {
    to_payload(json!({ "memory_id": memory_id }))
}

pub fn entity_upserted_payload(entity: &Entity) -> Payload {
    to_payload(json!({
        "entity_id": entity.id,
        "name": entity.name,
        "entity_type": entity.entity_type,
    }))
}

pub fn edge_added_payload(from: &str, to: &str, relation_type: &str, weight: f64) -> Payload {
    to_payload(json!({
        "from_entity": from,
        "to_entity": to,
        "relation_type": relation_type,
        "weight": weight,
    }))
}

pub fn memory_entity_linked_payload(memory_id: &str, entity_id: &str) -> Payload {
    to_payload(json!({ "memory_id": memory_id, "entity_id": entity_id }))
}

fn to_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Apply one event to the read store. Timestamps come from the event, so
/// replays are deterministic.
pub fn apply_event(store: &ReadStore, event: &Event) -> FabricResult<Projected> {
    match event.event_type.as_str() {
        kinds::MEMORY_CREATED => {
            let mut memory = NewMemory::new(
                required(event, "memory_id")?,
                required(event, "content")?,
            )
            .with_type(event.str_field("memory_type").unwrap_or(DEFAULT_MEMORY_TYPE))
            .with_importance(event.f64_field("importance").unwrap_or(DEFAULT_IMPORTANCE))
            .created_at(event.timestamp);
            if let Some(source) = event.str_field("source") {
                memory = memory.with_source(source);
            }
            store.insert_memory(&memory)?;
        }
        kinds::MEMORY_UPDATED => {
            let update = MemoryUpdate {
                content: event.str_field("content").map(str::to_string),
                importance: event.f64_field("importance"),
                updated_at: Some(event.timestamp),
            };
            store.update_memory(required(event, "memory_id")?, &update)?;
        }
        kinds::MEMORY_DELETED => {
            store.delete_memory(required(event, "memory_id")?)?;
        }
        kinds::ENTITY_UPSERTED => {
            let id = required(event, "entity_id")?;
            let entity = Entity::new(
                id,
                event.str_field("name").unwrap_or(id),
                event.str_field("entity_type").unwrap_or("concept"),
            );
            store.upsert_entity(&entity)?;
        }
        kinds::EDGE_ADDED => {
            store.add_edge(
                required(event, "from_entity")?,
                required(event, "to_entity")?,
                required(event, "relation_type")?,
                event.f64_field("weight").unwrap_or(DEFAULT_EDGE_WEIGHT),
            )?;
        }
        kinds::MEMORY_ENTITY_LINKED => {
            store.link_memory_entity(
                required(event, "memory_id")?,
                required(event, "entity_id")?,
            )?;
        }
        other => {
            debug!(event_type = %other, "event not projected");
            return Ok(Projected::Ignored);
        }
    }
    Ok(Projected::Applied)
}

fn required<'e>(event: &'e Event, key: &str) -> FabricResult<&'e str> {
    event.str_field(key).ok_or_else(|| {
        FabricError::State(StateError::InvalidInput(format!(
            "{} event {} is missing string field `{key}`",
            event.event_type, event.id
        )))
    })
}

/// Data conflicts are per-event; anything else (I/O, locks, a closed
/// store) aborts the replay.
fn is_replay_conflict(err: &FabricError) -> bool {
    matches!(
        err,
        FabricError::State(
            StateError::DuplicateId { .. } | StateError::NotFound { .. } | StateError::InvalidInput(_)
        )
    )
}

/// Replay the whole log into an empty store.
///
/// Events that conflict with the state replayed so far are skipped and
/// counted in [`RebuildReport::failed`], like malformed lines.
pub fn rebuild(log: &EventLog, store: &ReadStore) -> FabricResult<RebuildReport> {
    let counts = store.counts()?;
    if counts.memories + counts.entities + counts.edges + counts.links + counts.fts_entries > 0 {
        return Err(FabricError::State(StateError::InvalidInput(
            "rebuild target store is not empty".into(),
        )));
    }

    let mut report = RebuildReport::default();
    let mut events = log.read_all()?;
    for event in events.by_ref() {
        let event = event?;
        report.events += 1;
        match apply_event(store, &event) {
            Ok(Projected::Applied) => report.applied += 1,
            Ok(Projected::Ignored) => report.ignored += 1,
            Err(err) if is_replay_conflict(&err) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %err,
                    "event not replayable, skipping"
                );
                report.failed += 1;
            }
            Err(err) => return Err(err),
        }
    }
    report.skipped_lines = events.skipped();
    if report.skipped_lines > 0 {
        obs::emit_log_line_skipped(report.skipped_lines);
    }
    METRICS.add_events_projected(report.applied as u64);
    info!(
        events = report.events,
        applied = report.applied,
        ignored = report.ignored,
        failed = report.failed,
        skipped_lines = report.skipped_lines,
        "read store rebuilt from log"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, payload: Payload) -> Event {
        Event::new(kind, payload, None)
    }

    #[test]
    fn created_uses_event_timestamp() {
        let store = ReadStore::open_in_memory().unwrap();
        let e = event(
            kinds::MEMORY_CREATED,
            memory_created_payload(&NewMemory::new("m1", "hello").with_source("proj")),
        );
        assert_eq!(apply_event(&store, &e).unwrap(), Projected::Applied);
        let m = store.get_memory("m1").unwrap().unwrap();
        assert_eq!(m.created_at, e.timestamp);
        assert_eq!(m.source.as_deref(), Some("proj"));
    }

    #[test]
    fn unknown_types_are_ignored() {
        let store = ReadStore::open_in_memory().unwrap();
        let e = event("approval_proposed", Payload::new());
        assert_eq!(apply_event(&store, &e).unwrap(), Projected::Ignored);
    }

    #[test]
    fn missing_field_is_invalid_input() {
        let store = ReadStore::open_in_memory().unwrap();
        let e = event(kinds::MEMORY_DELETED, Payload::new());
        assert!(matches!(
            apply_event(&store, &e),
            Err(FabricError::State(StateError::InvalidInput(_)))
        ));
    }

    #[test]
    fn update_payload_only_carries_changed_fields() {
        let p = memory_updated_payload("m1", &MemoryUpdate::importance(0.2));
        assert!(p.contains_key("importance"));
        assert!(!p.contains_key("content"));
    }

    #[test]
    fn rebuild_refuses_populated_store() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        let store = ReadStore::open_in_memory().unwrap();
        store.insert_memory(&NewMemory::new("x", "y")).unwrap();
        assert!(rebuild(&log, &store).is_err());
    }

    #[test]
    fn rebuild_skips_conflicting_events_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        let keep = memory_created_payload(&NewMemory::new("keep", "first copy"));
        log.append(kinds::MEMORY_CREATED, keep.clone(), None).unwrap();
        log.append(kinds::MEMORY_CREATED, keep, None).unwrap();
        log.append(kinds::MEMORY_DELETED, memory_deleted_payload("never-written"), None)
            .unwrap();
        log.append(
            kinds::MEMORY_CREATED,
            memory_created_payload(&NewMemory::new("later", "written after")),
            None,
        )
        .unwrap();

        let store = ReadStore::open_in_memory().unwrap();
        let report = rebuild(&log, &store).unwrap();
        assert_eq!(report.events, 4);
        assert_eq!(report.applied, 2);
        assert_eq!(report.failed, 2);
        assert!(store.get_memory("keep").unwrap().is_some());
        assert!(store.get_memory("later").unwrap().is_some());
    }

    #[test]
    fn rebuild_aborts_on_closed_store() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.append(
            kinds::MEMORY_CREATED,
            memory_created_payload(&NewMemory::new("m1", "x")),
            None,
        )
        .unwrap();
        let store = ReadStore::open_in_memory().unwrap();
        store.close().unwrap();
        assert!(matches!(
            rebuild(&log, &store),
            Err(FabricError::State(StateError::Closed))
        ));
    }

    #[test]
    fn rebuild_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.append(
            kinds::MEMORY_CREATED,
            memory_created_payload(&NewMemory::new("m1", "first")),
            None,
        )
        .unwrap();
        log.append(
            kinds::MEMORY_UPDATED,
            memory_updated_payload("m1", &MemoryUpdate::content("second")),
            None,
        )
        .unwrap();
        log.append("note", Payload::new(), None).unwrap();

        let store = ReadStore::open_in_memory().unwrap();
        let report = rebuild(&log, &store).unwrap();
        assert_eq!(report.events, 3);
        assert_eq!(report.applied, 2);
        assert_eq!(report.ignored, 1);
        assert_eq!(store.get_memory("m1").unwrap().unwrap().content, "second");
    }
}
