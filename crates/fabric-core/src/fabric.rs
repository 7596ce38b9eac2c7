//! `MemoryFabric`: the caller-facing facade.
//!
//! Every mutation is validated, appended to the event log, then projected
//! into the read store through [`projection::apply_event`]. If projection
//! fails after the append, the log still holds the event and
//! [`MemoryFabric::rebuild`] reconciles the read store.

use std::collections::BTreeMap;
use std::path::Path;

use fabric_state::{
    contains_secrets, kinds, scrub_secrets, validate_importance, Entity, Event, EventLog,
    ExportReport, Memory,
    MemoryUpdate, NewMemory, Payload, ReadStore, StateError, DEFAULT_IMPORTANCE,
};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::FabricConfig;
use crate::context::{ContextAssembler, ContextPack, ExtractiveSummarizer, Summarizer};
use crate::error::{FabricError, FabricResult};
use crate::governance::StatusSource;
use crate::metrics::METRICS;
use crate::obs::{self, OpSpan};
use crate::projection::{self, RebuildReport};
use crate::retrieval::{HybridRetrieval, ScoredResult, SearchOptions};

/// Length of generated memory ids (hex characters of a v4 UUID).
pub const GENERATED_ID_LEN: usize = 12;

/// Fresh memory id.
pub fn generate_memory_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(GENERATED_ID_LEN);
    id
}

/// Counts across the log and the read store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub skipped_lines: usize,
    pub memories: u64,
    pub memories_by_type: BTreeMap<String, u64>,
    pub entities: u64,
    pub edges: u64,
    pub links: u64,
}

/// Optional fields for [`MemoryFabric::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub id: Option<String>,
    pub source: Option<String>,
    pub importance: Option<f64>,
    /// Mask secret-looking substrings before storage.
    pub scrub: bool,
}

impl WriteOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn scrubbed(mut self) -> Self {
        self.scrub = true;
        self
    }
}

/// Filter for [`MemoryFabric::events`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the serialized payload.
    pub contains: Option<String>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn containing(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    pub fn last(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.event_type
            .as_deref()
            .map_or(true, |t| event.event_type == t)
            && self.since.map_or(true, |since| event.timestamp >= since)
    }
}

/// Event log + read store + retrieval, opened from one [`FabricConfig`].
pub struct MemoryFabric {
    config: FabricConfig,
    log: EventLog,
    store: ReadStore,
    status_source: Option<Box<dyn StatusSource>>,
    summarizer: Box<dyn Summarizer>,
}

impl std::fmt::Debug for MemoryFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFabric")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish()
    }
}

impl MemoryFabric {
    /// Open (or create) a fabric under `config.data_dir`.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub fn open(config: FabricConfig) -> FabricResult<Self> {
        config.validate()?;
        let log = EventLog::open(config.events_dir())?;
        let store = ReadStore::open(config.db_path(), config.lock_timeout)?;
        info!("memory fabric opened");
        Ok(Self {
            config,
            log,
            store,
            status_source: None,
            summarizer: Box::new(ExtractiveSummarizer),
        })
    }

    pub fn open_from_env() -> FabricResult<Self> {
        Self::open(FabricConfig::from_env()?)
    }

    pub fn with_status_source(mut self, source: impl StatusSource + 'static) -> Self {
        self.status_source = Some(Box::new(source));
        self
    }

    pub fn with_summarizer(mut self, summarizer: impl Summarizer + 'static) -> Self {
        self.summarizer = Box::new(summarizer);
        self
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn store(&self) -> &ReadStore {
        &self.store
    }

    fn retrieval(&self) -> HybridRetrieval<'_> {
        let retrieval = HybridRetrieval::new(&self.store)
            .with_weights(self.config.weights)
            .with_recency_decay_days(self.config.recency_decay_days);
        match self.status_source.as_deref() {
            Some(source) => retrieval.with_status_source(source),
            None => retrieval,
        }
    }

    /// Append `payload` as `event_type` and project it.
    fn record(&self, event_type: &str, payload: Payload) -> FabricResult<Uuid> {
        let event = fabric_state::Event::new(event_type, payload, None);
        self.log.append_event(&event)?;
        projection::apply_event(&self.store, &event)?;
        METRICS.add_events_projected(1);
        Ok(event.id)
    }

    fn require_memory(&self, id: &str) -> FabricResult<Memory> {
        self.store.get_memory(id)?.ok_or_else(|| {
            FabricError::State(StateError::NotFound {
                kind: "memory",
                id: id.to_string(),
            })
        })
    }

    fn require_entity(&self, id: &str) -> FabricResult<Entity> {
        self.store.get_entity(id)?.ok_or_else(|| {
            FabricError::State(StateError::NotFound {
                kind: "entity",
                id: id.to_string(),
            })
        })
    }

    // -----------------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------------

    /// Store a memory and return its id.
    pub fn write(
        &self,
        content: &str,
        memory_type: &str,
        options: WriteOptions,
    ) -> FabricResult<String> {
        let content = if options.scrub {
            scrub_secrets(content)
        } else {
            if contains_secrets(content) {
                warn!(
                    memory_type,
                    "memory content looks like it holds secrets; write with scrub to mask them"
                );
            }
            content.to_string()
        };
        let mut memory = NewMemory::new(options.id.unwrap_or_else(generate_memory_id), content)
            .with_type(memory_type)
            .with_importance(options.importance.unwrap_or(DEFAULT_IMPORTANCE));
        if let Some(source) = options.source {
            memory = memory.with_source(source);
        }
        self.write_memory(memory)
    }

    /// Store a fully specified memory. The id is checked before anything
    /// is appended.
    #[instrument(skip(self, memory), fields(memory_id = %memory.id))]
    pub fn write_memory(&self, memory: NewMemory) -> FabricResult<String> {
        let _span = OpSpan::enter("write", &memory.id);
        memory.validate()?;
        if self.store.get_memory(&memory.id)?.is_some() {
            return Err(StateError::DuplicateId { id: memory.id }.into());
        }
        let event_id = self.record(
            kinds::MEMORY_CREATED,
            projection::memory_created_payload(&memory),
        )?;
        METRICS.inc_memories_written();
        obs::emit_memory_written(&memory.id, &memory.memory_type, &event_id.to_string());
        Ok(memory.id)
    }

    pub fn get(&self, id: &str) -> FabricResult<Option<Memory>> {
        Ok(self.store.get_memory(id)?)
    }

    pub fn update(&self, id: &str, update: MemoryUpdate) -> FabricResult<Memory> {
        let _span = OpSpan::enter("update", id);
        if let Some(importance) = update.importance {
            validate_importance(importance)?;
        }
        self.require_memory(id)?;
        self.record(
            kinds::MEMORY_UPDATED,
            projection::memory_updated_payload(id, &update),
        )?;
        self.require_memory(id)
    }

    pub fn delete(&self, id: &str) -> FabricResult<()> {
        let _span = OpSpan::enter("delete", id);
        self.require_memory(id)?;
        self.record(kinds::MEMORY_DELETED, projection::memory_deleted_payload(id))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Graph
    // -----------------------------------------------------------------------

    pub fn add_entity(&self, entity: Entity) -> FabricResult<()> {
        if entity.id.trim().is_empty() {
            return Err(StateError::InvalidInput("entity id must not be empty".into()).into());
        }
        self.record(
            kinds::ENTITY_UPSERTED,
            projection::entity_upserted_payload(&entity),
        )?;
        Ok(())
    }

    /// Associate a memory with an entity.
    pub fn link(&self, memory_id: &str, entity_id: &str) -> FabricResult<()> {
        self.require_memory(memory_id)?;
        self.require_entity(entity_id)?;
        self.record(
            kinds::MEMORY_ENTITY_LINKED,
            projection::memory_entity_linked_payload(memory_id, entity_id),
        )?;
        Ok(())
    }

    /// Add a weighted edge between two entities.
    pub fn relate(&self, from: &str, to: &str, relation_type: &str, weight: f64) -> FabricResult<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(StateError::InvalidInput(format!(
                "edge weight must be a non-negative number, got {weight}"
            ))
            .into());
        }
        if relation_type.trim().is_empty() {
            return Err(StateError::InvalidInput("relation type must not be empty".into()).into());
        }
        self.require_entity(from)?;
        self.require_entity(to)?;
        self.record(
            kinds::EDGE_ADDED,
            projection::edge_added_payload(from, to, relation_type, weight),
        )?;
        Ok(())
    }

    /// Memories linked to `entity_id` or to any entity within `hops` of it.
    pub fn memories_about(&self, entity_id: &str, hops: usize) -> FabricResult<Vec<Memory>> {
        self.require_entity(entity_id)?;
        let mut entities = vec![entity_id.to_string()];
        let mut reached: Vec<String> = self.store.neighbors(entity_id, hops)?.into_iter().collect();
        reached.sort();
        entities.extend(reached);
        Ok(self.store.memories_for_entities(&entities)?)
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    pub fn search(&self, query: &str, options: &SearchOptions) -> FabricResult<Vec<ScoredResult>> {
        let _span = OpSpan::enter("search", query);
        self.retrieval().search(query, options)
    }

    pub fn assemble(
        &self,
        query: &str,
        max_tokens: usize,
        type_filter: Option<&str>,
    ) -> FabricResult<ContextPack> {
        let _span = OpSpan::enter("assemble", query);
        let assembler = ContextAssembler::new(self.retrieval())
            .with_summarizer(SummarizerRef(self.summarizer.as_ref()));
        assembler.assemble(query, max_tokens, type_filter)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub fn export(&self, destination: impl AsRef<Path>, redact: bool) -> FabricResult<ExportReport> {
        let destination = destination.as_ref();
        let report = self.log.export(destination, redact)?;
        if report.skipped > 0 {
            obs::emit_log_line_skipped(report.skipped);
        }
        obs::emit_export_finished(
            &destination.display().to_string(),
            report.written,
            report.skipped,
            redact,
        );
        Ok(report)
    }

    pub fn stats(&self) -> FabricResult<Stats> {
        let mut stats = Stats::default();
        let mut events = self.log.read_all()?;
        for event in events.by_ref() {
            let event = event?;
            stats.events += 1;
            *stats.events_by_type.entry(event.event_type).or_insert(0) += 1;
        }
        stats.skipped_lines = events.skipped();

        let counts = self.store.counts()?;
        stats.memories = counts.memories;
        stats.memories_by_type = counts.memories_by_type;
        stats.entities = counts.entities;
        stats.edges = counts.edges;
        stats.links = counts.links;
        Ok(stats)
    }

    /// Events from the log, oldest first.
    pub fn events(&self, query: &EventQuery) -> FabricResult<Vec<Event>> {
        let mut events = match (&query.contains, query.since, &query.event_type) {
            (Some(needle), _, _) => self.log.search(needle)?,
            (None, Some(since), _) => self.log.read_from(since)?,
            (None, None, Some(event_type)) => self.log.by_type(event_type)?,
            (None, None, None) => self.log.events()?,
        };
        events.retain(|e| query.matches(e));
        if let Some(limit) = query.limit {
            let excess = events.len().saturating_sub(limit);
            events.drain(..excess);
        }
        Ok(events)
    }

    /// Drop the read model and replay the log into it. Events that
    /// conflict with the replayed state are skipped and counted.
    pub fn rebuild(&self) -> FabricResult<RebuildReport> {
        let _span = OpSpan::enter("rebuild", &self.config.data_dir.display().to_string());
        self.store.clear()?;
        projection::rebuild(&self.log, &self.store)
    }

    pub fn vacuum(&self) -> FabricResult<()> {
        Ok(self.store.vacuum()?)
    }

    /// Release the read store. Later store-backed calls fail with `Closed`.
    pub fn close(&self) -> FabricResult<()> {
        Ok(self.store.close()?)
    }
}

/// Borrowed summarizer handed to a per-call assembler.
struct SummarizerRef<'a>(&'a dyn Summarizer);

impl Summarizer for SummarizerRef<'_> {
    fn summarize(&self, memories: &[Memory]) -> Option<String> {
        self.0.summarize(memories)
    }
}
