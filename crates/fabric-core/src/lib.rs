//! Fabric-Core: retrieval and context assembly for Memory Fabric
//!
//! Builds on `fabric-state` (event log + read store) and provides:
//!
//! - `HybridRetrieval`: text relevance blended with importance, recency and
//!   entity-graph proximity
//! - `ContextAssembler`: greedy packing of ranked memories into a token budget
//! - `projection`: the single event → read-store mutation path, and rebuilds
//! - `MemoryFabric`: facade tying the above to one data directory

pub mod config;
pub mod context;
pub mod error;
pub mod fabric;
pub mod governance;
pub mod metrics;
pub mod obs;
pub mod projection;
pub mod retrieval;
pub mod telemetry;

pub use config::FabricConfig;
pub use context::{
    estimate_tokens, ContextAssembler, ContextPack, ExtractiveSummarizer, PackedMemory,
    Summarizer, DEFAULT_MAX_TOKENS,
};
pub use error::{FabricError, FabricResult};
pub use fabric::{generate_memory_id, EventQuery, MemoryFabric, Stats, WriteOptions};
pub use governance::{InMemoryStatusSource, MemoryStatus, StatusSource};
pub use projection::{apply_event, rebuild, Projected, RebuildReport};
pub use retrieval::{HybridRetrieval, ScoreWeights, ScoredResult, SearchOptions, DEFAULT_TOP_K};
pub use telemetry::init_tracing;

pub use fabric_state::{
    Entity, Event, EventLog, ExportReport, Memory, MemoryUpdate, NewMemory, ReadStore, StateError,
};
