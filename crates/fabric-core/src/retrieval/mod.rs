//! Hybrid retrieval: full-text relevance blended with importance, recency
//! and entity-graph proximity.

pub mod engine;
pub mod scoring;

pub use engine::{HybridRetrieval, ScoredResult, SearchOptions, DEFAULT_TOP_K};
pub use scoring::{
    normalize_fts, recency_score, ScoreComponents, ScoreWeights, DEFAULT_RECENCY_DECAY_DAYS,
};
