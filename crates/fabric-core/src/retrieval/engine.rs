//! Hybrid retrieval over the read store.
//!
//! Pipeline:
//! 1. sanitized full-text search fills the text candidate pool
//! 2. entities linked to the top text hits seed a weighted graph expansion
//! 3. every candidate is scored with [`ScoreWeights::combine`]
//! 4. results are ordered by score desc, then memory id asc

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use fabric_state::sanitize::query_tokens;
use fabric_state::{Memory, MemoryFilter, ReadStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scoring::{
    describe, graph_score, importance_score, normalize_fts, recency_score, ScoreComponents,
    ScoreWeights, DEFAULT_RECENCY_DECAY_DAYS,
};
use crate::error::{FabricError, FabricResult};
use crate::governance::{MemoryStatus, StatusSource};
use crate::metrics::METRICS;
use crate::obs;

/// Default number of results.
pub const DEFAULT_TOP_K: usize = 10;

/// Smallest text candidate pool, whatever `top_k` is.
pub const MIN_CANDIDATE_POOL: usize = 30;

/// Graph expansion hop limit.
pub const EXPANSION_HOPS: usize = 2;

/// Number of top text hits whose entities seed expansion.
pub const EXPANSION_SEEDS: usize = 3;

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub top_k: usize,
    pub entity_expand: bool,
    pub memory_type: Option<String>,
    pub source: Option<String>,
    /// Allowed governance statuses; `None` admits everything.
    pub statuses: Option<Vec<MemoryStatus>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            entity_expand: true,
            memory_type: None,
            source: None,
            statuses: None,
        }
    }
}

impl SearchOptions {
    pub fn top_k(top_k: usize) -> Self {
        Self {
            top_k,
            ..Self::default()
        }
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = MemoryStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn without_expansion(mut self) -> Self {
        self.entity_expand = false;
        self
    }

    fn filter(&self) -> MemoryFilter {
        MemoryFilter {
            memory_type: self.memory_type.clone(),
            source: self.source.clone(),
        }
    }

    /// Text candidate pool size for these options.
    pub fn candidate_pool(&self) -> usize {
        self.top_k.saturating_mul(3).max(MIN_CANDIDATE_POOL)
    }
}

/// One ranked memory with its score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub memory_id: String,
    pub score: f64,
    /// Weighted contribution per component (`fts`, `importance`, `recency`,
    /// `graph`); sums to `score`.
    pub explanation: BTreeMap<String, f64>,
    pub label: String,
    pub memory: Memory,
}

struct Candidate {
    memory: Memory,
    fts: f64,
    graph: f64,
}

/// Hybrid text + importance + recency + graph retrieval.
pub struct HybridRetrieval<'a> {
    store: &'a ReadStore,
    weights: ScoreWeights,
    recency_decay_days: f64,
    status_source: Option<&'a dyn StatusSource>,
}

impl<'a> HybridRetrieval<'a> {
    pub fn new(store: &'a ReadStore) -> Self {
        Self {
            store,
            weights: ScoreWeights::default(),
            recency_decay_days: DEFAULT_RECENCY_DECAY_DAYS,
            status_source: None,
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_recency_decay_days(mut self, days: f64) -> Self {
        self.recency_decay_days = days;
        self
    }

    pub fn with_status_source(mut self, source: &'a dyn StatusSource) -> Self {
        self.status_source = Some(source);
        self
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> FabricResult<Vec<ScoredResult>> {
        self.search_at(query, options, Utc::now())
    }

    /// Search with an explicit "now" for recency.
    pub fn search_at(
        &self,
        query: &str,
        options: &SearchOptions,
        now: DateTime<Utc>,
    ) -> FabricResult<Vec<ScoredResult>> {
        if query_tokens(query).is_empty() {
            return Err(FabricError::InvalidQuery(format!(
                "no searchable terms in {query:?}"
            )));
        }
        if options.top_k == 0 {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        METRICS.inc_searches();

        let filter = options.filter();
        let hits = self
            .store
            .search_memories_fts(query, options.candidate_pool(), &filter)?;

        let raw: Vec<f64> = hits.iter().map(|(_, s)| *s).collect();
        let normalized = normalize_fts(&raw);
        let seed_memories: Vec<String> = hits
            .iter()
            .take(EXPANSION_SEEDS)
            .map(|(m, _)| m.id.clone())
            .collect();

        let mut candidates: HashMap<String, Candidate> = hits
            .into_iter()
            .zip(normalized)
            .map(|((memory, _), fts)| {
                (
                    memory.id.clone(),
                    Candidate {
                        memory,
                        fts,
                        graph: 0.0,
                    },
                )
            })
            .collect();

        if options.entity_expand && !seed_memories.is_empty() {
            self.expand(&seed_memories, &filter, &mut candidates)?;
        }

        if let Some(ref allowed) = options.statuses {
            candidates.retain(|id, _| {
                let status = self
                    .status_source
                    .map(|s| s.effective_status(id))
                    .unwrap_or(MemoryStatus::Active);
                allowed.contains(&status)
            });
        }

        let total = candidates.len();
        let mut results: Vec<ScoredResult> = candidates
            .into_values()
            .map(|c| self.score(c, now))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        results.truncate(options.top_k);

        obs::emit_search_completed(
            query,
            total,
            results.len(),
            started.elapsed().as_millis() as u64,
        );
        Ok(results)
    }

    /// Raise graph scores from the entities linked to the seed memories and
    /// pull in memories reached only through the graph.
    fn expand(
        &self,
        seed_memories: &[String],
        filter: &MemoryFilter,
        candidates: &mut HashMap<String, Candidate>,
    ) -> FabricResult<()> {
        let mut seeds: Vec<String> = Vec::new();
        for memory_id in seed_memories {
            for entity in self.store.entities_for_memory(memory_id)? {
                if !seeds.contains(&entity.id) {
                    seeds.push(entity.id);
                }
            }
        }
        if seeds.is_empty() {
            return Ok(());
        }

        let proximity = self.store.weighted_neighbors(&seeds, EXPANSION_HOPS)?;
        let reached: Vec<String> = proximity.keys().cloned().collect();
        let mut best: HashMap<String, f64> = HashMap::new();
        for (memory_id, entity_id) in self.store.links_for_entities(&reached)? {
            let p = proximity.get(&entity_id).copied().unwrap_or(0.0);
            let slot = best.entry(memory_id).or_insert(0.0);
            *slot = graph_score([*slot, p]);
        }

        let mut missing: Vec<String> = Vec::new();
        for (memory_id, g) in &best {
            match candidates.get_mut(memory_id) {
                Some(c) => c.graph = *g,
                None => missing.push(memory_id.clone()),
            }
        }
        missing.sort();
        let added = missing.len();
        for memory in self.store.get_memories(&missing)? {
            if !filter.matches(&memory) {
                continue;
            }
            let graph = best.get(&memory.id).copied().unwrap_or(0.0);
            candidates.insert(
                memory.id.clone(),
                Candidate {
                    memory,
                    fts: 0.0,
                    graph,
                },
            );
        }
        debug!(seeds = seeds.len(), reached = reached.len(), added, "graph expansion");
        Ok(())
    }

    fn score(&self, c: Candidate, now: DateTime<Utc>) -> ScoredResult {
        let components = ScoreComponents {
            fts: c.fts,
            importance: importance_score(c.memory.importance),
            recency: recency_score(c.memory.updated_at, now, self.recency_decay_days),
            graph: c.graph,
        };
        ScoredResult {
            memory_id: c.memory.id.clone(),
            score: self.weights.combine(&components),
            explanation: self.weights.contributions(&components),
            label: describe(&components),
            memory: c.memory,
        }
    }
}
