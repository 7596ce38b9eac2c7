//! Token-budgeted context assembly.
//!
//! Ranked results are packed greedily, best score first. Packing stops at the
//! first memory that does not fit; it and every lower-ranked result count as
//! dropped. Nothing is swapped in and nothing is truncated.

use chrono::{DateTime, Utc};
use fabric_state::Memory;
use tracing::debug;

use super::pack::{ContextPack, PackedMemory};
use super::summary::{ExtractiveSummarizer, Summarizer};
use crate::error::FabricResult;
use crate::metrics::METRICS;
use crate::obs;
use crate::retrieval::{HybridRetrieval, SearchOptions};

/// Default token budget for a pack.
pub const DEFAULT_MAX_TOKENS: usize = 4_000;

/// Estimate the token cost of `text` (4 characters per token, rounded up).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Retrieval pool size for a budget: `max_tokens / 8`, clamped to `[20, 1000]`.
pub fn pool_size(max_tokens: usize) -> usize {
    (max_tokens / 8).clamp(20, 1000)
}

/// Builds [`ContextPack`]s from hybrid retrieval results.
pub struct ContextAssembler<'a> {
    retrieval: HybridRetrieval<'a>,
    summarizer: Option<Box<dyn Summarizer + 'a>>,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(retrieval: HybridRetrieval<'a>) -> Self {
        Self {
            retrieval,
            summarizer: Some(Box::new(ExtractiveSummarizer)),
        }
    }

    pub fn with_summarizer(mut self, summarizer: impl Summarizer + 'a) -> Self {
        self.summarizer = Some(Box::new(summarizer));
        self
    }

    pub fn without_summary(mut self) -> Self {
        self.summarizer = None;
        self
    }

    pub fn assemble(
        &self,
        query: &str,
        max_tokens: usize,
        type_filter: Option<&str>,
    ) -> FabricResult<ContextPack> {
        let mut options = SearchOptions::default();
        options.memory_type = type_filter.map(str::to_string);
        self.assemble_with(query, max_tokens, options, Utc::now())
    }

    /// Assemble with explicit search options (`top_k` is replaced by the
    /// budget-derived pool size) and an explicit "now".
    pub fn assemble_with(
        &self,
        query: &str,
        max_tokens: usize,
        mut options: SearchOptions,
        now: DateTime<Utc>,
    ) -> FabricResult<ContextPack> {
        options.top_k = pool_size(max_tokens);
        let ranked = self.retrieval.search_at(query, &options, now)?;

        let mut pack = ContextPack::empty(query, max_tokens);
        let total = ranked.len();
        for (rank, result) in ranked.into_iter().enumerate() {
            let cost = estimate_tokens(&result.memory.content);
            if pack.token_used + cost > max_tokens {
                // The first non-fit ends packing; later, smaller results are not
                // pulled forward in its place.
                pack.dropped_count = total - rank;
                break;
            }
            pack.token_used += cost;
            pack.memories.push(PackedMemory {
                memory: result.memory,
                score: result.score,
                tokens: cost,
            });
        }
        debug!(
            selected = pack.memories.len(),
            dropped = pack.dropped_count,
            "budget packing done"
        );

        if let Some(ref summarizer) = self.summarizer {
            let selected: Vec<Memory> = pack.memories.iter().map(|m| m.memory.clone()).collect();
            pack.summary = summarizer.summarize(&selected);
        }

        METRICS.inc_packs();
        obs::emit_pack_assembled(
            query,
            pack.memories.len(),
            pack.dropped_count,
            pack.token_used,
            max_tokens,
        );
        Ok(pack)
    }
}
