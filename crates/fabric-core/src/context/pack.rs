//! The assembled context pack and its renderings.

use fabric_state::Memory;
use serde::{Deserialize, Serialize};

/// One memory admitted into a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
    pub tokens: usize,
}

/// Memories selected for a query under a token budget.
///
/// `token_used` is the exact sum of the selected memories' costs and never
/// exceeds `token_budget`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub query: String,
    pub token_budget: usize,
    pub token_used: usize,
    pub memories: Vec<PackedMemory>,
    pub summary: Option<String>,
    /// Ranked memories skipped because they did not fit.
    pub dropped_count: usize,
}

impl ContextPack {
    pub fn empty(query: impl Into<String>, token_budget: usize) -> Self {
        Self {
            query: query.into(),
            token_budget,
            token_used: 0,
            memories: Vec::new(),
            summary: None,
            dropped_count: 0,
        }
    }

    pub fn token_remaining(&self) -> usize {
        self.token_budget.saturating_sub(self.token_used)
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn memory_ids(&self) -> Vec<&str> {
        self.memories.iter().map(|m| m.memory.id.as_str()).collect()
    }

    /// Markdown rendering for direct injection into a prompt.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Context Pack\n\n");
        if !self.query.is_empty() {
            out.push_str(&format!("**Query:** {}\n\n", self.query));
        }
        out.push_str(&format!(
            "**Token Budget:** {}/{} ({} remaining)\n",
            self.token_used,
            self.token_budget,
            self.token_remaining()
        ));

        if let Some(ref summary) = self.summary {
            out.push_str("\n## Summary\n\n");
            for line in summary.lines() {
                out.push_str(&format!("- {line}\n"));
            }
        }

        if !self.memories.is_empty() {
            out.push_str("\n## Memories\n");
            for m in &self.memories {
                let pct = (m.score * 100.0).round() as i64;
                out.push_str(&format!(
                    "\n### [{}] {} (score: {pct}%)\n\n{}\n",
                    m.memory.memory_type, m.memory.id, m.memory.content
                ));
            }
        }
        out
    }
}
