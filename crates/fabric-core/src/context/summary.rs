//! Summaries attached to context packs.

use fabric_state::Memory;

/// Characters of each memory quoted in an extractive summary.
pub const KEY_POINT_CHARS: usize = 200;

/// Key points quoted per memory type.
pub const KEY_POINTS_PER_TYPE: usize = 3;

/// Produces an optional summary for the memories selected into a pack.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, memories: &[Memory]) -> Option<String>;
}

/// Groups memories by type and quotes the first few of every type that has
/// more than one memory. One line per type, in first-seen order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

impl Summarizer for ExtractiveSummarizer {
    fn summarize(&self, memories: &[Memory]) -> Option<String> {
        let mut groups: Vec<(&str, Vec<&Memory>)> = Vec::new();
        for memory in memories {
            match groups.iter_mut().find(|(t, _)| *t == memory.memory_type) {
                Some((_, members)) => members.push(memory),
                None => groups.push((memory.memory_type.as_str(), vec![memory])),
            }
        }

        let lines: Vec<String> = groups
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(memory_type, members)| {
                let points: Vec<String> = members
                    .iter()
                    .take(KEY_POINTS_PER_TYPE)
                    .map(|m| m.content.chars().take(KEY_POINT_CHARS).collect())
                    .collect();
                format!(
                    "{} {memory_type} memories found. Key points: {}",
                    members.len(),
                    points.join(" | ")
                )
            })
            .collect();

        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}
