//! Relevance scoring.
//!
//! ```text
//! score = 0.40 * fts + 0.30 * importance + 0.20 * recency + 0.10 * graph
//! ```
//!
//! Each component is a pure function returning a value in `[0, 1]`;
//! [`ScoreWeights::combine`] is the only place they meet.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default recency decay constant (days).
pub const DEFAULT_RECENCY_DECAY_DAYS: f64 = 365.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Weights of the four score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub fts: f64,
    pub importance: f64,
    pub recency: f64,
    pub graph: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            fts: 0.40,
            importance: 0.30,
            recency: 0.20,
            graph: 0.10,
        }
    }
}

/// Raw component values, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub fts: f64,
    pub importance: f64,
    pub recency: f64,
    pub graph: f64,
}

impl ScoreWeights {
    /// Weighted sum of the components.
    pub fn combine(&self, c: &ScoreComponents) -> f64 {
        self.fts * c.fts
            + self.importance * c.importance
            + self.recency * c.recency
            + self.graph * c.graph
    }

    /// Per-component weighted contributions, keyed by component name.
    pub fn contributions(&self, c: &ScoreComponents) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("fts".to_string(), self.fts * c.fts),
            ("importance".to_string(), self.importance * c.importance),
            ("recency".to_string(), self.recency * c.recency),
            ("graph".to_string(), self.graph * c.graph),
        ])
    }
}

/// Min-max normalize raw text scores over the candidate set.
///
/// If every raw score is equal (including a single candidate), all map to
/// `1.0`: they matched, and none matched better than another.
pub fn normalize_fts(raw: &[f64]) -> Vec<f64> {
    let Some(min) = raw.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = raw.iter().copied().fold(min, f64::max);
    let span = max - min;
    if span <= f64::EPSILON {
        return vec![1.0; raw.len()];
    }
    raw.iter().map(|x| ((x - min) / span).clamp(0.0, 1.0)).collect()
}

/// Stored importance clamped into `[0, 1]`.
pub fn importance_score(importance: f64) -> f64 {
    importance.clamp(0.0, 1.0)
}

/// `exp(-age_days / decay_days)`. Future timestamps count as age zero.
pub fn recency_score(updated_at: DateTime<Utc>, now: DateTime<Utc>, decay_days: f64) -> f64 {
    let age_days = ((now - updated_at).num_milliseconds() as f64 / MS_PER_DAY).max(0.0);
    (-age_days / decay_days).exp().clamp(0.0, 1.0)
}

/// Best proximity among a memory's linked entities, or `0` if none.
pub fn graph_score(proximities: impl IntoIterator<Item = f64>) -> f64 {
    proximities
        .into_iter()
        .fold(0.0_f64, f64::max)
        .clamp(0.0, 1.0)
}

/// Short human-readable description of a component set.
pub fn describe(c: &ScoreComponents) -> String {
    let mut parts = Vec::new();
    if c.fts > 0.5 {
        parts.push("high text relevance");
    } else if c.fts > 0.2 {
        parts.push("moderate text relevance");
    } else {
        parts.push("low text relevance");
    }
    if c.importance > 0.7 {
        parts.push("high importance");
    } else if c.importance > 0.4 {
        parts.push("medium importance");
    }
    if c.recency > 0.7 {
        parts.push("recent");
    } else if c.recency > 0.3 {
        parts.push("somewhat recent");
    }
    if c.graph > 0.3 {
        parts.push("well-connected in graph");
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn default_weights_sum_to_one() {
        let w = ScoreWeights::default();
        assert!((w.fts + w.importance + w.recency + w.graph - 1.0).abs() < 1e-12);
    }

    #[test]
    fn combine_matches_contributions() {
        let w = ScoreWeights::default();
        let c = ScoreComponents {
            fts: 1.0,
            importance: 0.5,
            recency: 0.25,
            graph: 0.0,
        };
        let total: f64 = w.contributions(&c).values().sum();
        assert!((w.combine(&c) - total).abs() < 1e-12);
        assert!((w.combine(&c) - (0.4 + 0.15 + 0.05)).abs() < 1e-12);
    }

    #[test]
    fn importance_strictly_increases_score() {
        let w = ScoreWeights::default();
        let mut c = ScoreComponents {
            fts: 0.3,
            importance: 0.1,
            recency: 0.6,
            graph: 0.2,
        };
        let mut last = w.combine(&c);
        for step in 2..=10 {
            c.importance = step as f64 / 10.0;
            let next = w.combine(&c);
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn normalize_spreads_to_unit_range() {
        let n = normalize_fts(&[2.0, 4.0, 3.0]);
        assert_eq!(n, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn normalize_equal_scores_are_all_one() {
        assert_eq!(normalize_fts(&[0.7, 0.7]), vec![1.0, 1.0]);
        assert_eq!(normalize_fts(&[3.0]), vec![1.0]);
        assert!(normalize_fts(&[]).is_empty());
    }

    #[test]
    fn recency_is_bounded_and_monotone() {
        let now = Utc::now();
        let fresh = recency_score(now, now, DEFAULT_RECENCY_DECAY_DAYS);
        assert!((fresh - 1.0).abs() < 1e-9);

        let mut last = fresh;
        for days in [1, 30, 365, 3650] {
            let r = recency_score(now - Duration::days(days), now, DEFAULT_RECENCY_DECAY_DAYS);
            assert!(r < last && r > 0.0);
            last = r;
        }
        let year = recency_score(now - Duration::days(365), now, DEFAULT_RECENCY_DECAY_DAYS);
        assert!((year - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn future_timestamps_clamp_to_fresh() {
        let now = Utc::now();
        assert_eq!(
            recency_score(now + Duration::days(3), now, DEFAULT_RECENCY_DECAY_DAYS),
            1.0
        );
    }

    #[test]
    fn graph_takes_max_and_defaults_to_zero() {
        assert_eq!(graph_score([0.2, 0.81, 0.5]), 0.81);
        assert_eq!(graph_score(std::iter::empty()), 0.0);
    }

    #[test]
    fn describe_mentions_strong_components() {
        let c = ScoreComponents {
            fts: 0.9,
            importance: 0.8,
            recency: 0.99,
            graph: 0.5,
        };
        assert_eq!(
            describe(&c),
            "high text relevance, high importance, recent, well-connected in graph"
        );
        assert_eq!(describe(&ScoreComponents::default()), "low text relevance");
    }
}
