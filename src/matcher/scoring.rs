//! Deterministic weighted similarity.

use semver::Version;
use serde::{Deserialize, Serialize};

/// Relative weights of the similarity signals. Normalized by their sum when
/// scoring, so only the ratios matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    #[serde(default = "default_type_weight")]
    pub type_match: f64,
    #[serde(default = "default_schema_weight")]
    pub schema_overlap: f64,
    #[serde(default = "default_recency_weight")]
    pub recency: f64,
}

fn default_type_weight() -> f64 {
    0.5
}

fn default_schema_weight() -> f64 {
    0.4
}

fn default_recency_weight() -> f64 {
    0.1
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            type_match: default_type_weight(),
            schema_overlap: default_schema_weight(),
            recency: default_recency_weight(),
        }
    }
}

impl SimilarityWeights {
    pub fn new(type_match: f64, schema_overlap: f64, recency: f64) -> Self {
        Self {
            type_match,
            schema_overlap,
            recency,
        }
    }

    pub fn sum(&self) -> f64 {
        self.type_match + self.schema_overlap + self.recency
    }

    /// Whether the weights can be normalized: all finite, none negative, not all zero.
    pub fn is_usable(&self) -> bool {
        let all = [self.type_match, self.schema_overlap, self.recency];
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && self.sum() > 0.0
    }

    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Self::default();
        }
        Self::new(
            self.type_match / sum,
            self.schema_overlap / sum,
            self.recency / sum,
        )
    }
}

/// Per-signal values, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreBreakdown {
    pub type_match: f64,
    pub schema_overlap: f64,
    pub recency: f64,
}

impl ScoreBreakdown {
    /// Weighted score. A type mismatch caps the result at `type_mismatch_cap`.
    pub fn combine(&self, weights: &SimilarityWeights, type_mismatch_cap: f64) -> f64 {
        let w = weights.normalized();
        let raw = w.type_match * self.type_match
            + w.schema_overlap * self.schema_overlap
            + w.recency * self.recency;
        let score = raw.clamp(0.0, 1.0);
        if self.type_match < 1.0 {
            score.min(type_mismatch_cap)
        } else {
            score
        }
    }
}

/// Recency of `version` among the distinct versions in `pool`: newest 1.0,
/// oldest 0.0, linear in between. A pool with one version scores 1.0.
pub(crate) fn recency(version: Option<&Version>, pool: &[Version]) -> f64 {
    let Some(version) = version else {
        return 0.0;
    };
    let mut distinct: Vec<&Version> = pool.iter().collect();
    distinct.sort();
    distinct.dedup();
    if distinct.len() <= 1 {
        return 1.0;
    }
    match distinct.iter().position(|v| *v == version) {
        Some(rank) => rank as f64 / (distinct.len() - 1) as f64,
        None => 0.0,
    }
}

/// Score on a fixed grid, so tiny float noise never changes ordering.
pub(crate) fn score_key(score: f64) -> i64 {
    (score * 1e9).round() as i64
}
