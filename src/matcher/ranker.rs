use super::request::CapabilityRequest;
use super::scoring::{recency, score_key, ScoreBreakdown, SimilarityWeights};
use crate::compat::{CompatibilityEvaluator, CompatibilityLevel};
use crate::config::EngineConfig;
use crate::manifest::CapabilityManifest;
use crate::{Error, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// One scored, compatible candidate.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub manifest: Arc<CapabilityManifest>,
    pub score: f64,
    pub compatibility: CompatibilityLevel,
    pub accepted: bool,
    pub breakdown: ScoreBreakdown,
}

impl MatchResult {
    /// Deterministic ranking order: score, then newest version, then module id,
    /// then manifest id.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        score_key(other.score)
            .cmp(&score_key(self.score))
            .then_with(|| other.manifest.parsed_version().cmp(&self.manifest.parsed_version()))
            .then_with(|| self.manifest.module_id().cmp(other.manifest.module_id()))
            .then_with(|| self.manifest.id().cmp(&other.manifest.id()))
    }
}

/// A candidate removed before scoring because it is not compatible.
#[derive(Debug, Clone, Serialize)]
pub struct Exclusion {
    pub manifest: Arc<CapabilityManifest>,
    pub compatibility: CompatibilityLevel,
    pub reason: String,
}

/// Everything the matcher learned about one request.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub capability: String,
    pub threshold: f64,
    /// Compatible candidates, best first.
    pub results: Vec<MatchResult>,
    pub excluded: Vec<Exclusion>,
}

impl MatchOutcome {
    pub fn accepted(&self) -> impl Iterator<Item = &MatchResult> {
        self.results.iter().filter(|r| r.accepted)
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted().count()
    }

    pub fn best(&self) -> Option<&MatchResult> {
        self.accepted().next()
    }

    /// More than one accepted candidate: conflict resolution is needed.
    pub fn is_ambiguous(&self) -> bool {
        self.accepted_count() > 1
    }
}

/// Scores and ranks candidate manifests for a request.
#[derive(Debug, Clone)]
pub struct CapabilityMatcher {
    evaluator: CompatibilityEvaluator,
    weights: SimilarityWeights,
    threshold: f64,
    type_mismatch_cap: f64,
}

impl Default for CapabilityMatcher {
    fn default() -> Self {
        Self::new(SimilarityWeights::default(), 0.7)
    }
}

impl CapabilityMatcher {
    pub fn new(weights: SimilarityWeights, threshold: f64) -> Self {
        Self {
            evaluator: CompatibilityEvaluator::new(),
            weights,
            threshold,
            type_mismatch_cap: 0.05,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.weights, config.similarity_threshold)
            .with_type_mismatch_cap(config.type_mismatch_cap)
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_type_mismatch_cap(mut self, cap: f64) -> Self {
        self.type_mismatch_cap = cap;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn weights(&self) -> &SimilarityWeights {
        &self.weights
    }

    /// Score every candidate for `request`. Never fails; an empty accepted
    /// set is reported by [`match_request`](Self::match_request).
    pub fn rank(
        &self,
        request: &CapabilityRequest,
        candidates: impl IntoIterator<Item = Arc<CapabilityManifest>>,
    ) -> MatchOutcome {
        let mut seen = HashSet::new();
        let mut compatible = Vec::new();
        let mut excluded = Vec::new();

        for manifest in candidates {
            if manifest.name() != request.name || !seen.insert(manifest.id()) {
                continue;
            }
            let assessment = self.evaluator.assess(
                &manifest,
                &request.version_requirement,
                &request.required_schema,
            );
            if assessment.is_compatible() {
                compatible.push((manifest, assessment));
            } else {
                tracing::debug!(
                    capability = request.name.as_str(),
                    manifest_id = %manifest.id(),
                    level = %assessment.level,
                    "candidate excluded"
                );
                excluded.push(Exclusion {
                    manifest,
                    compatibility: assessment.level,
                    reason: assessment.reason.unwrap_or_default(),
                });
            }
        }

        let pool: Vec<_> = compatible
            .iter()
            .filter_map(|(m, _)| m.parsed_version())
            .collect();

        let mut results: Vec<MatchResult> = compatible
            .into_iter()
            .map(|(manifest, assessment)| {
                let type_match = match request.capability_type {
                    Some(t) if t != manifest.capability_type() => 0.0,
                    _ => 1.0,
                };
                let breakdown = ScoreBreakdown {
                    type_match,
                    schema_overlap: assessment.diff.overlap(),
                    recency: recency(manifest.parsed_version().as_ref(), &pool),
                };
                let score = breakdown.combine(&self.weights, self.type_mismatch_cap);
                MatchResult {
                    accepted: score >= self.threshold,
                    manifest,
                    score,
                    compatibility: assessment.level,
                    breakdown,
                }
            })
            .collect();

        results.sort_by(MatchResult::rank_cmp);
        excluded.sort_by(|a, b| a.manifest.id().cmp(&b.manifest.id()));

        MatchOutcome {
            capability: request.name.clone(),
            threshold: self.threshold,
            results,
            excluded,
        }
    }

    /// Rank and require at least one accepted candidate.
    pub fn match_request(
        &self,
        request: &CapabilityRequest,
        candidates: impl IntoIterator<Item = Arc<CapabilityManifest>>,
    ) -> Result<MatchOutcome> {
        let outcome = self.rank(request, candidates);

        if outcome.results.is_empty() && !outcome.excluded.is_empty() {
            let reason = outcome
                .excluded
                .iter()
                .map(|e| format!("{}: {}", e.manifest.label(), e.reason))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Compatibility {
                capability: request.name.clone(),
                requirement: request.version_requirement.to_string(),
                reason,
            });
        }

        if outcome.best().is_none() {
            return Err(Error::NoMatchFound {
                capability: request.name.clone(),
                best_score: outcome.results.first().map(|r| r.score).unwrap_or(0.0),
                threshold: self.threshold,
            });
        }

        tracing::debug!(
            capability = request.name.as_str(),
            accepted = outcome.accepted_count(),
            excluded = outcome.excluded.len(),
            "candidates ranked"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{CapabilityType, IOSchema};

    fn manifest(module: &str, version: &str, ty: CapabilityType) -> Arc<CapabilityManifest> {
        Arc::new(
            CapabilityManifest::builder(module, "ocr.extract", ty)
                .version(version)
                .input("image", IOSchema::json_type("string").unwrap())
                .output("text", IOSchema::json_type("string").unwrap())
                .description("ocr")
                .build()
                .unwrap(),
        )
    }

    fn request() -> CapabilityRequest {
        CapabilityRequest::new("ocr.extract")
            .with_type(CapabilityType::DataProcessing)
            .with_version("^1.0.0")
            .unwrap()
            .with_output("text", IOSchema::json_type("string").unwrap())
    }

    #[test]
    fn test_newest_compatible_ranks_first() {
        let a = manifest("vision-a", "1.0.0", CapabilityType::DataProcessing);
        let b = manifest("vision-b", "1.3.0", CapabilityType::DataProcessing);
        let outcome = CapabilityMatcher::default().rank(&request(), vec![a, b.clone()]);
        assert_eq!(outcome.results[0].manifest.id(), b.id());
        assert!(outcome.results.iter().all(|r| r.accepted));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let a = manifest("vision", "1.0.0", CapabilityType::Storage);
        let err = CapabilityMatcher::default()
            .match_request(&request(), vec![a])
            .unwrap_err();
        match err {
            Error::NoMatchFound { best_score, .. } => assert!(best_score <= 0.05),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_all_excluded_is_compatibility_error() {
        let a = manifest("vision", "2.0.0", CapabilityType::DataProcessing);
        let err = CapabilityMatcher::default()
            .match_request(&request(), vec![a])
            .unwrap_err();
        assert!(matches!(err, Error::Compatibility { .. }));
    }

    #[test]
    fn test_no_candidates_is_no_match() {
        let err = CapabilityMatcher::default()
            .match_request(&request(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchFound { .. }));
    }

    #[test]
    fn test_duplicate_ids_counted_once() {
        let a = manifest("vision", "1.0.0", CapabilityType::DataProcessing);
        let outcome = CapabilityMatcher::default().rank(&request(), vec![a.clone(), a]);
        assert_eq!(outcome.results.len(), 1);
    }
}
