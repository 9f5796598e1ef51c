mod common;

use capability_mesh::manifest::{CapabilityManifest, CapabilityType};
use capability_mesh::matcher::{CapabilityMatcher, CapabilityRequest, SimilarityWeights};
use capability_mesh::Error;
use common::{manifest, permutations, shared, text, ty};
use std::sync::Arc;

fn ids(outcome: &capability_mesh::matcher::MatchOutcome) -> Vec<uuid::Uuid> {
    outcome.results.iter().map(|r| r.manifest.id()).collect()
}

fn mixed_pool() -> Vec<Arc<CapabilityManifest>> {
    shared(vec![
        manifest("zeta", "ocr.extract", "1.0.0"),
        manifest("alpha", "ocr.extract", "1.0.0"),
        manifest("beta", "ocr.extract", "1.1.0"),
        manifest("gamma", "ocr.extract", "0.9.0"),
        CapabilityManifest::builder("delta", "ocr.extract", CapabilityType::Storage)
            .version("1.1.0")
            .output("text", text())
            .description("wrong type")
            .build()
            .unwrap(),
    ])
}

#[test]
fn test_ordering_is_independent_of_input_order() {
    common::init_tracing();
    let matcher = CapabilityMatcher::default();
    let request = CapabilityRequest::new("ocr.extract")
        .with_type(CapabilityType::DataProcessing)
        .with_output("text", text());

    let pool = mixed_pool();
    let expected = ids(&matcher.rank(&request, pool.clone()));
    assert_eq!(expected.len(), 5);

    for order in permutations(&pool) {
        assert_eq!(ids(&matcher.rank(&request, order)), expected);
    }

    // Equal scores and versions fall back to module id.
    let outcome = matcher.rank(&request, pool);
    let modules: Vec<&str> = outcome.results.iter().map(|r| r.manifest.module_id()).collect();
    let alpha = modules.iter().position(|m| *m == "alpha").unwrap();
    let zeta = modules.iter().position(|m| *m == "zeta").unwrap();
    assert!(alpha < zeta);
    assert_eq!(modules.last(), Some(&"delta"));
}

#[test]
fn test_raising_threshold_never_grows_accepted_set() {
    let request = CapabilityRequest::new("ocr.extract")
        .with_type(CapabilityType::DataProcessing)
        .with_output("text", text());
    let pool = mixed_pool();

    let mut previous = usize::MAX;
    for step in 0..=20 {
        let threshold = step as f64 / 20.0;
        let matcher = CapabilityMatcher::default().with_threshold(threshold);
        let accepted = matcher.rank(&request, pool.clone()).accepted_count();
        assert!(accepted <= previous, "threshold {threshold} accepted {accepted} > {previous}");
        previous = accepted;
    }
}

#[test]
fn test_ocr_scenario_accepts_only_compatible_release() {
    let v1 = manifest("ocr-service", "ocr.extract", "1.2.0");
    let v2 = CapabilityManifest::builder("ocr-service", "ocr.extract", CapabilityType::DataProcessing)
        .version("2.0.0")
        .output("blocks", ty("array"))
        .description("structured output only")
        .build()
        .unwrap();
    let v1_id = v1.id();

    let request = CapabilityRequest::new("ocr.extract")
        .with_type(CapabilityType::DataProcessing)
        .with_version("^1.0.0")
        .unwrap()
        .with_output("text", text());

    let outcome = CapabilityMatcher::default()
        .match_request(&request, shared(vec![v2, v1]))
        .unwrap();

    let accepted: Vec<_> = outcome.accepted().map(|r| r.manifest.id()).collect();
    assert_eq!(accepted, vec![v1_id]);
    assert_eq!(outcome.excluded.len(), 1);
    assert_eq!(
        outcome.excluded[0].compatibility,
        capability_mesh::CompatibilityLevel::MajorIncompatible
    );
}

#[test]
fn test_scores_below_threshold_report_no_match() {
    // Request names only optional fields so partial overlap stays compatible.
    let request = CapabilityRequest::new("doc.enrich")
        .with_type(CapabilityType::DataProcessing)
        .with_output("title", text().optional())
        .with_output("summary", text().optional())
        .with_output("keywords", ty("array").optional())
        .with_output("language", text().optional())
        .with_output("sentiment", ty("number").optional())
        .with_output("entities", ty("array").optional())
        .with_output("pages", ty("integer").optional())
        .with_output("author", text().optional());

    let newer = CapabilityManifest::builder("enricher", "doc.enrich", CapabilityType::DataProcessing)
        .version("1.1.0")
        .output("title", text().optional())
        .description("titles only")
        .build()
        .unwrap();
    let older = CapabilityManifest::builder("legacy", "doc.enrich", CapabilityType::DataProcessing)
        .version("1.0.0")
        .output("checksum", text().optional())
        .description("nothing requested")
        .build()
        .unwrap();

    let matcher = CapabilityMatcher::new(SimilarityWeights::default(), 0.7);
    let outcome = matcher.rank(&request, shared(vec![older.clone(), newer.clone()]));
    assert_eq!(outcome.results.len(), 2);
    assert!((outcome.results[0].score - 0.65).abs() < 1e-9);
    assert!((outcome.results[1].score - 0.50).abs() < 1e-9);
    assert_eq!(outcome.accepted_count(), 0);

    let err = matcher
        .match_request(&request, shared(vec![older, newer]))
        .unwrap_err();
    match err {
        Error::NoMatchFound {
            capability,
            best_score,
            threshold,
        } => {
            assert_eq!(capability, "doc.enrich");
            assert!((best_score - 0.65).abs() < 1e-9);
            assert_eq!(threshold, 0.7);
        }
        other => panic!("expected NoMatchFound, got {other:?}"),
    }
}

#[test]
fn test_every_candidate_excluded_is_a_compatibility_error() {
    let request = CapabilityRequest::new("ocr.extract").with_version("^3.0.0").unwrap();
    let err = CapabilityMatcher::default()
        .match_request(&request, mixed_pool())
        .unwrap_err();
    assert!(matches!(err, Error::Compatibility { .. }));
}

#[test]
fn test_no_candidates_is_no_match() {
    let request = CapabilityRequest::new("ocr.extract");
    let err = CapabilityMatcher::default()
        .match_request(&request, Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::NoMatchFound { .. }));
}
