mod common;

use capability_mesh::conflict::{ConflictResolver, ConflictStrategy, PriorityStrategy, Resolution};
use capability_mesh::manifest::{CapabilityManifest, CapabilityType, Contract, DependencyRef};
use capability_mesh::matcher::{CapabilityMatcher, CapabilityRequest, MatchResult};
use capability_mesh::Error;
use common::{manifest, permutations, shared, text, ty};
use std::collections::BTreeMap;

fn accepted(request: &CapabilityRequest, manifests: Vec<CapabilityManifest>) -> Vec<MatchResult> {
    CapabilityMatcher::default()
        .with_threshold(0.0)
        .rank(request, shared(manifests))
        .accepted()
        .cloned()
        .collect()
}

fn stage(module: &str, input: &str, output: &str) -> CapabilityManifest {
    CapabilityManifest::builder(module, "text.clean", CapabilityType::Transformation)
        .version("1.0.0")
        .input(input, text())
        .output(output, text())
        .description(format!("{input} -> {output}"))
        .build()
        .unwrap()
}

#[test]
fn test_record_is_stable_across_runs_and_permutations() {
    let request = CapabilityRequest::new("ocr.extract");
    let candidates = accepted(
        &request,
        vec![
            manifest("zeta", "ocr.extract", "1.1.0"),
            manifest("alpha", "ocr.extract", "1.1.0"),
            manifest("beta", "ocr.extract", "1.0.0"),
            manifest("gamma", "ocr.extract", "0.4.0"),
        ],
    );
    let resolver = ConflictResolver::default();
    let strategies = [ConflictStrategy::Override];

    let baseline = serde_json::to_value(resolver.resolve("ocr.extract", &candidates, &strategies)).unwrap();
    for order in permutations(&candidates) {
        for _ in 0..2 {
            let record = resolver.resolve("ocr.extract", &order, &strategies);
            assert_eq!(serde_json::to_value(&record).unwrap(), baseline);
        }
    }

    let record = resolver.resolve("ocr.extract", &candidates, &strategies);
    match record.resolution {
        Resolution::Selected { winner } => assert_eq!(winner.manifest.module_id(), "alpha"),
        other => panic!("expected a winner, got {other:?}"),
    }
}

#[test]
fn test_declared_priority_overrides_version() {
    let request = CapabilityRequest::new("ocr.extract");
    let candidates = accepted(
        &request,
        vec![
            manifest("fast", "ocr.extract", "2.0.0"),
            manifest("trusted", "ocr.extract", "1.0.0"),
        ],
    );
    let resolver = ConflictResolver::default()
        .with_priority_strategy(PriorityStrategy::DeclaredPriority)
        .with_module_priorities(BTreeMap::from([("trusted".to_string(), 10)]));
    let record = resolver.resolve_request(&request, &candidates).unwrap();
    match record.resolution {
        Resolution::Selected { winner } => assert_eq!(winner.manifest.module_id(), "trusted"),
        other => panic!("expected a winner, got {other:?}"),
    }
}

#[test]
fn test_manual_order_without_listed_module_falls_through_chain() {
    let request = CapabilityRequest::new("ocr.extract");
    let candidates = accepted(
        &request,
        vec![
            manifest("a", "ocr.extract", "1.0.0"),
            manifest("b", "ocr.extract", "1.1.0"),
        ],
    );
    let resolver = ConflictResolver::new(vec![ConflictStrategy::Override, ConflictStrategy::Merge])
        .with_priority_strategy(PriorityStrategy::Manual)
        .with_manual_order(vec!["unknown".to_string()]);

    let record = resolver.resolve_request(&request, &candidates).unwrap();
    assert_eq!(record.strategy, Some(ConflictStrategy::Merge));
    assert_eq!(record.attempted(), vec!["override", "merge"]);
    assert!(!record.attempts[0].succeeded);
}

#[test]
fn test_merge_unions_identically_typed_fields() {
    let request = CapabilityRequest::new("geo.lookup");
    let a = CapabilityManifest::builder("maps", "geo.lookup", CapabilityType::ApiIntegration)
        .version("1.0.0")
        .input("address", text())
        .output("lat", ty("number"))
        .description("geocoder")
        .build()
        .unwrap();
    let b = CapabilityManifest::builder("places", "geo.lookup", CapabilityType::ApiIntegration)
        .version("1.2.0")
        .input("address", text())
        .output("timezone", text())
        .description("place details")
        .build()
        .unwrap();
    let candidates = accepted(&request, vec![a, b]);

    let resolver = ConflictResolver::new(vec![ConflictStrategy::Merge]);
    let first = resolver.resolve_request(&request, &candidates).unwrap();
    let Resolution::Merged { manifest, members } = &first.resolution else {
        panic!("expected a merge, got {:?}", first.resolution);
    };
    assert_eq!(members.len(), 2);
    assert_eq!(manifest.version(), "1.2.0");
    assert!(manifest.outputs().contains_key("lat"));
    assert!(manifest.outputs().contains_key("timezone"));
    assert_eq!(manifest.inputs().len(), 1);

    // Same members, same synthetic id.
    let reversed: Vec<_> = candidates.iter().rev().cloned().collect();
    let second = resolver.resolve_request(&request, &reversed).unwrap();
    let Resolution::Merged { manifest: again, .. } = &second.resolution else {
        panic!("expected a merge");
    };
    assert_eq!(manifest.id(), again.id());
}

#[test]
fn test_merge_rejects_type_clash() {
    let request = CapabilityRequest::new("geo.lookup");
    let a = CapabilityManifest::builder("maps", "geo.lookup", CapabilityType::ApiIntegration)
        .version("1.0.0")
        .output("lat", ty("number"))
        .description("geocoder")
        .build()
        .unwrap();
    let b = CapabilityManifest::builder("places", "geo.lookup", CapabilityType::ApiIntegration)
        .version("1.0.0")
        .output("lat", text())
        .description("stringly geocoder")
        .build()
        .unwrap();
    let candidates = accepted(&request, vec![a, b]);

    let err = ConflictResolver::new(vec![ConflictStrategy::Merge])
        .resolve_request(&request, &candidates)
        .unwrap_err();
    match err {
        Error::ConflictUnresolved { capability, attempted } => {
            assert_eq!(capability, "geo.lookup");
            assert_eq!(attempted, vec!["merge"]);
        }
        other => panic!("expected ConflictUnresolved, got {other:?}"),
    }
}

fn geocoder(module: &str, dependency: DependencyRef) -> CapabilityManifest {
    CapabilityManifest::builder(module, "geo.lookup", CapabilityType::ApiIntegration)
        .version("1.0.0")
        .output("lat", ty("number"))
        .dependency(dependency)
        .description(format!("{module} geocoder"))
        .build()
        .unwrap()
}

#[test]
fn test_merge_rejects_conflicting_dependency_requirements() {
    let request = CapabilityRequest::new("geo.lookup");
    let candidates = accepted(
        &request,
        vec![
            geocoder("alpha", DependencyRef::new("tiles.fetch", "^1.0.0")),
            geocoder("beta", DependencyRef::new("tiles.fetch", "^2.0.0")),
        ],
    );

    let record = ConflictResolver::new(vec![ConflictStrategy::Merge, ConflictStrategy::Override])
        .resolve_request(&request, &candidates)
        .unwrap();
    assert_eq!(record.attempted(), vec!["merge", "override"]);
    assert!(!record.attempts[0].succeeded);
    let reason = record.attempts[0].reason.clone().unwrap_or_default();
    assert!(reason.contains("tiles.fetch"), "reason: {reason}");
    assert_eq!(record.strategy, Some(ConflictStrategy::Override));
}

#[test]
fn test_merge_rejects_optional_mismatch() {
    let request = CapabilityRequest::new("geo.lookup");
    let candidates = accepted(
        &request,
        vec![
            geocoder("alpha", DependencyRef::new("tiles.fetch", "^1.0.0")),
            geocoder("beta", DependencyRef::new("tiles.fetch", "^1.0.0").optional()),
        ],
    );
    let err = ConflictResolver::new(vec![ConflictStrategy::Merge])
        .resolve_request(&request, &candidates)
        .unwrap_err();
    assert!(matches!(err, Error::ConflictUnresolved { .. }));
}

#[test]
fn test_merge_keeps_one_copy_of_identical_dependencies() {
    let request = CapabilityRequest::new("geo.lookup");
    let candidates = accepted(
        &request,
        vec![
            geocoder("alpha", DependencyRef::new("tiles.fetch", "^1.0.0")),
            geocoder("beta", DependencyRef::new("tiles.fetch", "^1.0.0")),
        ],
    );
    let record = ConflictResolver::new(vec![ConflictStrategy::Merge])
        .resolve_request(&request, &candidates)
        .unwrap();
    let Resolution::Merged { manifest, .. } = &record.resolution else {
        panic!("expected a merge, got {:?}", record.resolution);
    };
    assert_eq!(manifest.dependencies(), &[DependencyRef::new("tiles.fetch", "^1.0.0")]);
}

#[test]
fn test_compose_finds_chaining_order() {
    let request = CapabilityRequest::new("text.clean");
    let candidates = accepted(
        &request,
        vec![
            stage("normalize", "stripped", "normalized"),
            stage("strip", "raw", "stripped"),
        ],
    );

    let record = ConflictResolver::new(vec![ConflictStrategy::Compose])
        .resolve_request(&request, &candidates)
        .unwrap();
    let Resolution::Composed { pipeline } = record.resolution else {
        panic!("expected a pipeline");
    };
    let modules: Vec<&str> = pipeline.iter().map(|r| r.manifest.module_id()).collect();
    assert_eq!(modules, vec!["strip", "normalize"]);
}

#[test]
fn test_request_strategy_is_tried_first() {
    let request = CapabilityRequest::new("text.clean").with_strategy(ConflictStrategy::Compose);
    let candidates = accepted(
        &request,
        vec![
            stage("normalize", "stripped", "normalized"),
            stage("strip", "raw", "stripped"),
        ],
    );
    let record = ConflictResolver::default()
        .resolve_request(&request, &candidates)
        .unwrap();
    assert_eq!(record.strategy, Some(ConflictStrategy::Compose));
}
