mod common;

use capability_mesh::compat::{CompatibilityEvaluator, CompatibilityLevel, SchemaDiff};
use capability_mesh::manifest::{CapabilityManifest, CapabilityType, SchemaSet, VersionRequirement};
use common::{text, ty};

fn ocr(version: &str, with_text: bool) -> CapabilityManifest {
    let mut builder = CapabilityManifest::builder("ocr-service", "ocr.extract", CapabilityType::DataProcessing)
        .version(version)
        .input("image", text())
        .output("pages", ty("integer"))
        .description("extract text from scans");
    if with_text {
        builder = builder.output("text", text());
    }
    builder.build().unwrap()
}

#[test]
fn test_identical_contracts_evaluate_identically() {
    let evaluator = CompatibilityEvaluator::new();
    let requirement = VersionRequirement::parse("^1.0.0").unwrap();
    let required = SchemaSet::new().input("image", text()).output("text", text());

    // Different modules, same contract and version.
    let a = CapabilityManifest::builder("vendor-a", "ocr.extract", CapabilityType::DataProcessing)
        .version("1.4.0")
        .input("image", text())
        .output("text", text())
        .description("a")
        .build()
        .unwrap();
    let b = CapabilityManifest::builder("vendor-b", "ocr.extract", CapabilityType::Compute)
        .version("1.4.0")
        .input("image", text())
        .output("text", text())
        .description("b")
        .build()
        .unwrap();

    let level_a = evaluator.evaluate(&a, &requirement, &required);
    let level_b = evaluator.evaluate(&b, &requirement, &required);
    assert!(level_a.is_compatible());
    assert_eq!(level_a, level_b);
    // Repeated evaluation never changes the answer.
    assert_eq!(evaluator.assess(&a, &requirement, &required), evaluator.assess(&a, &requirement, &required));
}

#[test]
fn test_removed_required_input_is_major_for_any_bump() {
    let evaluator = CompatibilityEvaluator::new();
    let old = CapabilityManifest::builder("search", "doc.search", CapabilityType::DataProcessing)
        .version("1.0.0")
        .input("query", text())
        .input("limit", ty("integer"))
        .output("hits", ty("array"))
        .description("search documents")
        .build()
        .unwrap();

    for bumped in ["1.0.1", "1.1.0", "2.0.0"] {
        let new = CapabilityManifest::builder("search", "doc.search", CapabilityType::DataProcessing)
            .version(bumped)
            .input("query", text())
            .output("hits", ty("array"))
            .description("search documents")
            .build()
            .unwrap();

        assert_eq!(
            SchemaDiff::between(&old, &new).level(),
            CompatibilityLevel::MajorIncompatible,
            "bump to {bumped}"
        );
        let level = evaluator.evaluate(&new, &VersionRequirement::Any, &SchemaSet::from_contract(&old));
        assert_eq!(level, CompatibilityLevel::MajorIncompatible, "bump to {bumped}");
    }
}

#[test]
fn test_ocr_major_release_without_text_is_incompatible() {
    let evaluator = CompatibilityEvaluator::new();
    let requirement = VersionRequirement::parse("^1.0.0").unwrap();
    let required = SchemaSet::new().output("text", text());

    let current = ocr("1.2.0", true);
    let next = ocr("2.0.0", false);

    assert!(evaluator.evaluate(&current, &requirement, &required).is_compatible());

    let assessment = evaluator.assess(&next, &requirement, &required);
    assert_eq!(assessment.level, CompatibilityLevel::MajorIncompatible);
    assert_eq!(assessment.structural, CompatibilityLevel::MajorIncompatible);
    assert!(assessment.reason.is_some());
}

#[test]
fn test_version_outside_range_same_major_is_none() {
    let evaluator = CompatibilityEvaluator::new();
    let requirement = VersionRequirement::parse("^1.3.0").unwrap();
    let level = evaluator.evaluate(&ocr("1.2.0", true), &requirement, &SchemaSet::new());
    assert_eq!(level, CompatibilityLevel::None);
    assert!(!level.is_compatible());
}

#[test]
fn test_level_ordering() {
    use CompatibilityLevel::*;
    assert_eq!(Patch.stricter(Minor), Minor);
    assert_eq!(Minor.stricter(None), None);
    assert_eq!(None.stricter(MajorIncompatible), MajorIncompatible);
    assert_eq!(MajorIncompatible.stricter(Patch), MajorIncompatible);
}
