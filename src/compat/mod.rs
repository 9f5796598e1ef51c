//! 兼容性评估模块：语义版本与结构契约的兼容等级判定。
//!
//! # Compatibility Module
//!
//! Classifies a candidate manifest against a version requirement and a
//! required schema. Two signals are combined and the stricter one wins:
//!
//! - the level declared by the candidate's version relative to the
//!   requirement's anchor
//! - the level derived from a structural [`SchemaDiff`]
//!
//! Severity order is `patch < minor < none < major_incompatible`. Candidates
//! at `none` or `major_incompatible` are excluded from matching.
//!
//! Evaluation is a pure function of its inputs.

mod diff;

pub use diff::{ChangeKind, Direction, SchemaChange, SchemaDiff};

use crate::manifest::{CapabilityManifest, SchemaSet, VersionRequirement};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityLevel {
    /// Requirement not satisfied.
    None,
    Patch,
    Minor,
    MajorIncompatible,
}

impl CompatibilityLevel {
    fn severity(&self) -> u8 {
        match self {
            CompatibilityLevel::Patch => 0,
            CompatibilityLevel::Minor => 1,
            CompatibilityLevel::None => 2,
            CompatibilityLevel::MajorIncompatible => 3,
        }
    }

    pub fn stricter(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn is_compatible(&self) -> bool {
        matches!(self, CompatibilityLevel::Patch | CompatibilityLevel::Minor)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityLevel::None => "none",
            CompatibilityLevel::Patch => "patch",
            CompatibilityLevel::Minor => "minor",
            CompatibilityLevel::MajorIncompatible => "major_incompatible",
        }
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full evaluation result: the final level plus how it was reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityAssessment {
    pub level: CompatibilityLevel,
    pub declared: CompatibilityLevel,
    pub structural: CompatibilityLevel,
    pub diff: SchemaDiff,
    /// Why the candidate is excluded, when it is.
    pub reason: Option<String>,
}

impl CompatibilityAssessment {
    pub fn is_compatible(&self) -> bool {
        self.level.is_compatible()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompatibilityEvaluator;

impl CompatibilityEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        candidate: &CapabilityManifest,
        requirement: &VersionRequirement,
        required_schema: &SchemaSet,
    ) -> CompatibilityLevel {
        self.assess(candidate, requirement, required_schema).level
    }

    pub fn assess(
        &self,
        candidate: &CapabilityManifest,
        requirement: &VersionRequirement,
        required_schema: &SchemaSet,
    ) -> CompatibilityAssessment {
        let declared = match candidate.parsed_version() {
            Some(version) => Self::declared_level(&version, requirement),
            None => CompatibilityLevel::None,
        };
        let diff = SchemaDiff::for_request(required_schema, candidate);
        let structural = diff.level();
        let level = declared.stricter(structural);

        let reason = if level.is_compatible() {
            None
        } else if !declared.is_compatible() {
            Some(match candidate.parsed_version() {
                Some(_) => format!(
                    "version {} does not satisfy {} ({})",
                    candidate.version(),
                    requirement,
                    declared
                ),
                None => format!("version '{}' is not valid semver", candidate.version()),
            })
        } else {
            let breaking: Vec<String> = diff.breaking_changes().map(|c| c.to_string()).collect();
            Some(format!("breaking schema changes: {}", breaking.join("; ")))
        };

        CompatibilityAssessment {
            level,
            declared,
            structural,
            diff,
            reason,
        }
    }

    /// Level implied by the candidate version alone.
    pub fn declared_level(version: &Version, requirement: &VersionRequirement) -> CompatibilityLevel {
        let Some(anchor) = requirement.anchor() else {
            return CompatibilityLevel::Patch;
        };
        if !requirement.matches(version) {
            return if version.major != anchor.major {
                CompatibilityLevel::MajorIncompatible
            } else {
                CompatibilityLevel::None
            };
        }
        if version.major != anchor.major || version.minor != anchor.minor {
            CompatibilityLevel::Minor
        } else {
            CompatibilityLevel::Patch
        }
    }
}
