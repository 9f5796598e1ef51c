//! Structural and semantic manifest validation.
//!
//! Validation is pure: it never consults the registry and never mutates the
//! manifest. Findings carry a severity: structural errors always fail, version
//! and schema violations fail only under [`ValidationStrictness::Strict`], and
//! warnings are logged.

use super::schema::Contract;
use super::types::CapabilityManifest;
use super::version::parse_version;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static CAPABILITY_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Logged, never fails.
    Warning,
    /// Version or schema violation; fails only under strict validation.
    Violation,
    /// Structural defect; always fails.
    Error,
}

/// Whether version and schema violations fail fast or are only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStrictness {
    #[default]
    Strict,
    Lenient,
}

/// One violated validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub field_path: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationViolation {
    pub fn new(
        rule: impl Into<String>,
        field_path: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            rule: rule.into(),
            field_path: field_path.into(),
            message: message.into(),
            severity,
        }
    }
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.rule, self.field_path, self.message)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManifestValidator {
    strictness: ValidationStrictness,
}

impl ManifestValidator {
    pub fn new(strictness: ValidationStrictness) -> Self {
        Self { strictness }
    }

    pub fn strict() -> Self {
        Self::new(ValidationStrictness::Strict)
    }

    pub fn lenient() -> Self {
        Self::new(ValidationStrictness::Lenient)
    }

    pub fn strictness(&self) -> ValidationStrictness {
        self.strictness
    }

    /// Validate a manifest, returning the violations that fail under the
    /// configured strictness. Non-failing findings are logged.
    pub fn validate(
        &self,
        manifest: &CapabilityManifest,
    ) -> std::result::Result<(), Vec<ValidationViolation>> {
        let (fatal, tolerated): (Vec<_>, Vec<_>) = self
            .inspect(manifest)
            .into_iter()
            .partition(|v| self.is_fatal(v));

        for v in &tolerated {
            tracing::warn!(
                manifest_id = %manifest.id(),
                rule = v.rule.as_str(),
                field = v.field_path.as_str(),
                "manifest admitted with warning: {}",
                v.message
            );
        }

        if fatal.is_empty() {
            Ok(())
        } else {
            Err(fatal)
        }
    }

    /// Same as [`validate`](Self::validate) but wrapped into the crate error.
    pub fn check(&self, manifest: &CapabilityManifest) -> Result<()> {
        self.validate(manifest).map_err(|violations| Error::Validation {
            manifest_id: Some(manifest.id().to_string()),
            violations,
        })
    }

    fn is_fatal(&self, violation: &ValidationViolation) -> bool {
        match violation.severity {
            Severity::Error => true,
            Severity::Violation => self.strictness == ValidationStrictness::Strict,
            Severity::Warning => false,
        }
    }

    /// Every finding regardless of strictness.
    pub fn inspect(&self, manifest: &CapabilityManifest) -> Vec<ValidationViolation> {
        let mut out = Vec::new();

        if manifest.module_id().trim().is_empty() {
            out.push(ValidationViolation::new(
                "non_empty_module_id",
                "module_id",
                "module id must not be empty",
                Severity::Error,
            ));
        }

        if let Err(e) = parse_version(manifest.module_version()) {
            out.push(ValidationViolation::new(
                "semver",
                "module_version",
                format!("'{}' is not a MAJOR.MINOR.PATCH version: {}", manifest.module_version(), e),
                Severity::Violation,
            ));
        }

        if let Err(e) = parse_version(manifest.version()) {
            out.push(ValidationViolation::new(
                "semver",
                "version",
                format!("'{}' is not a MAJOR.MINOR.PATCH version: {}", manifest.version(), e),
                Severity::Violation,
            ));
        }

        let name = manifest.name().trim();
        if name.is_empty() {
            out.push(ValidationViolation::new(
                "non_empty_name",
                "name",
                "capability name must not be empty",
                Severity::Error,
            ));
        } else if let Some(re) = CAPABILITY_NAME.as_ref() {
            if !re.is_match(manifest.name()) {
                out.push(ValidationViolation::new(
                    "name_format",
                    "name",
                    format!("'{}' is not a dotted identifier", manifest.name()),
                    Severity::Warning,
                ));
            }
        }

        Self::inspect_io("inputs", manifest.inputs().iter(), &mut out);
        Self::inspect_io("outputs", manifest.outputs().iter(), &mut out);

        for (i, dep) in manifest.dependencies().iter().enumerate() {
            let path = format!("dependencies[{}]", i);
            if dep.name.trim().is_empty() {
                out.push(ValidationViolation::new(
                    "dependency_name",
                    format!("{}.name", path),
                    "dependency name must not be empty",
                    Severity::Error,
                ));
            } else if dep.name == manifest.name() {
                out.push(ValidationViolation::new(
                    "self_dependency",
                    format!("{}.name", path),
                    "a capability cannot depend on itself",
                    Severity::Error,
                ));
            }
            if let Err(e) = dep.requirement() {
                out.push(ValidationViolation::new(
                    "version_requirement",
                    format!("{}.version", path),
                    format!("'{}' is not a valid requirement: {}", dep.version, e),
                    Severity::Violation,
                ));
            }
        }

        out
    }

    fn inspect_io<'a>(
        section: &str,
        entries: impl Iterator<Item = (&'a String, &'a super::schema::IOSchema)>,
        out: &mut Vec<ValidationViolation>,
    ) {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for (name, schema) in entries {
            let path = format!("{}.{}", section, name);
            if name.trim().is_empty() {
                out.push(ValidationViolation::new(
                    "non_empty_io_name",
                    path.clone(),
                    "input/output names must not be blank",
                    Severity::Error,
                ));
            }
            let folded = name.trim().to_lowercase();
            if let Some(previous) = seen.insert(folded, name.as_str()) {
                out.push(ValidationViolation::new(
                    "duplicate_io_name",
                    path.clone(),
                    format!("'{}' collides with '{}'", name, previous),
                    Severity::Error,
                ));
            }
            if let Err(e) = schema.revalidate() {
                out.push(ValidationViolation::new(
                    "schema_payload",
                    path,
                    e.to_string(),
                    Severity::Violation,
                ));
            }
        }
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::strict()
    }
}
