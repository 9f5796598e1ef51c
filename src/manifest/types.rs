//! Capability manifest model.

use super::schema::{Contract, IOSchema};
use super::validator::{ManifestValidator, Severity, ValidationViolation};
use super::version::{parse_version, VersionRequirement};
use crate::{Error, Result};
use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Taxonomy of module capabilities used for semantic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    DataProcessing,
    ModelTraining,
    ApiIntegration,
    Storage,
    Compute,
    Monitoring,
    Validation,
    Transformation,
}

impl CapabilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataProcessing => "data_processing",
            Self::ModelTraining => "model_training",
            Self::ApiIntegration => "api_integration",
            Self::Storage => "storage",
            Self::Compute => "compute",
            Self::Monitoring => "monitoring",
            Self::Validation => "validation",
            Self::Transformation => "transformation",
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a capability another manifest depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyRef {
    pub name: String,
    /// Version requirement expression, kept verbatim so validation can report it.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_type: Option<CapabilityType>,
    /// Failure of an optional dependency degrades the plan instead of failing it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl<'de> Deserialize<'de> for DependencyRef {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Input {
            // Shorthand: "ocr.extract@^1.0.0" or "ocr.extract"
            Short(String),
            Full {
                name: String,
                #[serde(default = "default_requirement")]
                version: String,
                #[serde(default)]
                capability_type: Option<CapabilityType>,
                #[serde(default)]
                optional: bool,
            },
        }

        match Input::deserialize(deserializer)? {
            Input::Short(raw) => Ok(DependencyRef::parse_shorthand(&raw)),
            Input::Full {
                name,
                version,
                capability_type,
                optional,
            } => Ok(DependencyRef {
                name,
                version,
                capability_type,
                optional,
            }),
        }
    }
}

fn default_requirement() -> String {
    "*".to_string()
}

impl DependencyRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            capability_type: None,
            optional: false,
        }
    }

    /// Parse `name@requirement`; a bare name means any version.
    pub fn parse_shorthand(raw: &str) -> Self {
        match raw.split_once('@') {
            Some((name, req)) => Self::new(name.trim(), req.trim()),
            None => Self::new(raw.trim(), default_requirement()),
        }
    }

    pub fn with_type(mut self, capability_type: CapabilityType) -> Self {
        self.capability_type = Some(capability_type);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn requirement(&self) -> std::result::Result<VersionRequirement, semver::Error> {
        VersionRequirement::parse(&self.version)
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Immutable declaration of one module capability and its typed contract.
///
/// Manifests are never mutated after construction; a new capability version is
/// a new manifest with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    id: Uuid,
    module_id: String,
    module_version: String,
    name: String,
    capability_type: CapabilityType,
    version: String,
    #[serde(default)]
    inputs: IndexMap<String, IOSchema>,
    #[serde(default)]
    outputs: IndexMap<String, IOSchema>,
    #[serde(default)]
    dependencies: Vec<DependencyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl CapabilityManifest {
    pub fn builder(
        module_id: impl Into<String>,
        name: impl Into<String>,
        capability_type: CapabilityType,
    ) -> ManifestBuilder {
        ManifestBuilder::new(module_id, name, capability_type)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn module_version(&self) -> &str {
        &self.module_version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability_type(&self) -> CapabilityType {
        self.capability_type
    }

    /// Raw capability version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Capability version, if it parses under strict semver rules.
    pub fn parsed_version(&self) -> Option<Version> {
        parse_version(&self.version).ok()
    }

    pub fn dependencies(&self) -> &[DependencyRef] {
        &self.dependencies
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// `module_id/name@version`, used in logs and cycle paths.
    pub fn label(&self) -> String {
        format!("{}/{}@{}", self.module_id, self.name, self.version)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Contract for CapabilityManifest {
    fn inputs(&self) -> &IndexMap<String, IOSchema> {
        &self.inputs
    }

    fn outputs(&self) -> &IndexMap<String, IOSchema> {
        &self.outputs
    }
}

/// Builder for [`CapabilityManifest`]; `build` validates strictly.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    id: Option<Uuid>,
    module_id: String,
    module_version: String,
    name: String,
    capability_type: CapabilityType,
    version: String,
    inputs: IndexMap<String, IOSchema>,
    outputs: IndexMap<String, IOSchema>,
    dependencies: Vec<DependencyRef>,
    description: Option<String>,
    duplicates: Vec<ValidationViolation>,
}

impl ManifestBuilder {
    pub fn new(
        module_id: impl Into<String>,
        name: impl Into<String>,
        capability_type: CapabilityType,
    ) -> Self {
        Self {
            id: None,
            module_id: module_id.into(),
            module_version: "0.1.0".to_string(),
            name: name.into(),
            capability_type,
            version: "0.1.0".to_string(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            dependencies: Vec::new(),
            description: None,
            duplicates: Vec::new(),
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn module_version(mut self, version: impl Into<String>) -> Self {
        self.module_version = version.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn input(mut self, name: impl Into<String>, schema: IOSchema) -> Self {
        let name = name.into();
        if self.inputs.contains_key(&name) {
            self.duplicates.push(ValidationViolation::new(
                "duplicate_io_name",
                format!("inputs.{}", name),
                "input declared more than once",
                Severity::Error,
            ));
        }
        self.inputs.insert(name, schema);
        self
    }

    pub fn output(mut self, name: impl Into<String>, schema: IOSchema) -> Self {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            self.duplicates.push(ValidationViolation::new(
                "duplicate_io_name",
                format!("outputs.{}", name),
                "output declared more than once",
                Severity::Error,
            ));
        }
        self.outputs.insert(name, schema);
        self
    }

    pub fn dependency(mut self, dependency: DependencyRef) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Build without validating. Only the crate uses this, for synthetic
    /// composites assembled from already-admitted manifests.
    pub(crate) fn build_unchecked(self) -> CapabilityManifest {
        CapabilityManifest {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            module_id: self.module_id,
            module_version: self.module_version,
            name: self.name,
            capability_type: self.capability_type,
            version: self.version,
            inputs: self.inputs,
            outputs: self.outputs,
            dependencies: self.dependencies,
            description: self.description,
        }
    }

    pub fn build(self) -> Result<CapabilityManifest> {
        let mut violations = self.duplicates.clone();
        let manifest = self.build_unchecked();
        if let Err(found) = ManifestValidator::strict().validate(&manifest) {
            violations.extend(found);
        }
        if violations.is_empty() {
            Ok(manifest)
        } else {
            Err(Error::Validation {
                manifest_id: Some(manifest.id.to_string()),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text() -> IOSchema {
        IOSchema::json_type("string").unwrap()
    }

    #[test]
    fn test_builder_produces_frozen_manifest() {
        let m = CapabilityManifest::builder("ocr-service", "ocr.extract", CapabilityType::DataProcessing)
            .module_version("2.3.0")
            .version("1.2.0")
            .input("image", IOSchema::json_type("string").unwrap())
            .output("text", text())
            .dependency(DependencyRef::new("image.decode", "^1.0.0"))
            .description("Extract text from scanned pages")
            .build()
            .unwrap();

        assert_eq!(m.name(), "ocr.extract");
        assert_eq!(m.parsed_version(), Some(Version::new(1, 2, 0)));
        assert_eq!(m.inputs().len(), 1);
        assert_eq!(m.dependencies()[0].name, "image.decode");
        assert_eq!(m.label(), "ocr-service/ocr.extract@1.2.0");
    }

    #[test]
    fn test_builder_rejects_duplicate_outputs() {
        let err = CapabilityManifest::builder("m", "cap", CapabilityType::Compute)
            .version("1.0.0")
            .output("result", text())
            .output("result", text())
            .build()
            .unwrap_err();
        match err {
            Error::Validation { violations, .. } => {
                assert!(violations.iter().any(|v| v.rule == "duplicate_io_name"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_builder_rejects_bad_version() {
        let err = CapabilityManifest::builder("m", "cap", CapabilityType::Compute)
            .version("1.0")
            .build();
        assert!(matches!(err, Err(Error::Validation { .. })));
    }

    #[test]
    fn test_wire_format_fields() {
        let m = CapabilityManifest::builder("m", "cap", CapabilityType::Storage)
            .version("1.0.0")
            .description("blob store")
            .output("blob", IOSchema::json_type("string").unwrap())
            .build()
            .unwrap();
        let value = serde_json::to_value(&m).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for key in [
            "id",
            "module_id",
            "module_version",
            "name",
            "capability_type",
            "version",
            "inputs",
            "outputs",
            "dependencies",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(value["capability_type"], json!("storage"));
    }

    #[test]
    fn test_dependency_shorthand() {
        let deps: Vec<DependencyRef> = serde_json::from_value(json!([
            "image.decode@^1.2.0",
            "metrics.emit",
            { "name": "blob.put", "version": ">=2.0.0", "capability_type": "storage", "optional": true }
        ]))
        .unwrap();
        assert_eq!(deps[0].name, "image.decode");
        assert_eq!(deps[0].version, "^1.2.0");
        assert_eq!(deps[1].version, "*");
        assert!(deps[2].optional);
        assert_eq!(deps[2].capability_type, Some(CapabilityType::Storage));
        assert!(deps[0].requirement().is_ok());
    }

    #[test]
    fn test_yaml_manifest_rejects_invalid_payload() {
        let raw = r#"
id: 5f0c6a52-3c1b-4f7e-9a55-0d6b8f1e2a10
module_id: billing
module_version: 1.0.0
name: invoice.render
capability_type: transformation
version: 1.0.0
inputs:
  spec:
    schema_type: openapi
    schema_definition: {}
"#;
        assert!(CapabilityManifest::from_yaml(raw).is_err());
    }
}
