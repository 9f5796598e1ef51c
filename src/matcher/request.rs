use crate::conflict::ConflictStrategy;
use crate::manifest::{
    CapabilityType, DependencyRef, IOSchema, SchemaSet, Severity, ValidationViolation,
    VersionRequirement,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A request for one capability: what it is called, what version range is
/// acceptable and which contract the caller relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_type: Option<CapabilityType>,
    #[serde(default)]
    pub required_schema: SchemaSet,
    #[serde(default)]
    pub version_requirement: VersionRequirement,
    /// Conflict strategy tried before the configured chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ConflictStrategy>,
}

impl CapabilityRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, capability_type: CapabilityType) -> Self {
        self.capability_type = Some(capability_type);
        self
    }

    pub fn with_requirement(mut self, requirement: VersionRequirement) -> Self {
        self.version_requirement = requirement;
        self
    }

    /// Parse and set the version requirement.
    pub fn with_version(self, requirement: &str) -> Result<Self> {
        let parsed = VersionRequirement::parse(requirement).map_err(|e| Error::Validation {
            manifest_id: None,
            violations: vec![ValidationViolation::new(
                "version_requirement",
                "version_requirement",
                format!("'{}' is not a valid requirement: {}", requirement, e),
                Severity::Error,
            )],
        })?;
        Ok(self.with_requirement(parsed))
    }

    pub fn with_input(mut self, name: impl Into<String>, schema: IOSchema) -> Self {
        self.required_schema.inputs.insert(name.into(), schema);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, schema: IOSchema) -> Self {
        self.required_schema.outputs.insert(name.into(), schema);
        self
    }

    pub fn with_schema(mut self, schema: SchemaSet) -> Self {
        self.required_schema = schema;
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Request derived from a manifest dependency. Dependencies constrain
    /// name, version and type only.
    pub fn from_dependency(dependency: &DependencyRef) -> Result<Self> {
        let mut request = Self::new(dependency.name.clone()).with_version(&dependency.version)?;
        request.capability_type = dependency.capability_type;
        Ok(request)
    }
}
