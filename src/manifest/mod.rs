//! 能力清单模块：类型化、带版本的能力契约及其校验。
//!
//! # Capability Manifest Module
//!
//! Manifests are the atomic unit of integration: one module, one capability,
//! one typed and versioned contract. They are frozen once built and validated
//! before they are ever admitted to matching.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CapabilityManifest`] | Immutable capability declaration |
//! | [`ManifestBuilder`] | Builder that validates on `build` |
//! | [`IOSchema`] | Input/output schema checked against its kind's meta-schema |
//! | [`SchemaSet`] | Named inputs/outputs a request requires |
//! | [`VersionRequirement`] | Exact, minimum or compatible-range requirement |
//! | [`ManifestValidator`] | Pure structural/semantic validation |
//!
//! ## Example
//!
//! ```rust
//! use capability_mesh::manifest::{CapabilityManifest, CapabilityType, IOSchema};
//!
//! let manifest = CapabilityManifest::builder("vision", "ocr.extract", CapabilityType::DataProcessing)
//!     .version("1.2.0")
//!     .input("image", IOSchema::json_type("string")?)
//!     .output("text", IOSchema::json_type("string")?)
//!     .description("Extract text from scanned pages")
//!     .build()?;
//! assert_eq!(manifest.name(), "ocr.extract");
//! # Ok::<(), capability_mesh::Error>(())
//! ```

mod schema;
mod types;
mod validator;
mod version;

pub use schema::{validate_payload, Contract, FieldType, IOSchema, SchemaKind, SchemaSet, TypeRelation};
pub use types::{CapabilityManifest, CapabilityType, DependencyRef, ManifestBuilder};
pub use validator::{ManifestValidator, Severity, ValidationStrictness, ValidationViolation};
pub use version::{parse_version, VersionRequirement};
