//! # capability-mesh
//!
//! 能力清单集成解析引擎：匹配、协调并执行带版本的模块能力声明。
//!
//! Integration resolution engine for versioned capability manifests. Modules
//! publish what they provide and what they depend on; the engine finds the
//! best provider for a request, settles conflicts between equally good
//! providers, expands dependencies into a DAG, and executes it.
//!
//! ## Overview
//!
//! - **Validated manifests**: [`CapabilityManifest`] is immutable once built
//!   and shared as `Arc`.
//! - **Deterministic matching**: weighted similarity over type, schema overlap
//!   and version recency; ties break on version, module and id.
//! - **Explicit conflict strategies**: override, merge or compose, tried in a
//!   configured order and recorded for audit.
//! - **Bounded execution**: a semaphore-limited worker pool with retries,
//!   fallbacks, a global timeout and cooperative cancellation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capability_mesh::executor::{step_fn, StepContext};
//! use capability_mesh::manifest::{CapabilityManifest, CapabilityType, IOSchema};
//! use capability_mesh::{CapabilityRequest, IntegrationEngine};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> capability_mesh::Result<()> {
//!     let engine = IntegrationEngine::builder().build()?;
//!
//!     let ocr = CapabilityManifest::builder("ocr-service", "ocr.extract", CapabilityType::DataProcessing)
//!         .version("1.2.0")
//!         .input("image", IOSchema::json_type("string")?)
//!         .output("text", IOSchema::json_type("string")?)
//!         .description("Extract text from an image")
//!         .build()?;
//!     engine.publish(ocr).await?;
//!
//!     let request = CapabilityRequest::new("ocr.extract")
//!         .with_type(CapabilityType::DataProcessing)
//!         .with_version("^1.0.0")?;
//!     let runner = step_fn(|ctx: StepContext| async move {
//!         Ok(json!({ "text": format!("ran {}", ctx.capability()) }))
//!     });
//!     let report = engine.run(&request, runner).await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`manifest`] | Manifest model, IO schemas, validation |
//! | [`compat`] | Compatibility evaluation between manifests and requirements |
//! | [`matcher`] | Candidate scoring and ranking |
//! | [`conflict`] | Override / merge / compose conflict resolution |
//! | [`registry`] | Registry collaborator, in-memory registry, manifest cache |
//! | [`plan`] | Dependency expansion into a layered plan |
//! | [`executor`] | Plan execution with retries and fallbacks |
//! | [`resilience`] | Circuit breaker guarding registry access |
//! | [`config`] | Engine configuration (YAML/JSON/env) |

pub mod compat;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod executor;
pub mod manifest;
pub mod matcher;
pub mod plan;
pub mod registry;
pub mod resilience;

// Re-export main types for convenience
pub use compat::{CompatibilityEvaluator, CompatibilityLevel};
pub use config::EngineConfig;
pub use conflict::{ConflictRecord, ConflictResolver, ConflictStrategy, PriorityStrategy, Resolution};
pub use engine::{IntegrationEngine, IntegrationEngineBuilder};
pub use executor::{ExecutionReport, PlanExecutor, PlanOutcome, StepRunner};
pub use manifest::{CapabilityManifest, CapabilityType, IOSchema};
pub use matcher::{CapabilityMatcher, CapabilityRequest, MatchResult};
pub use plan::{IntegrationPlan, Planner};
pub use registry::{InMemoryRegistry, ManifestCache, Registry};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
