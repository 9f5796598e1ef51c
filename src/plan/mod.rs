//! 集成规划模块：递归解析依赖并生成分层的有向无环执行计划。
//!
//! # Integration Planning Module
//!
//! The [`Planner`] resolves a root request, then every dependency of the
//! chosen manifest the same way, and lays the result out as a DAG of
//! [`AdaptationStep`]s. Steps live in an arena indexed by [`StepId`]; edges
//! point from a step to the steps it depends on.
//!
//! A manifest appears at most once in a plan. Reaching a manifest that is
//! still being expanded is a dependency cycle.

mod graph;
mod planner;

pub use planner::{CandidateSource, CapabilityResolution, Planner, Selection};

use crate::conflict::ConflictRecord;
use crate::manifest::CapabilityManifest;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Index of a step in its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StepId(pub usize);

impl StepId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step-{}", self.0)
    }
}

/// One unit of work: run one manifest once its dependencies are done.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptationStep {
    pub id: StepId,
    pub manifest: Arc<CapabilityManifest>,
    pub depends_on: Vec<StepId>,
    /// Subset of `depends_on` reached through optional dependencies. Their
    /// failure does not block this step.
    pub optional_dependencies: Vec<StepId>,
    /// Other accepted candidates, in rank order, tried after the primary
    /// manifest exhausts its retries.
    pub fallbacks: Vec<Arc<CapabilityManifest>>,
    /// Member manifests when `manifest` is a merged composite.
    pub members: Vec<Arc<CapabilityManifest>>,
    /// False only when every path from the root to this step crosses an
    /// optional dependency.
    pub critical: bool,
}

impl AdaptationStep {
    pub fn new(id: StepId, manifest: Arc<CapabilityManifest>) -> Self {
        Self {
            id,
            manifest,
            depends_on: Vec::new(),
            optional_dependencies: Vec::new(),
            fallbacks: Vec::new(),
            members: Vec::new(),
            critical: true,
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<StepId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<Arc<CapabilityManifest>>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn capability(&self) -> &str {
        self.manifest.name()
    }

    pub fn is_composite(&self) -> bool {
        !self.members.is_empty()
    }

    /// Whether a failure of `dependency` must stop this step.
    pub fn blocks_on(&self, dependency: StepId) -> bool {
        self.depends_on.contains(&dependency) && !self.optional_dependencies.contains(&dependency)
    }
}

/// A resolved, layered integration ready to execute.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationPlan {
    pub correlation_id: Uuid,
    pub capability: String,
    pub steps: Vec<AdaptationStep>,
    pub root: StepId,
    /// Topological layers; ids sorted within a layer.
    pub layers: Vec<Vec<StepId>>,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub conflicts: Vec<ConflictRecord>,
}

impl IntegrationPlan {
    pub fn step(&self, id: StepId) -> Option<&AdaptationStep> {
        self.steps.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that list `id` among their dependencies.
    pub fn dependents(&self, id: StepId) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.contains(&id))
            .map(|s| s.id)
            .collect()
    }

    /// Step ids in a valid execution order.
    pub fn order(&self) -> impl Iterator<Item = StepId> + '_ {
        self.layers.iter().flatten().copied()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Build a plan from hand-made steps, computing the layers.
    pub fn from_steps(
        capability: impl Into<String>,
        steps: Vec<AdaptationStep>,
        root: StepId,
    ) -> crate::Result<Self> {
        let malformed = root.index() >= steps.len()
            || steps.iter().enumerate().any(|(i, s)| {
                s.id.index() != i || s.depends_on.iter().any(|d| d.index() >= steps.len())
            });
        if malformed {
            return Err(crate::Error::runtime_with_context(
                "step ids must match their position and reference existing steps",
                crate::ErrorContext::new().with_source("plan"),
            ));
        }
        let layers = graph::layers(&steps).map_err(|leftover| crate::Error::DependencyCycle {
            path: leftover
                .iter()
                .filter_map(|id| steps.get(id.index()))
                .map(|s| s.manifest.label())
                .collect(),
        })?;
        Ok(Self {
            correlation_id: Uuid::new_v4(),
            capability: capability.into(),
            steps,
            root,
            layers,
            timeout: Duration::from_secs(30),
            max_concurrent: 4,
            conflicts: Vec::new(),
        })
    }
}
