use super::{graph, AdaptationStep, IntegrationPlan, StepId};
use crate::config::EngineConfig;
use crate::conflict::{ConflictRecord, ConflictResolver, Resolution};
use crate::manifest::CapabilityManifest;
use crate::matcher::{CapabilityMatcher, CapabilityRequest, MatchOutcome, MatchResult};
use crate::registry::ManifestCache;
use crate::{Error, ErrorContext, Result};
use async_recursion::async_recursion;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Where the planner gets candidates for a capability name.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, capability: &str) -> Result<Vec<Arc<CapabilityManifest>>>;
}

#[async_trait]
impl CandidateSource for ManifestCache {
    async fn candidates(&self, capability: &str) -> Result<Vec<Arc<CapabilityManifest>>> {
        ManifestCache::candidates(self, capability).await
    }
}

/// What a single request resolved to.
#[derive(Debug, Clone)]
pub enum Selection {
    Single {
        winner: MatchResult,
        /// Remaining accepted candidates in rank order.
        fallbacks: Vec<MatchResult>,
    },
    Merged {
        manifest: Arc<CapabilityManifest>,
        members: Vec<MatchResult>,
    },
    Composed {
        pipeline: Vec<MatchResult>,
    },
}

#[derive(Debug, Clone)]
pub struct CapabilityResolution {
    pub request: CapabilityRequest,
    pub outcome: MatchOutcome,
    pub selection: Selection,
    /// Present when more than one candidate was accepted.
    pub conflict: Option<ConflictRecord>,
}

#[derive(Default)]
struct PlanState {
    steps: Vec<AdaptationStep>,
    by_manifest: HashMap<Uuid, StepId>,
    /// Manifests being expanded, outermost first.
    active: Vec<(Uuid, String)>,
    conflicts: Vec<ConflictRecord>,
}

impl PlanState {
    fn mark_critical(&mut self, id: StepId) {
        let Some(step) = self.steps.get_mut(id.index()) else {
            return;
        };
        if step.critical {
            return;
        }
        step.critical = true;
        let hard: Vec<StepId> = step
            .depends_on
            .iter()
            .filter(|d| !step.optional_dependencies.contains(d))
            .copied()
            .collect();
        for dep in hard {
            self.mark_critical(dep);
        }
    }
}

/// Builds integration plans from requests.
pub struct Planner {
    source: Arc<dyn CandidateSource>,
    matcher: CapabilityMatcher,
    resolver: ConflictResolver,
    max_depth: usize,
    timeout: Duration,
    max_concurrent: usize,
    enable_fallbacks: bool,
}

impl Planner {
    pub fn new(source: Arc<dyn CandidateSource>, config: &EngineConfig) -> Self {
        Self {
            source,
            matcher: CapabilityMatcher::from_config(config),
            resolver: ConflictResolver::from_config(config),
            max_depth: config.max_plan_depth,
            timeout: config.integration_timeout(),
            max_concurrent: config.max_concurrent,
            enable_fallbacks: config.enable_fallbacks,
        }
    }

    pub fn matcher(&self) -> &CapabilityMatcher {
        &self.matcher
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Match one request and settle any conflict, without expanding dependencies.
    pub async fn resolve(&self, request: &CapabilityRequest) -> Result<CapabilityResolution> {
        let candidates = self.source.candidates(&request.name).await?;
        let outcome = self.matcher.match_request(request, candidates)?;
        let accepted: Vec<MatchResult> = outcome.accepted().cloned().collect();

        if accepted.len() == 1 {
            let winner = accepted[0].clone();
            return Ok(CapabilityResolution {
                request: request.clone(),
                outcome,
                selection: Selection::Single {
                    winner,
                    fallbacks: Vec::new(),
                },
                conflict: None,
            });
        }

        let record = self.resolver.resolve_request(request, &accepted)?;
        let selection = match &record.resolution {
            Resolution::Selected { winner } => Selection::Single {
                winner: winner.clone(),
                fallbacks: record
                    .candidates
                    .iter()
                    .filter(|c| c.manifest.id() != winner.manifest.id())
                    .cloned()
                    .collect(),
            },
            Resolution::Merged { manifest, members } => Selection::Merged {
                manifest: manifest.clone(),
                members: members.clone(),
            },
            Resolution::Composed { pipeline } => Selection::Composed {
                pipeline: pipeline.clone(),
            },
            Resolution::Unresolved => {
                return Err(Error::ConflictUnresolved {
                    capability: request.name.clone(),
                    attempted: record.attempted(),
                })
            }
        };

        Ok(CapabilityResolution {
            request: request.clone(),
            outcome,
            selection,
            conflict: Some(record),
        })
    }

    /// Resolve `request` and all transitive dependencies into a layered plan.
    pub async fn plan(&self, request: &CapabilityRequest) -> Result<IntegrationPlan> {
        let correlation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "plan",
            correlation_id = %correlation_id,
            capability = request.name.as_str()
        );
        async move {
            let mut state = PlanState::default();
            let root = self.expand(&mut state, request.clone(), 0, true).await?;

            let layers = graph::layers(&state.steps).map_err(|leftover| Error::DependencyCycle {
                path: leftover
                    .iter()
                    .filter_map(|id| state.steps.get(id.index()))
                    .map(|s| s.manifest.label())
                    .collect(),
            })?;

            tracing::info!(
                steps = state.steps.len(),
                layers = layers.len(),
                conflicts = state.conflicts.len(),
                "plan assembled"
            );

            Ok(IntegrationPlan {
                correlation_id,
                capability: request.name.clone(),
                steps: state.steps,
                root,
                layers,
                timeout: self.timeout,
                max_concurrent: self.max_concurrent,
                conflicts: state.conflicts,
            })
        }
        .instrument(span)
        .await
    }

    #[async_recursion]
    async fn expand(
        &self,
        state: &mut PlanState,
        request: CapabilityRequest,
        depth: usize,
        critical: bool,
    ) -> Result<StepId> {
        if depth > self.max_depth {
            return Err(Error::runtime_with_context(
                format!("dependency chain for '{}' is deeper than {}", request.name, self.max_depth),
                ErrorContext::new()
                    .with_field_path("config.max_plan_depth")
                    .with_source("planner"),
            ));
        }

        let resolution = self.resolve(&request).await?;
        if let Some(record) = resolution.conflict {
            state.conflicts.push(record);
        }

        match resolution.selection {
            Selection::Single { winner, fallbacks } => {
                let fallbacks = if self.enable_fallbacks {
                    fallbacks.into_iter().map(|r| r.manifest).collect()
                } else {
                    Vec::new()
                };
                self.place(state, winner.manifest, fallbacks, Vec::new(), None, depth, critical)
                    .await
            }
            Selection::Merged { manifest, members } => {
                let members = members.into_iter().map(|r| r.manifest).collect();
                self.place(state, manifest, Vec::new(), members, None, depth, critical)
                    .await
            }
            Selection::Composed { pipeline } => {
                let mut previous = None;
                for stage in pipeline {
                    let id = self
                        .place(state, stage.manifest, Vec::new(), Vec::new(), previous, depth, critical)
                        .await?;
                    previous = Some(id);
                }
                previous.ok_or_else(|| {
                    Error::runtime_with_context(
                        format!("empty pipeline for '{}'", request.name),
                        ErrorContext::new().with_source("planner"),
                    )
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[async_recursion]
    async fn place(
        &self,
        state: &mut PlanState,
        manifest: Arc<CapabilityManifest>,
        fallbacks: Vec<Arc<CapabilityManifest>>,
        members: Vec<Arc<CapabilityManifest>>,
        upstream: Option<StepId>,
        depth: usize,
        critical: bool,
    ) -> Result<StepId> {
        if let Some(pos) = state.active.iter().position(|(id, _)| *id == manifest.id()) {
            let mut path: Vec<String> = state.active[pos..].iter().map(|(_, l)| l.clone()).collect();
            path.push(manifest.label());
            tracing::warn!(path = %path.join(" -> "), "dependency cycle");
            return Err(Error::DependencyCycle { path });
        }

        if let Some(&existing) = state.by_manifest.get(&manifest.id()) {
            if critical {
                state.mark_critical(existing);
            }
            if let Some(up) = upstream {
                let step = &mut state.steps[existing.index()];
                if !step.depends_on.contains(&up) {
                    step.depends_on.push(up);
                }
            }
            tracing::debug!(manifest_id = %manifest.id(), step = %existing, "reusing step");
            return Ok(existing);
        }

        state.active.push((manifest.id(), manifest.label()));
        let mut depends_on: Vec<StepId> = upstream.into_iter().collect();
        let mut optional: Vec<StepId> = Vec::new();

        for dep in manifest.dependencies() {
            let request = CapabilityRequest::from_dependency(dep)?;
            let child = match self.expand(state, request, depth + 1, critical && !dep.optional).await {
                Ok(child) => child,
                Err(err) if dep.optional && is_unmatched(&err) => {
                    tracing::warn!(
                        dependency = dep.name.as_str(),
                        error = %err,
                        "optional dependency unresolved, dropped"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            if !depends_on.contains(&child) {
                depends_on.push(child);
                if dep.optional {
                    optional.push(child);
                }
            } else if !dep.optional {
                optional.retain(|o| *o != child);
            }
        }
        state.active.pop();

        let id = StepId(state.steps.len());
        tracing::debug!(
            step = %id,
            manifest_id = %manifest.id(),
            capability = manifest.name(),
            depends_on = depends_on.len(),
            critical,
            "step placed"
        );
        state.by_manifest.insert(manifest.id(), id);
        state.steps.push(AdaptationStep {
            id,
            manifest,
            depends_on,
            optional_dependencies: optional,
            fallbacks,
            members,
            critical,
        });
        Ok(id)
    }
}

/// Resolution failures an optional dependency may absorb.
fn is_unmatched(err: &Error) -> bool {
    matches!(
        err,
        Error::NoMatchFound { .. } | Error::Compatibility { .. } | Error::ConflictUnresolved { .. }
    )
}
