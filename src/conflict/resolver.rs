use super::strategy::{ConflictStrategy, PriorityStrategy, PriorityTable};
use crate::config::EngineConfig;
use crate::manifest::{CapabilityManifest, Contract, DependencyRef, IOSchema};
use crate::matcher::{CapabilityRequest, MatchResult};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Composing is factorial in the candidate count.
const MAX_COMPOSE_CANDIDATES: usize = 8;

/// Outcome of a conflict.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Selected { winner: MatchResult },
    Merged {
        manifest: Arc<CapabilityManifest>,
        members: Vec<MatchResult>,
    },
    /// Pipeline in execution order.
    Composed { pipeline: Vec<MatchResult> },
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Unresolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: ConflictStrategy,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Audit trail of one conflict.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictRecord {
    pub capability: String,
    /// Competing candidates in ranking order.
    pub candidates: Vec<MatchResult>,
    pub attempts: Vec<StrategyAttempt>,
    pub strategy: Option<ConflictStrategy>,
    pub resolution: Resolution,
}

impl ConflictRecord {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    pub fn attempted(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.strategy.to_string()).collect()
    }
}

/// Reduces several accepted candidates to one outcome.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    priorities: PriorityTable,
    chain: Vec<ConflictStrategy>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self {
            priorities: PriorityTable::default(),
            chain: vec![ConflictStrategy::Override],
        }
    }
}

impl ConflictResolver {
    pub fn new(chain: Vec<ConflictStrategy>) -> Self {
        Self {
            chain,
            ..Default::default()
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            priorities: PriorityTable {
                strategy: config.priority_strategy,
                module_priorities: config.module_priorities.clone(),
                manual_order: config.manual_order.clone(),
            },
            chain: config.conflict_strategies.clone(),
        }
    }

    pub fn with_priority_strategy(mut self, strategy: PriorityStrategy) -> Self {
        self.priorities.strategy = strategy;
        self
    }

    pub fn with_module_priorities(mut self, priorities: BTreeMap<String, i64>) -> Self {
        self.priorities.module_priorities = priorities;
        self
    }

    pub fn with_manual_order(mut self, order: Vec<String>) -> Self {
        self.priorities.manual_order = order;
        self
    }

    /// Request strategy first, then the configured chain, without repeats.
    pub fn strategy_chain(&self, preferred: Option<ConflictStrategy>) -> Vec<ConflictStrategy> {
        let mut out = Vec::with_capacity(self.chain.len() + 1);
        for s in preferred.into_iter().chain(self.chain.iter().copied()) {
            if !out.contains(&s) {
                out.push(s);
            }
        }
        out
    }

    /// Resolve a request's accepted candidates, failing with
    /// `ConflictUnresolved` when no strategy applies.
    pub fn resolve_request(
        &self,
        request: &CapabilityRequest,
        accepted: &[MatchResult],
    ) -> Result<ConflictRecord> {
        let strategies = self.strategy_chain(request.strategy);
        let record = self.resolve(&request.name, accepted, &strategies);
        if record.is_resolved() {
            Ok(record)
        } else {
            Err(Error::ConflictUnresolved {
                capability: request.name.clone(),
                attempted: record.attempted(),
            })
        }
    }

    /// Try `strategies` in order on `accepted`. Never picks a winner outside
    /// the chain.
    pub fn resolve(
        &self,
        capability: &str,
        accepted: &[MatchResult],
        strategies: &[ConflictStrategy],
    ) -> ConflictRecord {
        let mut candidates = accepted.to_vec();
        candidates.sort_by(MatchResult::rank_cmp);
        candidates.dedup_by(|a, b| a.manifest.id() == b.manifest.id());

        let mut attempts = Vec::new();
        for &strategy in strategies {
            match self.apply(strategy, capability, &candidates) {
                Ok(resolution) => {
                    attempts.push(StrategyAttempt {
                        strategy,
                        succeeded: true,
                        reason: None,
                    });
                    tracing::info!(
                        capability,
                        strategy = strategy.as_str(),
                        candidates = candidates.len(),
                        "conflict resolved"
                    );
                    return ConflictRecord {
                        capability: capability.to_string(),
                        candidates,
                        attempts,
                        strategy: Some(strategy),
                        resolution,
                    };
                }
                Err(reason) => {
                    tracing::debug!(capability, strategy = strategy.as_str(), %reason, "strategy failed");
                    attempts.push(StrategyAttempt {
                        strategy,
                        succeeded: false,
                        reason: Some(reason),
                    });
                }
            }
        }

        tracing::warn!(capability, attempts = attempts.len(), "conflict unresolved");
        ConflictRecord {
            capability: capability.to_string(),
            candidates,
            attempts,
            strategy: None,
            resolution: Resolution::Unresolved,
        }
    }

    fn apply(
        &self,
        strategy: ConflictStrategy,
        capability: &str,
        candidates: &[MatchResult],
    ) -> std::result::Result<Resolution, String> {
        match strategy {
            ConflictStrategy::Override => self.override_winner(candidates),
            ConflictStrategy::Merge => merge(capability, candidates),
            ConflictStrategy::Compose => self.compose(candidates),
        }
    }

    fn override_winner(&self, candidates: &[MatchResult]) -> std::result::Result<Resolution, String> {
        match self.priorities.order(candidates).first() {
            Some(winner) => Ok(Resolution::Selected {
                winner: (*winner).clone(),
            }),
            None if self.priorities.strategy == PriorityStrategy::Manual => {
                Err("no candidate module is listed in the manual order".to_string())
            }
            None => Err("no candidates".to_string()),
        }
    }

    fn compose(&self, candidates: &[MatchResult]) -> std::result::Result<Resolution, String> {
        if candidates.len() < 2 {
            return Err("compose needs at least two candidates".to_string());
        }
        if candidates.len() > MAX_COMPOSE_CANDIDATES {
            return Err(format!(
                "{} candidates exceed the compose limit of {}",
                candidates.len(),
                MAX_COMPOSE_CANDIDATES
            ));
        }

        let preferred: Vec<&MatchResult> = self.priorities.order(candidates);
        if preferred.len() == candidates.len() && chains(&preferred) {
            return Ok(Resolution::Composed {
                pipeline: preferred.into_iter().cloned().collect(),
            });
        }

        let mut indices: Vec<usize> = (0..candidates.len()).collect();
        loop {
            let ordering: Vec<&MatchResult> = indices.iter().map(|&i| &candidates[i]).collect();
            if chains(&ordering) {
                return Ok(Resolution::Composed {
                    pipeline: ordering.into_iter().cloned().collect(),
                });
            }
            if !next_permutation(&mut indices) {
                break;
            }
        }
        Err("no ordering chains every candidate's outputs into the next one's inputs".to_string())
    }
}

/// Whether each stage's outputs feed the next stage's required inputs.
fn chains(stages: &[&MatchResult]) -> bool {
    stages.windows(2).all(|pair| {
        let (from, to) = (&pair[0].manifest, &pair[1].manifest);
        !from.outputs().is_empty()
            && from.outputs().iter().all(|(name, out)| {
                to.inputs().get(name).is_some_and(|input| {
                    input.is_required() && input.field_type().accepts(out.field_type())
                })
            })
    })
}

/// Lexicographic next permutation; false once the last one is reached.
fn next_permutation(v: &mut [usize]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let mut i = v.len() - 1;
    while i > 0 && v[i - 1] >= v[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = v.len() - 1;
    while v[j] <= v[i - 1] {
        j -= 1;
    }
    v.swap(i - 1, j);
    v[i..].reverse();
    true
}

fn union_fields(
    section: &str,
    candidates: &[MatchResult],
    pick: impl Fn(&CapabilityManifest) -> &IndexMap<String, IOSchema>,
) -> std::result::Result<IndexMap<String, IOSchema>, String> {
    let mut merged: IndexMap<String, IOSchema> = IndexMap::new();
    let mut owner: IndexMap<String, String> = IndexMap::new();
    for c in candidates {
        for (name, schema) in pick(c.manifest.as_ref()) {
            match merged.get(name) {
                Some(existing) => {
                    if existing.kind() != schema.kind() || existing.field_type() != schema.field_type() {
                        return Err(format!(
                            "{} '{}' is {} in {} but {} in {}",
                            section,
                            name,
                            existing.field_type(),
                            owner.get(name).map(String::as_str).unwrap_or("?"),
                            schema.field_type(),
                            c.manifest.module_id()
                        ));
                    }
                }
                None => {
                    merged.insert(name.clone(), schema.clone());
                    owner.insert(name.clone(), c.manifest.module_id().to_string());
                }
            }
        }
    }
    Ok(merged)
}

/// Dependencies of all members. A capability may only be shared when every
/// member declares it identically.
fn union_dependencies(candidates: &[MatchResult]) -> std::result::Result<Vec<DependencyRef>, String> {
    let mut merged: IndexMap<String, (DependencyRef, String)> = IndexMap::new();
    for c in candidates {
        for dep in c.manifest.dependencies() {
            match merged.get(&dep.name) {
                Some((existing, owner)) if existing != dep => {
                    return Err(format!(
                        "dependency '{}' is {} in {} but {} in {}",
                        dep.name,
                        describe_dependency(existing),
                        owner,
                        describe_dependency(dep),
                        c.manifest.module_id()
                    ));
                }
                Some(_) => {}
                None => {
                    merged.insert(dep.name.clone(), (dep.clone(), c.manifest.module_id().to_string()));
                }
            }
        }
    }
    Ok(merged.into_values().map(|(dep, _)| dep).collect())
}

fn describe_dependency(dep: &DependencyRef) -> String {
    let mut out = format!("'{}'", dep.version);
    if let Some(t) = dep.capability_type {
        out.push_str(&format!(" of type {}", t));
    }
    if dep.optional {
        out.push_str(" (optional)");
    }
    out
}

/// Deterministic id of a merged manifest: first 16 bytes of the SHA-256 of
/// the sorted member ids.
pub(crate) fn merged_id(members: &[MatchResult]) -> Uuid {
    let mut ids: Vec<String> = members.iter().map(|m| m.manifest.id().to_string()).collect();
    ids.sort();
    let digest = Sha256::digest(ids.join(",").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn merge(capability: &str, candidates: &[MatchResult]) -> std::result::Result<Resolution, String> {
    if candidates.len() < 2 {
        return Err("merge needs at least two candidates".to_string());
    }
    let inputs = union_fields("input", candidates, |m| m.inputs())?;
    let outputs = union_fields("output", candidates, |m| m.outputs())?;

    let newest = candidates
        .iter()
        .max_by(|a, b| {
            a.manifest
                .parsed_version()
                .cmp(&b.manifest.parsed_version())
                .then_with(|| b.rank_cmp(a))
        })
        .ok_or_else(|| "no candidates".to_string())?;

    let module_id = format!(
        "merged:{}",
        candidates
            .iter()
            .map(|c| c.manifest.module_id())
            .collect::<Vec<_>>()
            .join("+")
    );

    let mut builder = CapabilityManifest::builder(module_id, capability, candidates[0].manifest.capability_type())
        .id(merged_id(candidates))
        .module_version(newest.manifest.module_version())
        .version(newest.manifest.version())
        .description(format!(
            "merged from {}",
            candidates
                .iter()
                .map(|c| c.manifest.label())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    for (name, schema) in inputs {
        builder = builder.input(name, schema);
    }
    for (name, schema) in outputs {
        builder = builder.output(name, schema);
    }
    for dep in union_dependencies(candidates)? {
        builder = builder.dependency(dep);
    }

    Ok(Resolution::Merged {
        manifest: Arc::new(builder.build_unchecked()),
        members: candidates.to_vec(),
    })
}
