use crate::matcher::MatchResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of conflict strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Highest priority candidate wins.
    Override,
    /// Union identically-typed contracts into one composite manifest.
    Merge,
    /// Chain candidates into a pipeline.
    Compose,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Override => "override",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Compose => "compose",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How `override` orders candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityStrategy {
    /// Newest version, then score, then module id.
    #[default]
    VersionThenRecency,
    /// Per-module integer priority (higher first), then version recency.
    DeclaredPriority,
    /// Operator-supplied module order; unlisted modules never win.
    Manual,
}

impl PriorityStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityStrategy::VersionThenRecency => "version_then_recency",
            PriorityStrategy::DeclaredPriority => "declared_priority",
            PriorityStrategy::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "version_then_recency" => Some(Self::VersionThenRecency),
            "declared_priority" => Some(Self::DeclaredPriority),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for PriorityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority inputs that live outside manifests.
#[derive(Debug, Clone, Default)]
pub(crate) struct PriorityTable {
    pub strategy: PriorityStrategy,
    pub module_priorities: BTreeMap<String, i64>,
    pub manual_order: Vec<String>,
}

impl PriorityTable {
    fn by_version(a: &MatchResult, b: &MatchResult) -> Ordering {
        b.manifest
            .parsed_version()
            .cmp(&a.manifest.parsed_version())
            .then_with(|| a.rank_cmp(b))
    }

    /// Candidates in priority order. Under `manual`, unlisted candidates are dropped.
    pub fn order<'a>(&self, candidates: &'a [MatchResult]) -> Vec<&'a MatchResult> {
        let mut ordered: Vec<&MatchResult> = candidates.iter().collect();
        match self.strategy {
            PriorityStrategy::VersionThenRecency => {
                ordered.sort_by(|a, b| Self::by_version(*a, *b));
            }
            PriorityStrategy::DeclaredPriority => {
                let priority = |r: &MatchResult| {
                    self.module_priorities
                        .get(r.manifest.module_id())
                        .copied()
                        .unwrap_or(0)
                };
                ordered.sort_by(|a, b| {
                    priority(*b)
                        .cmp(&priority(*a))
                        .then_with(|| Self::by_version(*a, *b))
                });
            }
            PriorityStrategy::Manual => {
                let position = |r: &MatchResult| {
                    self.manual_order
                        .iter()
                        .position(|m| m == r.manifest.module_id())
                };
                ordered.retain(|r| position(*r).is_some());
                ordered.sort_by(|a, b| {
                    position(*a)
                        .cmp(&position(*b))
                        .then_with(|| Self::by_version(*a, *b))
                });
            }
        }
        ordered
    }
}
