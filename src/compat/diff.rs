//! Structural diff between two contracts.

use super::CompatibilityLevel;
use crate::manifest::{Contract, FieldType, IOSchema, TypeRelation};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Removed { was_required: bool },
    Added { required: bool },
    TypeNarrowed { from: FieldType, to: FieldType },
    TypeWidened { from: FieldType, to: FieldType },
    TypeChanged { from: FieldType, to: FieldType },
    BecameRequired,
    BecameOptional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaChange {
    pub direction: Direction,
    pub field: String,
    pub change: ChangeKind,
    pub level: CompatibilityLevel,
}

impl SchemaChange {
    pub fn is_breaking(&self) -> bool {
        self.level == CompatibilityLevel::MajorIncompatible
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match &self.change {
            ChangeKind::Removed { was_required: true } => "required field removed".to_string(),
            ChangeKind::Removed { was_required: false } => "optional field removed".to_string(),
            ChangeKind::Added { required: true } => "required field added".to_string(),
            ChangeKind::Added { required: false } => "optional field added".to_string(),
            ChangeKind::TypeNarrowed { from, to } => format!("type narrowed {} -> {}", from, to),
            ChangeKind::TypeWidened { from, to } => format!("type widened {} -> {}", from, to),
            ChangeKind::TypeChanged { from, to } => format!("type changed {} -> {}", from, to),
            ChangeKind::BecameRequired => "became required".to_string(),
            ChangeKind::BecameOptional => "became optional".to_string(),
        };
        write!(f, "{} '{}': {}", self.direction, self.field, what)
    }
}

/// Result of comparing a candidate contract against a baseline contract.
///
/// The baseline is what the caller relies on (a request's required schema or
/// a previous version's contract); the candidate is what is offered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaDiff {
    pub changes: Vec<SchemaChange>,
    /// Baseline fields, required or optional.
    pub fields_total: usize,
    /// Baseline fields present in the candidate with a compatible type.
    pub fields_satisfied: usize,
}

impl SchemaDiff {
    pub fn between(baseline: &impl Contract, candidate: &impl Contract) -> Self {
        let mut diff = SchemaDiff::default();
        diff.compare(Direction::Input, baseline, candidate);
        diff.compare(Direction::Output, baseline, candidate);
        diff
    }

    /// Diff a candidate against what a request requires. A direction the
    /// request leaves empty is unconstrained and not compared.
    pub fn for_request(required: &impl Contract, candidate: &impl Contract) -> Self {
        let mut diff = SchemaDiff::default();
        if !required.inputs().is_empty() {
            diff.compare(Direction::Input, required, candidate);
        }
        if !required.outputs().is_empty() {
            diff.compare(Direction::Output, required, candidate);
        }
        diff
    }

    fn compare(&mut self, direction: Direction, baseline: &impl Contract, candidate: &impl Contract) {
        let (base, cand) = match direction {
            Direction::Input => (baseline.inputs(), candidate.inputs()),
            Direction::Output => (baseline.outputs(), candidate.outputs()),
        };

        for (name, b) in base {
            self.fields_total += 1;
            let Some(c) = cand.get(name) else {
                let level = if b.is_required() {
                    CompatibilityLevel::MajorIncompatible
                } else {
                    CompatibilityLevel::Minor
                };
                self.push(direction, name, ChangeKind::Removed { was_required: b.is_required() }, level);
                continue;
            };

            let type_ok = self.compare_types(direction, name, b, c);
            if type_ok {
                self.fields_satisfied += 1;
            }
            self.compare_requiredness(direction, name, b, c);
        }

        for (name, c) in cand {
            if base.contains_key(name) {
                continue;
            }
            let level = match direction {
                Direction::Input if c.is_required() => CompatibilityLevel::MajorIncompatible,
                _ => CompatibilityLevel::Minor,
            };
            self.push(direction, name, ChangeKind::Added { required: c.is_required() }, level);
        }
    }

    /// Returns whether the candidate's type is compatible with the baseline's.
    fn compare_types(&mut self, direction: Direction, name: &str, b: &IOSchema, c: &IOSchema) -> bool {
        let (from, to) = (b.field_type(), c.field_type());
        let relation = to.relation_to(from);
        let (change, level) = match (direction, relation) {
            (_, TypeRelation::Same) => return true,
            (_, TypeRelation::Unrelated) => (
                ChangeKind::TypeChanged { from, to },
                CompatibilityLevel::MajorIncompatible,
            ),
            (Direction::Output, TypeRelation::Narrower) => (
                ChangeKind::TypeNarrowed { from, to },
                CompatibilityLevel::MajorIncompatible,
            ),
            (Direction::Output, TypeRelation::Wider) => {
                (ChangeKind::TypeWidened { from, to }, CompatibilityLevel::Minor)
            }
            // Any type change on a required input breaks callers; optional inputs may drift.
            (Direction::Input, rel) => {
                let change = if rel == TypeRelation::Wider {
                    ChangeKind::TypeWidened { from, to }
                } else {
                    ChangeKind::TypeNarrowed { from, to }
                };
                let level = if c.is_required() {
                    CompatibilityLevel::MajorIncompatible
                } else {
                    CompatibilityLevel::Minor
                };
                (change, level)
            }
        };
        let compatible = level != CompatibilityLevel::MajorIncompatible;
        self.push(direction, name, change, level);
        compatible
    }

    fn compare_requiredness(&mut self, direction: Direction, name: &str, b: &IOSchema, c: &IOSchema) {
        match (b.is_required(), c.is_required()) {
            (false, true) => {
                let level = match direction {
                    Direction::Input => CompatibilityLevel::MajorIncompatible,
                    Direction::Output => CompatibilityLevel::Minor,
                };
                self.push(direction, name, ChangeKind::BecameRequired, level);
            }
            (true, false) => {
                let level = match direction {
                    Direction::Input => CompatibilityLevel::Minor,
                    Direction::Output => CompatibilityLevel::MajorIncompatible,
                };
                self.push(direction, name, ChangeKind::BecameOptional, level);
            }
            _ => {}
        }
    }

    fn push(&mut self, direction: Direction, field: &str, change: ChangeKind, level: CompatibilityLevel) {
        self.changes.push(SchemaChange {
            direction,
            field: field.to_string(),
            change,
            level,
        });
    }

    /// Structurally derived level: breaking, additive, or unchanged (patch).
    pub fn level(&self) -> CompatibilityLevel {
        self.changes
            .iter()
            .map(|c| c.level)
            .fold(CompatibilityLevel::Patch, CompatibilityLevel::stricter)
    }

    pub fn is_breaking(&self) -> bool {
        self.changes.iter().any(SchemaChange::is_breaking)
    }

    pub fn breaking_changes(&self) -> impl Iterator<Item = &SchemaChange> {
        self.changes.iter().filter(|c| c.is_breaking())
    }

    /// Fraction of baseline fields the candidate satisfies, in `[0, 1]`.
    /// Missing optional fields lower it without breaking compatibility.
    pub fn overlap(&self) -> f64 {
        if self.fields_total == 0 {
            1.0
        } else {
            self.fields_satisfied as f64 / self.fields_total as f64
        }
    }
}
