//! Topological layering of plan steps (Kahn's algorithm).

use super::{AdaptationStep, StepId};
use std::collections::BTreeSet;

/// Group steps into layers where every step depends only on earlier layers.
/// Ids within a layer are sorted. On a cycle, returns the steps that could
/// not be placed.
pub(crate) fn layers(steps: &[AdaptationStep]) -> Result<Vec<Vec<StepId>>, Vec<StepId>> {
    let mut in_degree: Vec<usize> = vec![0; steps.len()];
    let mut dependents: Vec<BTreeSet<StepId>> = vec![BTreeSet::new(); steps.len()];

    for step in steps {
        let unique: BTreeSet<StepId> = step.depends_on.iter().copied().collect();
        in_degree[step.id.index()] = unique.len();
        for dep in unique {
            dependents[dep.index()].insert(step.id);
        }
    }

    let mut ready: BTreeSet<StepId> = steps
        .iter()
        .filter(|s| in_degree[s.id.index()] == 0)
        .map(|s| s.id)
        .collect();

    let mut out = Vec::new();
    let mut placed = 0;
    while !ready.is_empty() {
        let layer: Vec<StepId> = std::mem::take(&mut ready).into_iter().collect();
        for id in &layer {
            for dependent in &dependents[id.index()] {
                let deg = &mut in_degree[dependent.index()];
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(*dependent);
                }
            }
        }
        placed += layer.len();
        out.push(layer);
    }

    if placed == steps.len() {
        Ok(out)
    } else {
        Err(steps
            .iter()
            .filter(|s| in_degree[s.id.index()] > 0)
            .map(|s| s.id)
            .collect())
    }
}
