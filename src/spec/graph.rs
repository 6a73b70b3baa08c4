//! Reference graph checks: acyclicity and entry discovery

use super::{ModuleSpec, SpecError};
use std::collections::{HashMap, HashSet};

/// Kahn's algorithm over the module reference graph. Whatever is left with a
/// non-zero in-degree sits on (or behind) a cycle.
pub(super) fn check_acyclic(
    modules: &[ModuleSpec],
    by_name: &HashMap<String, usize>,
) -> Result<(), SpecError> {
    let mut in_degree = vec![0usize; modules.len()];
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];

    for (index, module) in modules.iter().enumerate() {
        let mut seen = HashSet::new();
        for reference in module.references() {
            let target = by_name[reference];
            if seen.insert(target) {
                edges[index].push(target);
                in_degree[target] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..modules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    while let Some(index) = ready.pop() {
        visited += 1;
        for &target in &edges[index] {
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                ready.push(target);
            }
        }
    }

    if visited == modules.len() {
        return Ok(());
    }

    let stuck = modules
        .iter()
        .zip(&in_degree)
        .filter(|(_, &degree)| degree > 0)
        .map(|(module, _)| module.name().to_string())
        .collect();
    Err(SpecError::Cycle(stuck))
}

/// Name of the only module no other module references
pub(super) fn unique_root(modules: &[ModuleSpec]) -> Result<String, SpecError> {
    let referenced: HashSet<&str> = modules.iter().flat_map(ModuleSpec::references).collect();

    let mut roots = modules
        .iter()
        .map(ModuleSpec::name)
        .filter(|name| !referenced.contains(name));

    match (roots.next(), roots.next()) {
        (Some(root), None) => Ok(root.to_string()),
        (Some(first), Some(second)) => {
            let mut candidates = vec![first.to_string(), second.to_string()];
            candidates.extend(roots.map(ToString::to_string));
            Err(SpecError::AmbiguousEntry(candidates))
        }
        // Unreachable once the graph is known to be acyclic and non-empty
        (None, _) => Err(SpecError::AmbiguousEntry(Vec::new())),
    }
}
