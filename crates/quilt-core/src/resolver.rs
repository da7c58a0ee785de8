//! Dependency resolution into activation waves.
//!
//! A batch of manifests selected for one activation event is turned into an
//! ordered sequence of waves. Every wave only depends on earlier waves, so
//! members of one wave can activate concurrently. Names that are already
//! activated are seeded into the graph so cross-batch dependencies resolve
//! without re-activation.

use std::sync::Arc;

use quilt_protocols::{KernelError, Manifest};

/// Flattened dependency graph: an edge `(from, to)` means `from` depends on
/// `to` and must activate after it.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyDag {
    pub names: Vec<String>,
    pub edges: Vec<(String, String)>,
}

/// Build the dependency graph for a batch. Dependencies outside the batch
/// are added as nodes only when they are already activated; a dependency
/// that is neither in the batch nor activated leaves a dangling edge, which
/// surfaces as an unresolvable graph in [`priority_sequence`].
pub fn build_dag(manifests: &[Arc<Manifest>], activated: &[String]) -> DependencyDag {
    let mut names: Vec<String> = manifests.iter().map(|m| m.name.clone()).collect();
    let mut edges = Vec::new();

    for manifest in manifests {
        for dependency in manifest.dependencies.keys() {
            edges.push((manifest.name.clone(), dependency.clone()));
            if !names.iter().any(|name| name == dependency)
                && activated.iter().any(|name| name == dependency)
            {
                names.push(dependency.clone());
            }
        }
    }

    DependencyDag { names, edges }
}

/// Resolve a batch into activation waves. Each round extracts the frontier
/// of names with no remaining outgoing edges; an empty frontier with names
/// left means the graph cannot be resolved and is always a hard error.
pub fn priority_sequence(
    manifests: &[Arc<Manifest>],
    activated: &[String],
) -> Result<Vec<Vec<String>>, KernelError> {
    let DependencyDag { mut names, mut edges } = build_dag(manifests, activated);
    let mut waves = Vec::new();

    while !names.is_empty() {
        let frontier: Vec<String> = names
            .iter()
            .filter(|name| !edges.iter().any(|(from, _)| from == *name))
            .cloned()
            .collect();

        if frontier.is_empty() {
            return Err(KernelError::CyclicDependency(names.join(", ")));
        }

        names.retain(|name| !frontier.contains(name));
        edges.retain(|(_, to)| !frontier.contains(to));
        waves.push(frontier);
    }

    Ok(waves)
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
