// ABOUTME: Dependency resolver producing a deployment order for a requested service subset
// ABOUTME: Iterative depth-first traversal over intra-subset edges; cycles degrade to warnings

use crate::discovery::{ServiceCatalog, ServiceDescriptor};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Ordered service names; every dependency inside the plan precedes its dependents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan(Vec<String>);

impl DeploymentPlan {
    pub fn services(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

/// A back edge found during traversal. `path` runs from `dependency` to `service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyCycle {
    pub service: String,
    pub dependency: String,
    pub path: Vec<String>,
}

impl std::fmt::Display for DependencyCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.path.join(" -> "), self.dependency)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedPlan {
    pub plan: DeploymentPlan,
    pub cycles: Vec<DependencyCycle>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Order `requested` so that every service comes after its required dependencies.
///
/// Only edges between requested services are considered; dependencies outside the
/// requested set are neither added nor reported. Names unknown to `lookup` are
/// kept in place with no edges. Duplicate requests collapse to the first occurrence.
/// A cycle never fails the resolution: the closing edge is treated as satisfied and
/// recorded in [`ResolvedPlan::cycles`].
pub fn resolve<'a, S, F>(requested: &[S], lookup: F) -> ResolvedPlan
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<&'a ServiceDescriptor>,
{
    let mut names: Vec<&str> = Vec::with_capacity(requested.len());
    let mut index: HashMap<&str, usize> = HashMap::new();
    for name in requested {
        let name = name.as_ref();
        if !index.contains_key(name) {
            index.insert(name, names.len());
            names.push(name);
        }
    }

    let edges: Vec<Vec<usize>> = names
        .iter()
        .map(|name| {
            lookup(name)
                .map(|d| {
                    d.dependencies
                        .iter()
                        .filter_map(|dep| index.get(dep.as_str()).copied())
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; names.len()];
    let mut order = Vec::with_capacity(names.len());
    let mut cycles = Vec::new();
    // (node, next edge to follow)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..names.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::Visiting;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if frame.1 < edges[node].len() {
                let dep = edges[node][frame.1];
                frame.1 += 1;
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::Visiting;
                        stack.push((dep, 0));
                    }
                    Mark::Visiting => {
                        let path: Vec<String> = stack
                            .iter()
                            .map(|(n, _)| *n)
                            .skip_while(|n| *n != dep)
                            .map(|n| names[n].to_string())
                            .collect();
                        let cycle = DependencyCycle {
                            service: names[node].to_string(),
                            dependency: names[dep].to_string(),
                            path,
                        };
                        warn!("Circular dependency detected: {}", cycle);
                        cycles.push(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                order.push(names[node].to_string());
                stack.pop();
            }
        }
    }

    ResolvedPlan {
        plan: DeploymentPlan(order),
        cycles,
    }
}

impl ServiceCatalog {
    /// Resolve a deployment order against this catalog
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> ResolvedPlan {
        resolve(requested, |name| self.get(name))
    }
}
