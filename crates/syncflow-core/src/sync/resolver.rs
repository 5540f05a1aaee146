//! Dependency resolution into parallel layers.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges must be kept in sync
//! - Layering is Kahn's algorithm; whatever is left unprocessed is a cycle
//!   (or sits behind one) and is reported, never dropped

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::domain::{SyncError, TaskConfig};

/// Dependency graph over task ids.
///
/// - `edges`: task -> set of tasks it depends on
/// - `reverse_edges`: task -> set of tasks waiting for it
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    edges: HashMap<String, HashSet<String>>,
    reverse_edges: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of `tasks`; dependencies on tasks outside the set are ignored.
    pub fn from_configs<'a>(tasks: impl IntoIterator<Item = &'a TaskConfig>) -> Self {
        let tasks: Vec<&TaskConfig> = tasks.into_iter().collect();
        let mut graph = Self::new();
        for task in &tasks {
            graph.add_node(&task.task_id);
        }
        for task in &tasks {
            for dep in &task.depends_on {
                if graph.nodes.contains(dep) {
                    graph.add_dependency(&task.task_id, dep);
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, task: &str) {
        self.nodes.insert(task.to_string());
    }

    /// `task` depends on `depends_on`; both become nodes.
    ///
    /// add_dependency("b", "a") means "B waits for A":
    /// - edges: B -> {A}
    /// - reverse_edges: A -> {B}
    pub fn add_dependency(&mut self, task: &str, depends_on: &str) {
        self.add_node(task);
        self.add_node(depends_on);
        self.edges
            .entry(task.to_string())
            .or_default()
            .insert(depends_on.to_string());
        self.reverse_edges
            .entry(depends_on.to_string())
            .or_default()
            .insert(task.to_string());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sorted dependencies of `task`.
    pub fn dependencies(&self, task: &str) -> Vec<String> {
        let mut deps: Vec<String> = self.edges.get(task).into_iter().flatten().cloned().collect();
        deps.sort();
        deps
    }

    /// Sorted tasks waiting for `task`.
    pub fn dependents(&self, task: &str) -> Vec<String> {
        let mut waiting: Vec<String> = self
            .reverse_edges
            .get(task)
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        waiting.sort();
        waiting
    }

    /// Kahn layering. Each layer is sorted so the result is deterministic.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, SyncError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.edges.get(n).map_or(0, HashSet::len)))
            .collect();

        let mut layers = Vec::new();
        let mut processed = 0;
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        while !ready.is_empty() {
            let mut next = Vec::new();
            for node in &ready {
                in_degree.remove(node);
                for waiting in self.reverse_edges.get(*node).into_iter().flatten() {
                    if let Some(d) = in_degree.get_mut(waiting.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(waiting.as_str());
                        }
                    }
                }
            }
            processed += ready.len();
            ready.sort_unstable();
            layers.push(ready.iter().map(|s| s.to_string()).collect());
            ready = next;
        }

        if processed < self.nodes.len() {
            // in_degree keeps exactly the unprocessed nodes, already sorted
            let task_ids: Vec<String> = in_degree.keys().map(|s| s.to_string()).collect();
            return Err(SyncError::CyclicDependency { task_ids });
        }
        Ok(layers)
    }
}

/// Turns a set of task configs into execution layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Layers such that every task's (in-set) dependencies sit in a strictly
    /// earlier layer. A cycle is a [`SyncError::CyclicDependency`] naming
    /// every task that could not be placed.
    pub fn resolve(&self, tasks: &[TaskConfig]) -> Result<Vec<Vec<String>>, SyncError> {
        let graph = DependencyGraph::from_configs(tasks);
        let layers = graph.layers()?;
        tracing::debug!(tasks = graph.len(), layers = layers.len(), "dependencies resolved");
        Ok(layers)
    }
}
