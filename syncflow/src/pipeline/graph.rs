//! Dependency graph between steps.
//!
//! Derived 1:1 from the pipeline's steps and kept in insertion order so
//! scheduling decisions are deterministic.

use crate::errors::PipelineConfigError;
use std::collections::{HashMap, HashSet};

/// Step id to dependency ids, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from `(id, dependencies)` pairs.
    pub fn from_edges<I, S, D>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut graph = Self::new();
        for (id, deps) in edges {
            graph.insert(id, deps.into_iter().map(Into::into).collect());
        }
        graph
    }

    /// Adds or replaces a node.
    pub fn insert(&mut self, id: impl Into<String>, dependencies: Vec<String>) {
        let id = id.into();
        if !self.dependencies.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.dependencies.insert(id, dependencies);
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the node ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Returns the dependencies of a node.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Checks the graph is acyclic and every dependency exists.
    ///
    /// Cycles are reported first; the error carries the cycle path with the
    /// first id repeated at the end.
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        if let Some(path) = self.find_cycle() {
            return Err(PipelineConfigError::Cycle { path });
        }

        for id in &self.order {
            for dep in self.dependencies_of(id) {
                if !self.dependencies.contains_key(dep) {
                    return Err(PipelineConfigError::MissingDependency {
                        step: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        fn visit(
            node: &str,
            graph: &DependencyGraph,
            marks: &mut HashMap<String, Mark>,
            stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| n == node).unwrap_or(0);
                    let mut path = stack[start..].to_vec();
                    path.push(node.to_string());
                    return Some(path);
                }
                None => {}
            }

            // Unknown ids are leaves; validate reports them separately.
            if !graph.dependencies.contains_key(node) {
                return None;
            }

            marks.insert(node.to_string(), Mark::Visiting);
            stack.push(node.to_string());

            for dep in graph.dependencies_of(node) {
                if let Some(path) = visit(dep, graph, marks, stack) {
                    return Some(path);
                }
            }

            stack.pop();
            marks.insert(node.to_string(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        self.order
            .iter()
            .find_map(|id| visit(id, self, &mut marks, &mut stack))
    }

    /// Steps not in `executed` whose dependencies are all in `executed`.
    ///
    /// Ordered by ascending dependency count, ties by insertion order.
    #[must_use]
    pub fn ready_steps(&self, executed: &HashSet<String>) -> Vec<String> {
        let mut ready: Vec<&String> = self
            .order
            .iter()
            .filter(|id| !executed.contains(*id))
            .filter(|id| {
                self.dependencies_of(id)
                    .iter()
                    .all(|dep| executed.contains(dep))
            })
            .collect();
        ready.sort_by_key(|id| self.dependencies_of(id).len());
        ready.into_iter().cloned().collect()
    }

    /// For each step not in `executed`, the dependencies not yet executed.
    ///
    /// Steps with nothing outstanding are omitted.
    #[must_use]
    pub fn unresolved_dependencies(&self, executed: &HashSet<String>) -> Vec<(String, Vec<String>)> {
        self.order
            .iter()
            .filter(|id| !executed.contains(*id))
            .filter_map(|id| {
                let missing: Vec<String> = self
                    .dependencies_of(id)
                    .iter()
                    .filter(|dep| !executed.contains(*dep))
                    .cloned()
                    .collect();
                (!missing.is_empty()).then(|| (id.clone(), missing))
            })
            .collect()
    }

    /// Steps that can never run because a dependency, direct or transitive,
    /// is in `dead`.
    ///
    /// Steps already in `settled` or `dead` are not reported.
    #[must_use]
    pub fn blocked_steps(&self, dead: &HashSet<String>, settled: &HashSet<String>) -> Vec<String> {
        let mut unreachable: HashSet<&str> = dead.iter().map(String::as_str).collect();
        let mut blocked: Vec<String> = Vec::new();

        loop {
            let before = blocked.len();
            for id in &self.order {
                if unreachable.contains(id.as_str()) || settled.contains(id) {
                    continue;
                }
                if self
                    .dependencies_of(id)
                    .iter()
                    .any(|dep| unreachable.contains(dep.as_str()))
                {
                    unreachable.insert(id.as_str());
                    blocked.push(id.clone());
                }
            }
            if blocked.len() == before {
                break;
            }
        }

        blocked.sort_by_key(|id| self.order.iter().position(|o| o == id));
        blocked
    }

    /// Topological order, dependencies first, insertion order among peers.
    ///
    /// Assumes the graph validated.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        fn visit(
            node: &str,
            graph: &DependencyGraph,
            visited: &mut HashSet<String>,
            result: &mut Vec<String>,
        ) {
            if !visited.insert(node.to_string()) {
                return;
            }
            for dep in graph.dependencies_of(node) {
                visit(dep, graph, visited, result);
            }
            if graph.dependencies.contains_key(node) {
                result.push(node.to_string());
            }
        }

        let mut visited = HashSet::new();
        let mut result = Vec::with_capacity(self.order.len());
        for id in &self.order {
            visit(id, self, &mut visited, &mut result);
        }
        result
    }
}
