// src/migration/graph.rs

//! Dependency graph over migration names
//!
//! Nodes keep their registration order, which is the tie-break for every
//! ordering computed here.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Directed "depends on" graph between migrations
#[derive(Debug, Default)]
pub struct MigrationGraph {
    /// Migration names in registration order
    nodes: Vec<String>,
    index: HashSet<String>,
    /// Map from migration to the migrations it depends on
    edges: HashMap<String, Vec<String>>,
}

impl MigrationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration node; repeated names are ignored
    pub fn add_node(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.index.insert(name.clone()) {
            self.nodes.push(name);
        }
    }

    /// Record that `from` depends on `to`
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let (from, to) = (from.into(), to.into());
        self.edges.entry(from).or_default().push(to);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn dependencies(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Dependencies naming no known migration, as `(migration, dependency)`
    pub fn missing_dependencies(&self) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                self.dependencies(node)
                    .iter()
                    .filter(|dep| !self.contains(dep))
                    .map(move |dep| (node.clone(), dep.clone()))
            })
            .collect()
    }

    /// Find a dependency cycle among known migrations
    ///
    /// The returned path starts and ends with the same migration.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for name in &self.nodes {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle_detect(name, &mut visited, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle_detect(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(name.to_string());
        stack.push(name.to_string());

        for dep in self.dependencies(name) {
            if !self.contains(dep) {
                continue;
            }
            if let Some(pos) = stack.iter().position(|n| n == dep) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) = self.dfs_cycle_detect(dep, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }

    /// Order in which the migrations can be applied from scratch
    ///
    /// Works in passes over the registration order, taking every migration
    /// whose dependencies are already placed. Every dependency must name a
    /// known migration.
    pub fn install_order(&self) -> Result<Vec<String>> {
        if let Some((_, dependency)) = self.missing_dependencies().into_iter().next() {
            return Err(Error::UnresolvedDependency(dependency));
        }

        let mut placed: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut remaining: Vec<&str> = self.nodes.iter().map(String::as_str).collect();

        while !remaining.is_empty() {
            let mut deferred = Vec::new();
            for name in remaining.iter().copied() {
                let ready = self
                    .dependencies(name)
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()));
                if ready {
                    placed.insert(name);
                    order.push(name.to_string());
                } else {
                    deferred.push(name);
                }
            }

            if deferred.len() == remaining.len() {
                let cycle = self
                    .detect_cycle()
                    .unwrap_or_else(|| deferred.iter().map(|n| n.to_string()).collect());
                return Err(Error::CircularDependency(cycle));
            }
            remaining = deferred;
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> MigrationGraph {
        let mut graph = MigrationGraph::new();
        for (name, deps) in edges {
            graph.add_node(*name);
            for dep in *deps {
                graph.add_edge(*name, *dep);
            }
        }
        graph
    }

    #[test]
    fn test_install_order_places_dependencies_first() {
        let g = graph(&[("c", &["b"]), ("a", &[]), ("b", &["a"]), ("d", &[])]);
        assert_eq!(g.install_order().unwrap(), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_missing_dependency_is_unresolved() {
        let g = graph(&[("a", &["ghost"])]);
        assert_eq!(
            g.missing_dependencies(),
            vec![("a".to_string(), "ghost".to_string())]
        );
        let err = g.install_order().unwrap_err();
        assert!(matches!(err, Error::UnresolvedDependency(name) if name == "ghost"));
    }

    #[test]
    fn test_cycle_detection() {
        let g = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let cycle = g.detect_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(matches!(
            g.install_order().unwrap_err(),
            Error::CircularDependency(_)
        ));

        assert!(graph(&[("a", &[]), ("b", &["a"])]).detect_cycle().is_none());
    }
}
