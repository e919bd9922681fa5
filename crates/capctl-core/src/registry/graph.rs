//! Capability dependency graph.
//!
//! Two adjacency maps are kept in lockstep: `dependencies` (capability → what
//! it depends on) and `dependents` (capability → what depends on it). Every
//! edge is written to both or to neither.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::domain::error::{CapctlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: HashMap<String, BTreeSet<String>>,
    dependents: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path `[id, dep, ..., id]` if giving `id` the dependencies `deps`
    /// would close a cycle.
    pub fn find_cycle(&self, id: &str, deps: &[String]) -> Option<Vec<String>> {
        for dep in deps {
            if dep == id {
                return Some(vec![id.to_string(), id.to_string()]);
            }
            let mut visited = HashSet::new();
            let mut path = vec![id.to_string()];
            if self.reaches(dep, id, &mut visited, &mut path) {
                return Some(path);
            }
        }
        None
    }

    fn reaches(
        &self,
        node: &str,
        target: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        path.push(node.to_string());
        if node == target {
            return true;
        }
        if visited.insert(node.to_string()) {
            if let Some(next) = self.dependencies.get(node) {
                for n in next {
                    if self.reaches(n, target, visited, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }

    /// Replace the dependency set of `id`. Fails before mutating anything if
    /// the new edges would form a cycle.
    pub fn set_dependencies(&mut self, id: &str, deps: &[String]) -> Result<()> {
        if let Some(path) = self.find_cycle(id, deps) {
            return Err(CapctlError::CyclicDependency { path });
        }
        self.clear_dependencies(id);
        let entry = self.dependencies.entry(id.to_string()).or_default();
        for dep in deps {
            entry.insert(dep.clone());
        }
        for dep in deps {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(id.to_string());
        }
        Ok(())
    }

    fn clear_dependencies(&mut self, id: &str) {
        if let Some(old) = self.dependencies.remove(id) {
            for dep in old {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(id);
                    if set.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
        }
    }

    /// Drop `id` and its outgoing edges. Incoming edges from remaining
    /// dependents are kept so they still resolve as unmet dependencies.
    pub fn remove(&mut self, id: &str) {
        self.clear_dependencies(id);
    }

    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.dependencies
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.dependents
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All capabilities that depend on `id`, directly or transitively.
    pub fn transitive_dependents_of(&self, id: &str) -> Vec<String> {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.dependents.get(&current) {
                for d in deps {
                    if d != id && visited.insert(d.clone()) {
                        queue.push_back(d.clone());
                    }
                }
            }
        }
        visited.into_iter().collect()
    }

    /// Length of the longest dependency chain below `id` (0 for a leaf).
    pub fn depth(&self, id: &str) -> Result<usize> {
        let mut colors: HashMap<String, Color> = HashMap::new();
        let mut memo: HashMap<String, usize> = HashMap::new();
        let mut stack = Vec::new();
        self.depth_visit(id, &mut colors, &mut memo, &mut stack)
    }

    fn depth_visit(
        &self,
        node: &str,
        colors: &mut HashMap<String, Color>,
        memo: &mut HashMap<String, usize>,
        stack: &mut Vec<String>,
    ) -> Result<usize> {
        match colors.get(node).copied().unwrap_or(Color::White) {
            Color::Black => return Ok(memo.get(node).copied().unwrap_or(0)),
            Color::Gray => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].to_vec();
                path.push(node.to_string());
                return Err(CapctlError::CyclicDependency { path });
            }
            Color::White => {}
        }

        colors.insert(node.to_string(), Color::Gray);
        stack.push(node.to_string());
        let mut depth = 0;
        if let Some(deps) = self.dependencies.get(node) {
            for dep in deps {
                depth = depth.max(1 + self.depth_visit(dep, colors, memo, stack)?);
            }
        }
        stack.pop();
        colors.insert(node.to_string(), Color::Black);
        memo.insert(node.to_string(), depth);
        Ok(depth)
    }

    /// Every dependents entry has a matching dependencies entry and vice versa.
    pub fn is_symmetric(&self) -> bool {
        let forward = self.dependencies.iter().all(|(id, deps)| {
            deps.iter()
                .all(|d| self.dependents.get(d).is_some_and(|s| s.contains(id)))
        });
        let backward = self.dependents.iter().all(|(id, users)| {
            users
                .iter()
                .all(|u| self.dependencies.get(u).is_some_and(|s| s.contains(id)))
        });
        forward && backward
    }

    #[cfg(test)]
    fn force_edge(&mut self, from: &str, to: &str) {
        self.dependencies
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.dependents
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn chain() -> DependencyGraph {
        // a -> b -> c
        let mut g = DependencyGraph::new();
        g.set_dependencies("c", &[]).unwrap();
        g.set_dependencies("b", &deps(&["c"])).unwrap();
        g.set_dependencies("a", &deps(&["b"])).unwrap();
        g
    }

    #[test]
    fn test_depth_of_chain() {
        let g = chain();
        assert_eq!(g.depth("c").unwrap(), 0);
        assert_eq!(g.depth("b").unwrap(), 1);
        assert_eq!(g.depth("a").unwrap(), 2);
        assert_eq!(g.depth("unknown").unwrap(), 0);
    }

    #[test]
    fn test_cycle_rejected_without_mutation() {
        let mut g = chain();
        let err = g.set_dependencies("c", &deps(&["a"])).unwrap_err();
        match err {
            CapctlError::CyclicDependency { path } => {
                assert_eq!(path, deps(&["c", "a", "b", "c"]));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(g.dependencies_of("c").is_empty());
        assert!(g.is_symmetric());
    }

    #[test]
    fn test_depth_reports_cycle_path() {
        let mut g = DependencyGraph::new();
        g.force_edge("x", "y");
        g.force_edge("y", "x");
        match g.depth("x").unwrap_err() {
            CapctlError::CyclicDependency { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_replace_and_remove_keep_symmetry() {
        let mut g = chain();
        g.set_dependencies("a", &deps(&["c"])).unwrap();
        assert!(g.dependents_of("b").is_empty());
        assert_eq!(g.dependents_of("c"), deps(&["a", "b"]));
        assert!(g.is_symmetric());

        g.remove("a");
        assert_eq!(g.dependents_of("c"), deps(&["b"]));
        assert!(g.is_symmetric());
    }

    #[test]
    fn test_transitive_dependents() {
        let g = chain();
        assert_eq!(g.transitive_dependents_of("c"), deps(&["a", "b"]));
        assert!(g.transitive_dependents_of("a").is_empty());
    }

    #[test]
    fn test_diamond_depth() {
        let mut g = DependencyGraph::new();
        g.set_dependencies("d", &[]).unwrap();
        g.set_dependencies("b", &deps(&["d"])).unwrap();
        g.set_dependencies("c", &deps(&["d"])).unwrap();
        g.set_dependencies("a", &deps(&["b", "c"])).unwrap();
        assert_eq!(g.depth("a").unwrap(), 2);
    }
}
