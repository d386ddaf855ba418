//! A small generic dependency graph, shared by the resolver (C5) and the
//! parallel dispatcher (C7).
//!
//! Grounded on the shape of Cargo's `Resolve`/`Graph<N, E>` pair
//! (`core/resolver/resolve.rs`: a node set plus per-node edge lists, with
//! `path_to_top` and iteration over the full node set) — that file's own
//! `util::graph::Graph` was not itself among the retrieved sources, so this
//! is a fresh implementation of the same interface shape rather than a
//! port, built on `indexmap` for deterministic iteration order instead of
//! a hand-rolled adjacency list.

use std::fmt;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

/// Directed graph where an edge `a -> b` means "a depends on b". Nodes with
/// no outgoing edges are leaves (buildable first); nodes with no incoming
/// edges are roots.
#[derive(Debug, Clone)]
pub struct DependencyGraph<N: Eq + Hash + Clone> {
    nodes: IndexSet<N>,
    edges: IndexMap<N, IndexSet<N>>,
}

impl<N: Eq + Hash + Clone> Default for DependencyGraph<N> {
    fn default() -> Self {
        DependencyGraph { nodes: IndexSet::new(), edges: IndexMap::new() }
    }
}

impl<N: Eq + Hash + Clone + fmt::Debug> DependencyGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N) {
        self.nodes.insert(node.clone());
        self.edges.entry(node).or_default();
    }

    /// Record that `from` depends on `to`; both nodes are added if absent.
    pub fn add_edge(&mut self, from: N, to: N) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.edges.entry(from).or_default().insert(to);
    }

    pub fn contains(&self, node: &N) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &N> {
        self.nodes.iter()
    }

    /// The direct dependencies of `node` (outgoing edges), in insertion order.
    pub fn dependencies_of(&self, node: &N) -> impl Iterator<Item = &N> {
        self.edges.get(node).into_iter().flat_map(|set| set.iter())
    }

    /// The direct dependents of `node` (incoming edges) — everything that
    /// would need `node` installed first.
    pub fn dependents_of<'a>(&'a self, node: &'a N) -> impl Iterator<Item = &'a N> {
        self.edges.iter().filter(move |(_, deps)| deps.contains(node)).map(|(from, _)| from)
    }

    /// One path from `node` up to a root (a node nothing depends on),
    /// following dependents — used to report "needed by X needed by Y"
    /// chains in dependency-resolution error messages.
    pub fn path_to_root(&self, node: &N) -> Vec<N> {
        let mut path = vec![node.clone()];
        let mut current = node.clone();
        let mut seen = IndexSet::new();
        seen.insert(current.clone());
        loop {
            match self.dependents_of(&current).next() {
                Some(next) if !seen.contains(next) => {
                    path.push(next.clone());
                    seen.insert(next.clone());
                    current = next.clone();
                }
                _ => break,
            }
        }
        path
    }

    /// Kahn's algorithm: dependency-first order (leaves before the things
    /// that depend on them). Ties are broken by each node's position in
    /// [`Ord`] when `N: Ord`, via the caller pre-sorting `ready` — here we
    /// just preserve insertion order for determinism across runs with the
    /// same input. Returns `Err` with the set of nodes still involved in a
    /// cycle when the graph isn't a DAG.
    pub fn topo_order(&self) -> Result<Vec<N>, Vec<N>> {
        // "in_degree" here counts each node's number of unresolved
        // dependencies, i.e. its out-degree in the `from -> to` = "depends
        // on" encoding — a node is ready once all its dependencies have
        // been emitted.
        let in_degree: IndexMap<N, usize> =
            self.nodes.iter().map(|n| (n.clone(), self.edges.get(n).map_or(0, |d| d.len()))).collect();

        let mut ready: Vec<N> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| n.clone()).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut remaining = in_degree.clone();

        while let Some(node) = ready.pop() {
            order.push(node.clone());
            remaining.remove(&node);
            for dependent in self.dependents_of(&node).cloned().collect::<Vec<_>>() {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(dependent);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(remaining.into_keys().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topo_order_puts_dependencies_before_dependents() {
        let mut g = DependencyGraph::new();
        g.add_edge("app", "lib");
        g.add_edge("lib", "zlib");
        let order = g.topo_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == &n).unwrap();
        assert!(pos("zlib") < pos("lib"));
        assert!(pos("lib") < pos("app"));
    }

    #[test]
    fn detects_cycles() {
        let mut g = DependencyGraph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g.add_edge("c", "a");
        let err = g.topo_order().unwrap_err();
        assert_eq!(err.len(), 3);
    }

    #[test]
    fn path_to_root_follows_dependents() {
        let mut g = DependencyGraph::new();
        g.add_edge("app", "lib");
        g.add_edge("lib", "zlib");
        let path = g.path_to_root(&"zlib");
        assert_eq!(path, vec!["zlib", "lib", "app"]);
    }

    #[test]
    fn isolated_node_has_no_dependencies_or_dependents() {
        let mut g: DependencyGraph<&str> = DependencyGraph::new();
        g.add_node("standalone");
        assert_eq!(g.dependencies_of(&"standalone").count(), 0);
        assert_eq!(g.dependents_of(&"standalone").count(), 0);
    }
}
