// src/resolver/graph.rs

//! Arena-backed dependency graph
//!
//! Nodes live in a `Vec` indexed by `NodeId`; a name interner maps package
//! names to ids. Edges are id lists, which keeps the graph cheap to copy
//! and makes cycle-path reporting straightforward. Topological ordering is
//! an iterative DFS with white/gray/black coloring; a gray→gray edge is a
//! cycle. Siblings are visited in name order so results are reproducible.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
struct Node {
    name: String,
    /// Outgoing dependency edges (this node depends on these)
    deps: Vec<NodeId>,
    /// Incoming edges (these nodes depend on this one)
    dependents: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Dependency graph over package names
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, creating its node on first sight
    pub fn add_node(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            deps: Vec::new(),
            dependents: Vec::new(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Record `from` depends on `to`
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes[from.0].deps.contains(&to) {
            self.nodes[from.0].deps.push(to);
            self.nodes[to.0].dependents.push(from);
        }
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn name_of(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies, name-sorted
    pub fn deps_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps = self.nodes[id.0].deps.clone();
        deps.sort_by(|a, b| self.name_of(*a).cmp(self.name_of(*b)));
        deps
    }

    /// Direct dependents, name-sorted
    pub fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut dependents = self.nodes[id.0].dependents.clone();
        dependents.sort_by(|a, b| self.name_of(*a).cmp(self.name_of(*b)));
        dependents
    }

    /// All edges as (from, to) name pairs, for `--graph` output
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for node in &self.nodes {
            for dep in &node.deps {
                edges.push((node.name.clone(), self.name_of(*dep).to_string()));
            }
        }
        edges
    }

    /// Topological order of everything reachable from `roots`:
    /// dependencies before dependents. A cycle surfaces as
    /// `Error::CycleDetected` naming the gray path.
    pub fn topo_order(&self, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut colors = vec![Color::White; self.nodes.len()];
        let mut order = Vec::new();
        // gray stack mirrors the DFS path for cycle reporting
        let mut path: Vec<NodeId> = Vec::new();

        let mut sorted_roots = roots.to_vec();
        sorted_roots.sort_by(|a, b| self.name_of(*a).cmp(self.name_of(*b)));
        sorted_roots.dedup();

        for root in sorted_roots {
            if colors[root.0] != Color::White {
                continue;
            }
            // frame: (node, its sorted children, next child index)
            let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();
            colors[root.0] = Color::Gray;
            path.push(root);
            stack.push((root, self.deps_of(root), 0));

            loop {
                // take the next unvisited child of the top frame, if any
                let next_child = match stack.last_mut() {
                    Some((_, children, cursor)) => {
                        let child = children.get(*cursor).copied();
                        if child.is_some() {
                            *cursor += 1;
                        }
                        child
                    }
                    None => break,
                };
                match next_child {
                    Some(child) => match colors[child.0] {
                        Color::White => {
                            colors[child.0] = Color::Gray;
                            path.push(child);
                            let grandchildren = self.deps_of(child);
                            stack.push((child, grandchildren, 0));
                        }
                        Color::Gray => {
                            return Err(self.cycle_error(&path, child));
                        }
                        Color::Black => {}
                    },
                    None => {
                        let (node, _, _) = stack.pop().expect("frame exists");
                        colors[node.0] = Color::Black;
                        order.push(node);
                        path.pop();
                    }
                }
            }
        }
        Ok(order)
    }

    /// Transitive closure of dependents (everything that would break)
    pub fn dependents_closure(&self, start: NodeId) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = vec![start];
        let mut closure = Vec::new();
        while let Some(id) = queue.pop() {
            for &dependent in &self.nodes[id.0].dependents {
                if !seen[dependent.0] {
                    seen[dependent.0] = true;
                    closure.push(dependent);
                    queue.push(dependent);
                }
            }
        }
        closure.sort_by(|a, b| self.name_of(*a).cmp(self.name_of(*b)));
        closure
    }

    fn cycle_error(&self, path: &[NodeId], closing: NodeId) -> Error {
        let start = path.iter().position(|&id| id == closing).unwrap_or(0);
        let mut names: Vec<String> = path[start..]
            .iter()
            .map(|&id| self.name_of(id).to_string())
            .collect();
        names.push(self.name_of(closing).to_string());
        Error::CycleDetected { path: names }
    }
}
