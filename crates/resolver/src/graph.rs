//! Dependency graph and per-target topological sort.
//!
//! Nodes are numbered facts first, then targets: fact `i` is node `i`,
//! target `j` is node `nfact + j`. Edges point from a dependency to the
//! target that depends on it.

use polres_core::{FactId, NodeRef, TargetId};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// An update plan: the facts and targets of one target's subgraph in
/// dependency order, the target itself last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Facts the target transitively depends on
    pub facts: Vec<FactId>,
    /// Targets to bring up to date, in order
    pub targets: Vec<TargetId>,
}

/// An edge left over after sorting, proving a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleEdge {
    /// Dependency side of the edge
    pub from: NodeRef,
    /// Depending target
    pub to: TargetId,
}

/// Adjacency structure over facts and targets.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nfact: usize,
    /// node -> dependents
    edges: Vec<Vec<usize>>,
    /// target -> dependency nodes, as declared
    deps: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Create a graph with no edges.
    pub fn new(nfact: usize, ntarget: usize) -> Self {
        Self {
            nfact,
            edges: vec![Vec::new(); nfact + ntarget],
            deps: vec![Vec::new(); ntarget],
        }
    }

    /// Build a graph from each target's resolved dependencies.
    pub fn build(nfact: usize, dependencies: &[Vec<NodeRef>]) -> Self {
        let mut graph = Self::new(nfact, dependencies.len());
        for (index, deps) in dependencies.iter().enumerate() {
            for dep in deps {
                graph.add_edge(*dep, TargetId::new(index));
            }
        }
        for dependents in &mut graph.edges {
            dependents.sort_unstable();
        }
        debug!(
            "built dependency graph: {} facts, {} targets, {} edges",
            nfact,
            dependencies.len(),
            graph.edge_count()
        );
        graph
    }

    /// Record that `to` depends on `from`.
    pub fn add_edge(&mut self, from: NodeRef, to: TargetId) {
        let from = self.node(from);
        let to_node = self.nfact + to.index();
        self.edges[from].push(to_node);
        self.deps[to.index()].push(from);
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    fn node(&self, r: NodeRef) -> usize {
        match r {
            NodeRef::Fact(f) => f.index(),
            NodeRef::Target(t) => self.nfact + t.index(),
        }
    }

    fn node_ref(&self, node: usize) -> NodeRef {
        if node < self.nfact {
            NodeRef::Fact(FactId::new(node))
        } else {
            NodeRef::Target(TargetId::new(node - self.nfact))
        }
    }

    /// Mark the subgraph reachable from `target` through its dependencies.
    fn mark(&self, target: TargetId) -> Vec<bool> {
        let mut present = vec![false; self.edges.len()];
        let mut stack = vec![self.nfact + target.index()];

        while let Some(node) = stack.pop() {
            if present[node] {
                continue;
            }
            present[node] = true;
            if node < self.nfact {
                continue;
            }
            for &dep in &self.deps[node - self.nfact] {
                if !present[dep] {
                    stack.push(dep);
                }
            }
        }
        present
    }

    /// Produce the update plan of `target`.
    ///
    /// Kahn's algorithm over the marked subgraph; ready nodes are taken in
    /// ascending node order. The graph itself is left untouched.
    pub fn sort(&self, target: TargetId) -> Result<Plan, CycleEdge> {
        let present = self.mark(target);

        let mut indegree = vec![0usize; self.edges.len()];
        for (node, dependents) in self.edges.iter().enumerate() {
            if !present[node] {
                continue;
            }
            for &to in dependents {
                if present[to] {
                    indegree[to] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.edges.len())
            .filter(|&n| present[n] && indegree[n] == 0)
            .collect();
        let mut emitted = vec![false; self.edges.len()];
        let mut order = Vec::new();

        while let Some(node) = queue.pop_front() {
            emitted[node] = true;
            order.push(node);
            for &to in &self.edges[node] {
                if !present[to] {
                    continue;
                }
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    queue.push_back(to);
                }
            }
        }

        for (index, deps) in self.deps.iter().enumerate() {
            let to = self.nfact + index;
            if !present[to] || emitted[to] {
                continue;
            }
            if let Some(&from) = deps.iter().find(|&&d| present[d] && !emitted[d]) {
                let edge = CycleEdge {
                    from: self.node_ref(from),
                    to: TargetId::new(index),
                };
                warn!("cycle while sorting {}: {:?} -> {}", target, edge.from, edge.to);
                return Err(edge);
            }
        }

        let mut plan = Plan::default();
        for node in order {
            match self.node_ref(node) {
                NodeRef::Fact(f) => plan.facts.push(f),
                NodeRef::Target(t) => plan.targets.push(t),
            }
        }
        debug!("sorted {}: {:?}", target, plan.targets);
        Ok(plan)
    }
}
