//! Dependency graph over handler registrations and its topological orders.
//!
//! Nodes are handler paths in declaration order; an edge `a -> b` means `b`
//! is a prerequisite of `a`. Orders are computed with a depth-first
//! post-order walk that visits prerequisites in declaration order, so
//! independent handlers keep the order they were declared in.

use crate::error::{RegistryError, RegistryKind};
use fwd_types::SchemaPath;
use std::collections::{BTreeSet, HashMap};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Prerequisites first (creates and updates).
    Apply,
    /// Exact reverse of Apply (deletes).
    Delete,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Immutable, acyclic dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    kind: RegistryKind,
    nodes: Vec<SchemaPath>,
    index: HashMap<SchemaPath, usize>,
    prerequisites: Vec<Vec<usize>>,
    full_order: Vec<usize>,
    position: Vec<usize>,
}

impl DependencyGraph {
    /// Builds the graph from nodes in declaration order and edges
    /// `(dependent, prerequisite)` given as node indexes.
    ///
    /// Fails with [`RegistryError::DependencyCycle`] listing every node that
    /// lies on a cycle.
    pub fn build(
        kind: RegistryKind,
        nodes: Vec<SchemaPath>,
        edges: impl IntoIterator<Item = (usize, usize)>,
    ) -> Result<Self, RegistryError> {
        let mut prerequisites: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        for (dependent, prerequisite) in edges {
            prerequisites[dependent].insert(prerequisite);
        }
        let prerequisites: Vec<Vec<usize>> = prerequisites
            .into_iter()
            .map(|set| set.into_iter().collect())
            .collect();

        let on_cycle = cyclic_nodes(&prerequisites);
        if !on_cycle.is_empty() {
            return Err(RegistryError::DependencyCycle {
                kind,
                paths: on_cycle.into_iter().map(|i| nodes[i].clone()).collect(),
            });
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, path)| (path.clone(), i))
            .collect();
        let mut graph = Self {
            kind,
            nodes,
            index,
            prerequisites,
            full_order: Vec::new(),
            position: Vec::new(),
        };
        let all: Vec<usize> = (0..graph.nodes.len()).collect();
        graph.full_order = graph.walk(&all)?;
        graph.position = vec![0; graph.nodes.len()];
        for (position, &node) in graph.full_order.iter().enumerate() {
            graph.position[node] = position;
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &SchemaPath) -> bool {
        self.index.contains_key(path)
    }

    /// The Apply order over every node.
    pub fn full_order(&self) -> Vec<&SchemaPath> {
        self.full_order.iter().map(|&i| &self.nodes[i]).collect()
    }

    /// Position of `path` in the full Apply order.
    pub fn position(&self, path: &SchemaPath) -> Option<usize> {
        self.index.get(path).map(|&i| self.position[i])
    }

    /// Direct prerequisites of `path` in declaration order.
    pub fn prerequisites(&self, path: &SchemaPath) -> Vec<&SchemaPath> {
        self.index
            .get(path)
            .map(|&i| self.prerequisites[i].iter().map(|&p| &self.nodes[p]).collect())
            .unwrap_or_default()
    }

    /// Orders the given handlers. Paths that are not nodes of the graph are
    /// ignored; duplicates are reported once.
    ///
    /// Transitive prerequisites are walked even when they are not in
    /// `changed`, so the relative order of the result is always consistent
    /// with the full graph.
    pub fn order<'a>(
        &self,
        changed: impl IntoIterator<Item = &'a SchemaPath>,
        direction: OrderDirection,
    ) -> Result<Vec<SchemaPath>, RegistryError> {
        let mut selected: Vec<usize> = changed
            .into_iter()
            .filter_map(|path| self.index.get(path).copied())
            .collect();
        selected.sort_unstable();
        selected.dedup();

        let wanted: BTreeSet<usize> = selected.iter().copied().collect();
        let mut ordered: Vec<SchemaPath> = self
            .walk(&selected)?
            .into_iter()
            .filter(|i| wanted.contains(i))
            .map(|i| self.nodes[i].clone())
            .collect();
        if direction == OrderDirection::Delete {
            ordered.reverse();
        }
        Ok(ordered)
    }

    /// Post-order DFS from `roots` (in the given order).
    fn walk(&self, roots: &[usize]) -> Result<Vec<usize>, RegistryError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut out = Vec::new();
        for &root in roots {
            self.visit(root, &mut marks, &mut out)?;
        }
        Ok(out)
    }

    fn visit(&self, node: usize, marks: &mut [Mark], out: &mut Vec<usize>) -> Result<(), RegistryError> {
        match marks[node] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(RegistryError::DependencyCycle {
                    kind: self.kind,
                    paths: vec![self.nodes[node].clone()],
                })
            }
            Mark::Unvisited => {}
        }
        marks[node] = Mark::InProgress;
        for &prerequisite in &self.prerequisites[node] {
            self.visit(prerequisite, marks, out)?;
        }
        marks[node] = Mark::Done;
        out.push(node);
        Ok(())
    }
}

/// Returns every node on a cycle: members of strongly connected components
/// with more than one node plus nodes with a self loop. Sorted ascending.
fn cyclic_nodes(edges: &[Vec<usize>]) -> Vec<usize> {
    struct Tarjan<'a> {
        edges: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        cyclic: Vec<usize>,
    }

    impl Tarjan<'_> {
        fn connect(&mut self, v: usize) {
            self.index[v] = Some(self.next);
            self.lowlink[v] = self.next;
            self.next += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for &w in &self.edges[v] {
                match self.index[w] {
                    None => {
                        self.connect(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                if component.len() > 1 || self.edges[v].contains(&v) {
                    self.cyclic.extend(component);
                }
            }
        }
    }

    let n = edges.len();
    let mut tarjan = Tarjan {
        edges,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        cyclic: Vec::new(),
    };
    for v in 0..n {
        if tarjan.index[v].is_none() {
            tarjan.connect(v);
        }
    }
    tarjan.cyclic.sort_unstable();
    tarjan.cyclic
}
