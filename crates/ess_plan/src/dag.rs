//! Resource dependency graph.
//!
//! Nodes are declared resources; an edge `from -> to` means `from` must be
//! realized before `to`. Edges come either from a property reference or
//! from an explicit ordering dependency. The engine performs the actual
//! scheduling; this graph only guarantees it is acyclic and resolvable.

use crate::resource::Resource;
use ess_core::{CoreError, CoreResult, ResourceId};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// A directed acyclic graph of declared resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dag {
    /// All nodes in the DAG, in declaration order
    pub nodes: IndexMap<ResourceId, Resource>,
    /// All edges (dependencies) in the DAG
    pub edges: Vec<Edge>,
}

impl Dag {
    /// Create a new empty DAG
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            edges: Vec::new(),
        }
    }

    /// Add a node to the DAG
    ///
    /// # Errors
    ///
    /// Returns error if node already exists
    pub fn add_node(&mut self, resource: Resource) -> CoreResult<()> {
        if self.nodes.contains_key(&resource.id) {
            return Err(CoreError::AlreadyExists {
                kind: "Resource".to_string(),
                id: resource.name,
            });
        }

        self.nodes.insert(resource.id, resource);
        Ok(())
    }

    /// Add an edge to the DAG; an identical edge is ignored
    ///
    /// # Errors
    ///
    /// Returns error if it would create a cycle
    pub fn add_edge(&mut self, edge: Edge) -> CoreResult<()> {
        if self.edges.contains(&edge) {
            return Ok(());
        }
        if edge.from == edge.to || self.reaches(edge.to, edge.from) {
            return Err(CoreError::Validation {
                field: "edge".to_string(),
                reason: format!(
                    "{} -> {} would create a cycle",
                    self.label(edge.from),
                    self.label(edge.to)
                ),
            });
        }

        self.edges.push(edge);
        Ok(())
    }

    /// Whether `target` is reachable from `start` along edges
    fn reaches(&self, start: ResourceId, target: ResourceId) -> bool {
        let mut visited = IndexSet::new();
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            stack.extend(self.dependents(current));
        }

        false
    }

    /// Logical name of a node, or its id when unknown
    #[must_use]
    pub fn label(&self, id: ResourceId) -> String {
        self.nodes
            .get(&id)
            .map_or_else(|| id.to_string(), |r| r.name.clone())
    }

    /// Validate the DAG structure
    ///
    /// # Errors
    ///
    /// Returns error if an edge names an unknown node or the graph has a cycle
    pub fn validate(&self) -> CoreResult<()> {
        for edge in &self.edges {
            for end in [edge.from, edge.to] {
                if !self.nodes.contains_key(&end) {
                    return Err(CoreError::NotFound {
                        kind: "Resource".to_string(),
                        id: end.to_string(),
                    });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Deterministic topological order (Kahn's algorithm, ties broken by
    /// declaration order)
    ///
    /// # Errors
    ///
    /// Returns error if the graph contains a cycle
    pub fn topological_order(&self) -> CoreResult<Vec<ResourceId>> {
        let mut in_degree: IndexMap<ResourceId, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(&edge.to) {
                *d += 1;
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut ready: Vec<ResourceId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();

        while !ready.is_empty() {
            let current = ready.remove(0);
            order.push(current);
            for next in self.dependents(current) {
                if let Some(d) = in_degree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(next);
                    }
                }
            }
            // Keep declaration order among ready nodes
            ready.sort_by_key(|id| self.nodes.get_index_of(id));
        }

        if order.len() != self.nodes.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| self.label(*id))
                .collect();
            return Err(CoreError::Validation {
                field: "dag".to_string(),
                reason: format!("cycle detected involving: {}", stuck.join(", ")),
            });
        }

        Ok(order)
    }

    /// Group nodes into apply waves: every node's dependencies lie in
    /// earlier waves, so the members of one wave are independent
    ///
    /// # Errors
    ///
    /// Returns error if the graph contains a cycle
    pub fn levels(&self) -> CoreResult<Vec<Vec<ResourceId>>> {
        let order = self.topological_order()?;
        let mut depth: IndexMap<ResourceId, usize> = IndexMap::new();
        let mut levels: Vec<Vec<ResourceId>> = Vec::new();

        for id in order {
            let level = self
                .dependencies(id)
                .iter()
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id);
        }

        Ok(levels)
    }

    /// Get node by ID
    #[must_use]
    pub fn get_node(&self, id: ResourceId) -> Option<&Resource> {
        self.nodes.get(&id)
    }

    /// Get node by logical name
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Resource> {
        self.nodes.values().find(|r| r.name == name)
    }

    /// Get nodes that depend on the given node
    #[must_use]
    pub fn dependents(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out: Vec<ResourceId> = Vec::new();
        for e in self.edges.iter().filter(|e| e.from == id) {
            if !out.contains(&e.to) {
                out.push(e.to);
            }
        }
        out
    }

    /// Get nodes that the given node depends on
    #[must_use]
    pub fn dependencies(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out: Vec<ResourceId> = Vec::new();
        for e in self.edges.iter().filter(|e| e.to == id) {
            if !out.contains(&e.from) {
                out.push(e.from);
            }
        }
        out
    }

    /// Get total node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get total edge count
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Check if DAG is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}

/// Why one resource must precede another
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// The dependent reads an attribute of the dependency
    Reference {
        /// Property on the dependent holding the reference
        property: String,
    },
    /// Declared ordering with no data flow
    Explicit,
}

/// An edge between nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Dependency
    pub from: ResourceId,
    /// Dependent
    pub to: ResourceId,
    /// Edge origin
    pub kind: EdgeKind,
}

impl Edge {
    /// Edge created by a property reference
    #[must_use]
    pub fn reference(from: ResourceId, to: ResourceId, property: impl Into<String>) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::Reference {
                property: property.into(),
            },
        }
    }

    /// Explicit ordering edge
    #[must_use]
    pub fn explicit(from: ResourceId, to: ResourceId) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::Explicit,
        }
    }
}
