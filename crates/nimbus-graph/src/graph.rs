//! Dependency graph model.
//!
//! Nodes are keyed by [`ResourceRef`]; edges by `(from, to, relation)`. The
//! same edge discovered twice is stored once, and a confirmed sighting
//! supersedes a tentative one.

use nimbus_core::ResourceRef;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Typed relationship between two resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    Uses,
    IsUsedBy,
    Contains,
    SecuredBy,
    DeployedTo,
    References,
    Triggers,
    StoresIn,
}

impl Relation {
    pub fn as_str(self) -> &'static str {
        match self {
            Relation::Uses => "USES",
            Relation::IsUsedBy => "IS_USED_BY",
            Relation::Contains => "CONTAINS",
            Relation::SecuredBy => "SECURED_BY",
            Relation::DeployedTo => "DEPLOYED_TO",
            Relation::References => "REFERENCES",
            Relation::Triggers => "TRIGGERS",
            Relation::StoresIn => "STORES_IN",
        }
    }

    /// Whether the edge's `from` end depends on its `to` end.
    ///
    /// `instance SECURED_BY group`: the instance depends on the group.
    /// `vpc CONTAINS subnet`: the subnet depends on the vpc.
    pub fn source_depends_on_target(self) -> bool {
        matches!(
            self,
            Relation::Uses
                | Relation::SecuredBy
                | Relation::DeployedTo
                | Relation::References
                | Relation::StoresIn
        )
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sure the builder is that an edge exists.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Both ends were confirmed by a describe call.
    #[default]
    Confirmed,
    /// Inferred from a loose match or an endpoint that could not be checked.
    Tentative,
}

/// One directed, typed edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: ResourceRef,
    pub to: ResourceRef,
    pub relation: Relation,
    pub confidence: Confidence,
}

impl DependencyEdge {
    pub fn new(from: ResourceRef, to: ResourceRef, relation: Relation) -> Self {
        Self {
            from,
            to,
            relation,
            confidence: Confidence::Confirmed,
        }
    }

    pub fn tentative(mut self) -> Self {
        self.confidence = Confidence::Tentative;
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    /// `(dependent, dependency)` for this edge.
    pub fn dependency_pair(&self) -> (&ResourceRef, &ResourceRef) {
        if self.relation.source_depends_on_target() {
            (&self.from, &self.to)
        } else {
            (&self.to, &self.from)
        }
    }
}

/// Per-node bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub resource: ResourceRef,
    /// Hops from the root at discovery.
    pub depth: usize,
    /// A describe call confirmed the resource exists.
    pub confirmed: bool,
    /// Some neighbours of this node may be missing.
    pub truncated: bool,
}

type EdgeKey = (ResourceRef, ResourceRef, Relation);

/// Directed graph of resources reachable from a root.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    root: ResourceRef,
    nodes: BTreeMap<ResourceRef, NodeInfo>,
    edges: BTreeMap<EdgeKey, Confidence>,
    outgoing: BTreeMap<ResourceRef, BTreeSet<EdgeKey>>,
    incoming: BTreeMap<ResourceRef, BTreeSet<EdgeKey>>,
    cancelled: bool,
}

impl DependencyGraph {
    /// A graph holding only the (confirmed) root.
    pub fn new(root: ResourceRef) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root.clone(),
            NodeInfo {
                resource: root.clone(),
                depth: 0,
                confirmed: true,
                truncated: false,
            },
        );
        Self {
            root,
            nodes,
            edges: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            cancelled: false,
        }
    }

    pub fn root(&self) -> &ResourceRef {
        &self.root
    }

    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.nodes.contains_key(resource)
    }

    pub fn node(&self, resource: &ResourceRef) -> Option<&NodeInfo> {
        self.nodes.get(resource)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add a node, or merge with the existing one. Returns `true` if new.
    pub fn add_node(&mut self, resource: ResourceRef, depth: usize, confirmed: bool) -> bool {
        match self.nodes.get_mut(&resource) {
            Some(existing) => {
                existing.depth = existing.depth.min(depth);
                existing.confirmed |= confirmed;
                false
            }
            None => {
                self.nodes.insert(
                    resource.clone(),
                    NodeInfo {
                        resource,
                        depth,
                        confirmed,
                        truncated: false,
                    },
                );
                true
            }
        }
    }

    pub fn mark_truncated(&mut self, resource: &ResourceRef) {
        if let Some(node) = self.nodes.get_mut(resource) {
            node.truncated = true;
        }
    }

    /// Add an edge between two existing nodes.
    ///
    /// Returns `false` when an endpoint is unknown or nothing changed.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> bool {
        if !self.contains(&edge.from) || !self.contains(&edge.to) {
            return false;
        }
        let key = (edge.from.clone(), edge.to.clone(), edge.relation);
        match self.edges.get_mut(&key) {
            Some(existing) if *existing == Confidence::Tentative && edge.confidence == Confidence::Confirmed => {
                *existing = Confidence::Confirmed;
                true
            }
            Some(_) => false,
            None => {
                self.edges.insert(key.clone(), edge.confidence);
                self.outgoing
                    .entry(edge.from)
                    .or_default()
                    .insert(key.clone());
                self.incoming.entry(edge.to).or_default().insert(key);
                true
            }
        }
    }

    /// All edges, sorted.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.edges.iter().map(to_edge).collect()
    }

    /// Edges leaving `resource`.
    pub fn outgoing(&self, resource: &ResourceRef) -> Vec<DependencyEdge> {
        self.collect(self.outgoing.get(resource))
    }

    /// Edges arriving at `resource`. Empty when nothing points at it.
    pub fn incoming(&self, resource: &ResourceRef) -> Vec<DependencyEdge> {
        self.collect(self.incoming.get(resource))
    }

    /// Every edge touching `resource`, in either direction.
    pub fn edges_of(&self, resource: &ResourceRef) -> Vec<DependencyEdge> {
        let mut edges = self.outgoing(resource);
        edges.extend(self.incoming(resource));
        edges.sort();
        edges.dedup();
        edges
    }

    fn collect(&self, keys: Option<&BTreeSet<EdgeKey>>) -> Vec<DependencyEdge> {
        keys.into_iter()
            .flatten()
            .filter_map(|key| self.edges.get_key_value(key))
            .map(to_edge)
            .collect()
    }

    /// Some node may be missing neighbours.
    pub fn is_truncated(&self) -> bool {
        self.cancelled || self.nodes.values().any(|n| n.truncated)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }
}

fn to_edge((key, confidence): (&EdgeKey, &Confidence)) -> DependencyEdge {
    DependencyEdge {
        from: key.0.clone(),
        to: key.1.clone(),
        relation: key.2,
        confidence: *confidence,
    }
}

#[derive(Serialize)]
struct GraphView<'a> {
    root: &'a ResourceRef,
    nodes: Vec<&'a NodeInfo>,
    edges: Vec<DependencyEdge>,
    truncated: bool,
    cancelled: bool,
}

impl Serialize for DependencyGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GraphView {
            root: &self.root,
            nodes: self.nodes.values().collect(),
            edges: self.edges(),
            truncated: self.is_truncated(),
            cancelled: self.cancelled,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::AccountRef;

    fn sg(id: &str) -> ResourceRef {
        ResourceRef::new("ec2", "security-group", id, "us-east-1", AccountRef::new("1"))
    }

    #[test]
    fn test_duplicate_edges_are_stored_once() {
        let (a, b) = (sg("sg-a"), sg("sg-b"));
        let mut graph = DependencyGraph::new(a.clone());
        graph.add_node(b.clone(), 1, true);

        assert!(graph.add_edge(DependencyEdge::new(a.clone(), b.clone(), Relation::References)));
        assert!(!graph.add_edge(DependencyEdge::new(a.clone(), b.clone(), Relation::References)));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_confirmed_supersedes_tentative() {
        let (a, b) = (sg("sg-a"), sg("sg-b"));
        let mut graph = DependencyGraph::new(a.clone());
        graph.add_node(b.clone(), 1, true);

        graph.add_edge(DependencyEdge::new(a.clone(), b.clone(), Relation::Uses).tentative());
        assert_eq!(graph.edges()[0].confidence, Confidence::Tentative);
        assert!(graph.add_edge(DependencyEdge::new(a.clone(), b.clone(), Relation::Uses)));
        assert_eq!(graph.edges()[0].confidence, Confidence::Confirmed);
        // A later tentative sighting does not downgrade it.
        assert!(!graph.add_edge(DependencyEdge::new(a, b, Relation::Uses).tentative()));
        assert_eq!(graph.edges()[0].confidence, Confidence::Confirmed);
    }

    #[test]
    fn test_edges_need_known_endpoints() {
        let mut graph = DependencyGraph::new(sg("sg-a"));
        assert!(!graph.add_edge(DependencyEdge::new(sg("sg-a"), sg("sg-x"), Relation::Uses)));
        assert!(graph.incoming(&sg("sg-a")).is_empty());
    }

    #[test]
    fn test_node_merge_keeps_shallowest_depth() {
        let mut graph = DependencyGraph::new(sg("sg-a"));
        assert!(graph.add_node(sg("sg-b"), 2, false));
        assert!(!graph.add_node(sg("sg-b"), 1, true));
        let node = graph.node(&sg("sg-b")).unwrap();
        assert_eq!(node.depth, 1);
        assert!(node.confirmed);
    }

    #[test]
    fn test_dependency_pair_direction() {
        let (a, b) = (sg("sg-a"), sg("sg-b"));
        let uses = DependencyEdge::new(a.clone(), b.clone(), Relation::SecuredBy);
        assert_eq!(uses.dependency_pair(), (&a, &b));
        let contains = DependencyEdge::new(a.clone(), b.clone(), Relation::Contains);
        assert_eq!(contains.dependency_pair(), (&b, &a));
    }

    #[test]
    fn test_serializes_edges_and_flags() {
        let (a, b) = (sg("sg-a"), sg("sg-b"));
        let mut graph = DependencyGraph::new(a.clone());
        graph.add_node(b.clone(), 1, true);
        graph.add_edge(DependencyEdge::new(a, b.clone(), Relation::References));
        graph.mark_truncated(&b);

        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value["edges"][0]["relation"], "REFERENCES");
        assert_eq!(value["truncated"], true);
        assert_eq!(value["cancelled"], false);
        assert_eq!(value["nodes"].as_array().unwrap().len(), 2);
    }
}
