//! Property graph of knowledge, entities, types and descriptions.
//!
//! Nodes carry one of four labels and are identified by `(label, name)`.
//! Edges are typed; `relation` edges additionally carry the free-text
//! predicate as the `relation` property. All writes are merge-style upserts,
//! so re-ingesting the same record leaves the graph unchanged.
//!
//! - **Backends** ([`GraphBackend`]): [`MemoryGraph`] (petgraph + DashMap) for
//!   tests and single-process use, [`Neo4jGraph`] for a shared Neo4j server.
//! - **Store** ([`GraphStore`]): the retrying, failure-swallowing facade the
//!   rest of the crate talks to.

pub mod memory;
pub mod neo4j;
pub mod project;
pub mod search;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

pub use memory::MemoryGraph;
pub use neo4j::{Neo4jConfig, Neo4jGraph};
pub use project::{ProjectionStats, project_record};
pub use search::{Subgraph, SubgraphLink, SubgraphNode, search_subgraph};
pub use store::{GraphStats, GraphStore};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Name of the edge property holding a relation's predicate text.
pub const RELATION_PROPERTY: &str = "relation";

/// Node label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLabel {
    Knowledge,
    Entity,
    Type,
    Description,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 4] = [
        NodeLabel::Knowledge,
        NodeLabel::Entity,
        NodeLabel::Type,
        NodeLabel::Description,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeLabel::Knowledge => "knowledge",
            NodeLabel::Entity => "entity",
            NodeLabel::Type => "type",
            NodeLabel::Description => "description",
        }
    }

    /// Labels whose nodes are embedded into the vector index.
    pub fn is_indexed(self) -> bool {
        matches!(self, NodeLabel::Knowledge | NodeLabel::Entity)
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| format!("unknown node label: {s}"))
    }
}

/// Edge type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// entity → its description
    Description,
    /// entity → its type
    Type,
    /// entity → the knowledge statement mentioning it
    Knowledge,
    /// entity → entity, predicate in the `relation` property
    Relation,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::Description,
        EdgeKind::Type,
        EdgeKind::Knowledge,
        EdgeKind::Relation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Description => "description",
            EdgeKind::Type => "type",
            EdgeKind::Knowledge => "knowledge",
            EdgeKind::Relation => "relation",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown edge type: {s}"))
    }
}

/// A graph node. Nodes have no attributes beyond their identity, so the
/// node and its identifier are the same value.
///
/// Serialized as the string `"<label>:<name>"`, which is also the form stored
/// in the vector index identifier list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GraphNode {
    pub label: NodeLabel,
    pub name: String,
}

impl GraphNode {
    pub fn new(label: NodeLabel, name: impl Into<String>) -> Self {
        Self {
            label,
            name: name.into(),
        }
    }

    pub fn knowledge(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Knowledge, name)
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Entity, name)
    }

    pub fn kind(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Type, name)
    }

    pub fn description(name: impl Into<String>) -> Self {
        Self::new(NodeLabel::Description, name)
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.name)
    }
}

impl FromStr for GraphNode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Names may themselves contain ':'; only the first one separates.
        let (label, name) = s
            .split_once(':')
            .ok_or_else(|| format!("node id without label prefix: {s}"))?;
        Ok(Self::new(label.parse()?, name))
    }
}

impl TryFrom<String> for GraphNode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GraphNode> for String {
    fn from(node: GraphNode) -> Self {
        node.to_string()
    }
}

/// A directed, typed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: GraphNode,
    pub kind: EdgeKind,
    pub target: GraphNode,
    /// Edge properties. Part of the merge key: two edges with the same
    /// endpoints and type but different properties are distinct.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl GraphEdge {
    pub fn new(source: GraphNode, kind: EdgeKind, target: GraphNode) -> Self {
        Self {
            source,
            kind,
            target,
            properties: BTreeMap::new(),
        }
    }

    /// A `relation` edge carrying `predicate`.
    pub fn relation(source: GraphNode, predicate: &str, target: GraphNode) -> Self {
        Self::new(source, EdgeKind::Relation, target).with_property(RELATION_PROPERTY, predicate)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The predicate of a `relation` edge, if set.
    pub fn predicate(&self) -> Option<&str> {
        self.properties.get(RELATION_PROPERTY).map(String::as_str)
    }
}

/// Which way an edge points relative to the node it was looked up from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
}

/// One-hop neighbor of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// The node on the other end of the edge.
    pub node: GraphNode,
    pub edge: GraphEdge,
    pub direction: EdgeDirection,
}

/// Storage backend for the knowledge graph.
///
/// Implementations must make `merge_node` and `merge_edge` idempotent and
/// must create missing endpoints when merging an edge. Errors are returned
/// as-is; retrying and swallowing happen in [`GraphStore`].
pub trait GraphBackend: Send + Sync {
    /// Create the node if no node with the same `(label, name)` exists.
    fn merge_node(&self, node: &GraphNode) -> GraphResult<()>;

    /// Create the edge (and its endpoints) if not already present.
    fn merge_edge(&self, edge: &GraphEdge) -> GraphResult<()>;

    /// Whether the node exists.
    fn contains(&self, node: &GraphNode) -> GraphResult<bool>;

    /// All edges touching `node`, in either direction, in insertion order
    /// where the backend can provide one.
    fn neighbors(&self, node: &GraphNode) -> GraphResult<Vec<Neighbor>>;

    /// Every node carrying `label`.
    fn nodes_with_label(&self, label: NodeLabel) -> GraphResult<Vec<GraphNode>>;

    /// Every edge with an endpoint whose name contains `keyword`.
    fn edges_matching(&self, keyword: &str) -> GraphResult<Vec<GraphEdge>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
