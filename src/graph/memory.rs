//! In-memory graph backend.
//!
//! Uses `petgraph` for the graph structure and `DashMap` for O(1) node lookup
//! by `(label, name)`. Safe to share across ingestion workers.

use std::collections::BTreeMap;
use std::sync::RwLock;

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use super::{
    EdgeDirection, EdgeKind, GraphBackend, GraphEdge, GraphNode, GraphResult, NodeLabel, Neighbor,
};

/// Edge weight stored in the petgraph.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EdgeData {
    kind: EdgeKind,
    properties: BTreeMap<String, String>,
}

/// Knowledge graph held entirely in process memory.
pub struct MemoryGraph {
    graph: RwLock<DiGraph<GraphNode, EdgeData>>,
    node_index: DashMap<GraphNode, NodeIndex>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            node_index: DashMap::new(),
        }
    }

    /// Ensure a node exists, returning its index.
    fn ensure_node(&self, node: &GraphNode) -> NodeIndex {
        if let Some(idx) = self.node_index.get(node) {
            return *idx.value();
        }
        let mut graph = self.graph.write().expect("graph lock poisoned");
        // Another worker may have inserted it while we waited for the lock.
        if let Some(idx) = self.node_index.get(node) {
            return *idx.value();
        }
        let idx = graph.add_node(node.clone());
        self.node_index.insert(node.clone(), idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.read().expect("graph lock poisoned").edge_count()
    }

    /// Number of nodes carrying `label`.
    pub fn count_label(&self, label: NodeLabel) -> usize {
        self.node_index
            .iter()
            .filter(|entry| entry.key().label == label)
            .count()
    }

    /// Every edge in insertion order.
    pub fn all_edges(&self) -> Vec<GraphEdge> {
        let graph = self.graph.read().expect("graph lock poisoned");
        graph
            .edge_references()
            .filter_map(|e| to_edge(&graph, e.source(), e.target(), e.weight()))
            .collect()
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn to_edge(
    graph: &DiGraph<GraphNode, EdgeData>,
    source: NodeIndex,
    target: NodeIndex,
    data: &EdgeData,
) -> Option<GraphEdge> {
    Some(GraphEdge {
        source: graph.node_weight(source)?.clone(),
        kind: data.kind,
        target: graph.node_weight(target)?.clone(),
        properties: data.properties.clone(),
    })
}

impl GraphBackend for MemoryGraph {
    fn merge_node(&self, node: &GraphNode) -> GraphResult<()> {
        self.ensure_node(node);
        Ok(())
    }

    fn merge_edge(&self, edge: &GraphEdge) -> GraphResult<()> {
        let source = self.ensure_node(&edge.source);
        let target = self.ensure_node(&edge.target);
        let data = EdgeData {
            kind: edge.kind,
            properties: edge.properties.clone(),
        };

        let mut graph = self.graph.write().expect("graph lock poisoned");
        let exists = graph
            .edges_connecting(source, target)
            .any(|e| *e.weight() == data);
        if !exists {
            graph.add_edge(source, target, data);
        }
        Ok(())
    }

    fn contains(&self, node: &GraphNode) -> GraphResult<bool> {
        Ok(self.node_index.contains_key(node))
    }

    fn neighbors(&self, node: &GraphNode) -> GraphResult<Vec<Neighbor>> {
        let idx = match self.node_index.get(node) {
            Some(idx) => *idx.value(),
            None => return Ok(Vec::new()),
        };
        let graph = self.graph.read().expect("graph lock poisoned");

        let mut found: Vec<(EdgeIndex, Neighbor)> = Vec::new();
        for (dir, direction) in [
            (Direction::Outgoing, EdgeDirection::Outgoing),
            (Direction::Incoming, EdgeDirection::Incoming),
        ] {
            for e in graph.edges_directed(idx, dir) {
                // Self-loops show up in both directions; keep the outgoing one.
                if direction == EdgeDirection::Incoming && e.source() == e.target() {
                    continue;
                }
                let other = if direction == EdgeDirection::Outgoing {
                    e.target()
                } else {
                    e.source()
                };
                let (Some(edge), Some(peer)) = (
                    to_edge(&graph, e.source(), e.target(), e.weight()),
                    graph.node_weight(other),
                ) else {
                    continue;
                };
                found.push((
                    e.id(),
                    Neighbor {
                        node: peer.clone(),
                        edge,
                        direction,
                    },
                ));
            }
        }
        found.sort_by_key(|(id, _)| *id);
        Ok(found.into_iter().map(|(_, n)| n).collect())
    }

    fn nodes_with_label(&self, label: NodeLabel) -> GraphResult<Vec<GraphNode>> {
        let graph = self.graph.read().expect("graph lock poisoned");
        Ok(graph
            .node_weights()
            .filter(|node| node.label == label)
            .cloned()
            .collect())
    }

    fn edges_matching(&self, keyword: &str) -> GraphResult<Vec<GraphEdge>> {
        let graph = self.graph.read().expect("graph lock poisoned");
        Ok(graph
            .edge_references()
            .filter_map(|e| to_edge(&graph, e.source(), e.target(), e.weight()))
            .filter(|edge| edge.source.name.contains(keyword) || edge.target.name.contains(keyword))
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_node_is_idempotent() {
        let g = MemoryGraph::new();
        g.merge_node(&GraphNode::entity("胰岛素")).unwrap();
        g.merge_node(&GraphNode::entity("胰岛素")).unwrap();
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn same_name_under_different_labels_are_distinct() {
        let g = MemoryGraph::new();
        g.merge_node(&GraphNode::entity("激素")).unwrap();
        g.merge_node(&GraphNode::kind("激素")).unwrap();
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn merge_edge_creates_endpoints_and_dedupes() {
        let g = MemoryGraph::new();
        let edge = GraphEdge::relation(GraphNode::entity("胰岛素"), "分泌", GraphNode::entity("胰腺"));
        g.merge_edge(&edge).unwrap();
        g.merge_edge(&edge).unwrap();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn edges_with_different_predicates_are_distinct() {
        let g = MemoryGraph::new();
        let a = GraphNode::entity("a");
        let b = GraphNode::entity("b");
        g.merge_edge(&GraphEdge::relation(a.clone(), "r1", b.clone())).unwrap();
        g.merge_edge(&GraphEdge::relation(a, "r2", b)).unwrap();
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn neighbors_cover_both_directions_in_insertion_order() {
        let g = MemoryGraph::new();
        let a = GraphNode::entity("a");
        let b = GraphNode::entity("b");
        let c = GraphNode::entity("c");
        g.merge_edge(&GraphEdge::relation(a.clone(), "r", b.clone())).unwrap();
        g.merge_edge(&GraphEdge::relation(c.clone(), "s", a.clone())).unwrap();
        g.merge_edge(&GraphEdge::relation(a.clone(), "t", a.clone())).unwrap();

        let n = g.neighbors(&a).unwrap();
        assert_eq!(n.len(), 3);
        assert_eq!(n[0].node, b);
        assert_eq!(n[0].direction, EdgeDirection::Outgoing);
        assert_eq!(n[1].node, c);
        assert_eq!(n[1].direction, EdgeDirection::Incoming);
        assert_eq!(n[2].node, a);
    }

    #[test]
    fn neighbors_of_unknown_node_is_empty() {
        let g = MemoryGraph::new();
        assert!(g.neighbors(&GraphNode::entity("ghost")).unwrap().is_empty());
    }

    #[test]
    fn edges_matching_checks_both_endpoints() {
        let g = MemoryGraph::new();
        g.merge_edge(&GraphEdge::relation(GraphNode::entity("胰岛素"), "分泌", GraphNode::entity("胰腺")))
            .unwrap();
        g.merge_edge(&GraphEdge::relation(GraphNode::entity("肝脏"), "储存", GraphNode::entity("糖原")))
            .unwrap();
        assert_eq!(g.edges_matching("胰").unwrap().len(), 1);
        assert_eq!(g.edges_matching("糖").unwrap().len(), 1);
        assert!(g.edges_matching("心脏").unwrap().is_empty());
    }

    #[test]
    fn nodes_with_label_filters() {
        let g = MemoryGraph::new();
        g.merge_node(&GraphNode::entity("a")).unwrap();
        g.merge_node(&GraphNode::knowledge("k")).unwrap();
        g.merge_node(&GraphNode::entity("b")).unwrap();
        let entities = g.nodes_with_label(NodeLabel::Entity).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(g.count_label(NodeLabel::Knowledge), 1);
    }

    #[test]
    fn concurrent_merges_do_not_duplicate() {
        let g = std::sync::Arc::new(MemoryGraph::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = g.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        g.merge_node(&GraphNode::entity(format!("n{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(g.node_count(), 50);
        assert_eq!(g.graph.read().unwrap().node_count(), 50);
    }
}
