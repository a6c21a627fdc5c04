//! Projection of a normalized [`KnowledgeRecord`] into graph upserts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::KnowledgeRecord;

use super::{EdgeKind, GraphEdge, GraphNode, GraphStore, NodeLabel};

/// Writes issued while projecting one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProjectionStats {
    pub nodes: usize,
    pub edges: usize,
    /// Writes the store gave up on after retrying.
    pub dropped: usize,
}

impl ProjectionStats {
    pub fn merge(&mut self, other: ProjectionStats) {
        self.nodes += other.nodes;
        self.edges += other.edges;
        self.dropped += other.dropped;
    }
}

struct Projector<'a> {
    store: &'a GraphStore,
    stats: ProjectionStats,
}

impl Projector<'_> {
    fn node(&mut self, node: &GraphNode) {
        self.stats.nodes += 1;
        if !self.store.merge_node(node) {
            self.stats.dropped += 1;
        }
    }

    fn edge(&mut self, edge: GraphEdge) {
        self.stats.edges += 1;
        if !self.store.merge_edge(&edge) {
            self.stats.dropped += 1;
        }
    }

    fn plain_edge(&mut self, source: &GraphNode, kind: EdgeKind, target: &GraphNode) {
        self.edge(GraphEdge {
            source: source.clone(),
            kind,
            target: target.clone(),
            properties: BTreeMap::new(),
        });
    }
}

/// Upsert every node and edge a record implies.
///
/// - one `knowledge` node for the statement (if non-empty);
/// - per entity: the `entity` node, its `type` and `description` nodes
///   (when non-empty) with `type` / `description` edges, and a `knowledge`
///   edge to the statement;
/// - per relation triple (after fan-out): both `entity` endpoints, a
///   `relation` edge carrying the predicate, and `knowledge` edges from
///   both endpoints to the statement.
///
/// Writes are merges, so projecting the same record twice leaves the graph
/// unchanged. Failed writes are counted and skipped; the remaining writes
/// still go through.
pub fn project_record(store: &GraphStore, record: &KnowledgeRecord) -> ProjectionStats {
    let mut p = Projector {
        store,
        stats: ProjectionStats::default(),
    };

    let knowledge = (!record.knowledge.is_empty()).then(|| GraphNode::knowledge(&record.knowledge));
    if let Some(k) = &knowledge {
        p.node(k);
    }

    for entity in &record.entities {
        if entity.entity.is_empty() {
            continue;
        }
        let node = GraphNode::entity(&entity.entity);
        p.node(&node);

        if !entity.description.is_empty() {
            let description = GraphNode::description(&entity.description);
            p.node(&description);
            p.plain_edge(&node, EdgeKind::Description, &description);
        }
        if !entity.kind.is_empty() {
            let kind = GraphNode::kind(&entity.kind);
            p.node(&kind);
            p.plain_edge(&node, EdgeKind::Type, &kind);
        }
        if let Some(k) = &knowledge {
            p.plain_edge(&node, EdgeKind::Knowledge, k);
        }
    }

    for relation in &record.relations {
        for (source, predicate, target) in relation.triples() {
            let source = GraphNode::new(NodeLabel::Entity, source);
            let target = GraphNode::new(NodeLabel::Entity, target);
            p.node(&source);
            p.node(&target);
            p.edge(GraphEdge::relation(source.clone(), predicate, target.clone()));
            if let Some(k) = &knowledge {
                p.plain_edge(&source, EdgeKind::Knowledge, k);
                p.plain_edge(&target, EdgeKind::Knowledge, k);
            }
        }
    }

    tracing::debug!(
        nodes = p.stats.nodes,
        edges = p.stats.edges,
        dropped = p.stats.dropped,
        "projected record"
    );
    p.stats
}
