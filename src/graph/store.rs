//! Retrying facade over a [`GraphBackend`].
//!
//! Writes are retried under the store [`RetryPolicy`] (3 attempts, 2 s apart
//! by default). A write that still fails is swallowed: it is counted in
//! [`GraphStats`] and logged under the `medgraph::dropped_write` target so
//! operators can find every lost node and edge. Reads degrade to empty
//! results the same way. Callers never see a graph error from this type.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::retry::{RetryError, RetryPolicy};

use super::{EdgeKind, GraphBackend, GraphEdge, GraphNode, GraphResult, NodeLabel, Neighbor};

/// Counters for store traffic since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes_written: u64,
    pub edges_written: u64,
    pub dropped_nodes: u64,
    pub dropped_edges: u64,
    pub failed_reads: u64,
}

impl GraphStats {
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_nodes + self.dropped_edges
    }
}

#[derive(Default)]
struct Counters {
    nodes_written: AtomicU64,
    edges_written: AtomicU64,
    dropped_nodes: AtomicU64,
    dropped_edges: AtomicU64,
    failed_reads: AtomicU64,
}

/// The graph store used by ingestion, retrieval and search.
pub struct GraphStore {
    backend: Arc<dyn GraphBackend>,
    policy: RetryPolicy,
    counters: Counters,
}

impl GraphStore {
    pub fn new(backend: Arc<dyn GraphBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            counters: Counters::default(),
        }
    }

    /// A store over a fresh [`MemoryGraph`](super::MemoryGraph).
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(super::MemoryGraph::new()),
            RetryPolicy::store(),
        )
    }

    pub fn backend(&self) -> &Arc<dyn GraphBackend> {
        &self.backend
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Merge a node by `(label, name)` and return it.
    ///
    /// Failure after all retries is logged and counted, never raised.
    pub fn upsert_node(&self, name: &str, label: NodeLabel) -> GraphNode {
        let node = GraphNode::new(label, name);
        self.merge_node(&node);
        node
    }

    /// Merge an already-built node. Returns whether the write landed.
    pub fn merge_node(&self, node: &GraphNode) -> bool {
        match self.policy.run("merge_node", |_| self.backend.merge_node(node)) {
            Ok(()) => {
                self.counters.nodes_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.counters.dropped_nodes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "medgraph::dropped_write",
                    backend = self.backend.name(),
                    node = %node,
                    reason = %describe(&err),
                    "node write dropped"
                );
                false
            }
        }
    }

    /// Merge a typed edge between two nodes. Endpoints are created if missing.
    pub fn upsert_edge(
        &self,
        source: &GraphNode,
        kind: EdgeKind,
        target: &GraphNode,
        properties: BTreeMap<String, String>,
    ) -> bool {
        let edge = GraphEdge {
            source: source.clone(),
            kind,
            target: target.clone(),
            properties,
        };
        self.merge_edge(&edge)
    }

    /// Merge an already-built edge. Returns whether the write landed.
    pub fn merge_edge(&self, edge: &GraphEdge) -> bool {
        match self.policy.run("merge_edge", |_| self.backend.merge_edge(edge)) {
            Ok(()) => {
                self.counters.edges_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.counters.dropped_edges.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "medgraph::dropped_write",
                    backend = self.backend.name(),
                    from = %edge.source,
                    kind = %edge.kind,
                    to = %edge.target,
                    reason = %describe(&err),
                    "edge write dropped"
                );
                false
            }
        }
    }

    /// Whether the node exists. Unreachable backends answer `false`.
    pub fn contains(&self, node: &GraphNode) -> bool {
        self.read(&self.policy, "contains", false, || self.backend.contains(node))
    }

    /// One-hop neighborhood of `node` in both directions.
    pub fn neighbors_of(&self, node: &GraphNode) -> Vec<Neighbor> {
        self.neighbors_of_with(node, &self.policy)
    }

    /// [`neighbors_of`](Self::neighbors_of) retried under `policy` instead of
    /// the store's own.
    pub fn neighbors_of_with(&self, node: &GraphNode, policy: &RetryPolicy) -> Vec<Neighbor> {
        self.read(policy, "neighbors", Vec::new(), || self.backend.neighbors(node))
    }

    pub fn nodes_with_label(&self, label: NodeLabel) -> Vec<GraphNode> {
        self.read(&self.policy, "nodes_with_label", Vec::new(), || {
            self.backend.nodes_with_label(label)
        })
    }

    /// Edges with an endpoint whose name contains `keyword`.
    pub fn edges_matching(&self, keyword: &str) -> Vec<GraphEdge> {
        self.read(&self.policy, "edges_matching", Vec::new(), || {
            self.backend.edges_matching(keyword)
        })
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes_written: self.counters.nodes_written.load(Ordering::Relaxed),
            edges_written: self.counters.edges_written.load(Ordering::Relaxed),
            dropped_nodes: self.counters.dropped_nodes.load(Ordering::Relaxed),
            dropped_edges: self.counters.dropped_edges.load(Ordering::Relaxed),
            failed_reads: self.counters.failed_reads.load(Ordering::Relaxed),
        }
    }

    fn read<T>(
        &self,
        policy: &RetryPolicy,
        operation: &str,
        fallback: T,
        op: impl Fn() -> GraphResult<T>,
    ) -> T {
        match policy.run(operation, |_| op()) {
            Ok(value) => value,
            Err(err) => {
                self.counters.failed_reads.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    backend = self.backend.name(),
                    operation,
                    reason = %describe(&err),
                    "graph read failed, returning empty result"
                );
                fallback
            }
        }
    }
}

fn describe(err: &RetryError<crate::error::GraphError>) -> String {
    match err {
        RetryError::Exhausted { attempts, last } => format!("{last} (after {attempts} attempts)"),
        RetryError::Cancelled { attempts } => format!("cancelled after {attempts} attempts"),
    }
}
