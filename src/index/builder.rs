//! Batch embedding of graph node names into an [`IndexSnapshot`].

use std::sync::Arc;

use crate::error::IndexError;
use crate::graph::{GraphNode, GraphStore, NodeLabel};
use crate::oracle::{Embedder, with_retry};
use crate::retry::RetryPolicy;

use super::{FlatIndex, IndexResult, IndexSnapshot};

/// Default number of names sent per embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Embeds node names in fixed-size batches and assembles the index.
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    policy: RetryPolicy,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            policy: RetryPolicy::oracle(),
        }
    }

    /// Names per embedding request. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Embed `names` batch by batch, preserving input order.
    ///
    /// Each batch is retried under the builder's policy; a batch that keeps
    /// failing aborts the build.
    pub fn encode(&self, names: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(names.len());
        for (i, batch) in names.chunks(self.batch_size).enumerate() {
            let encoded = with_retry(&self.policy, "embed", || {
                let out = self.embedder.encode(batch)?;
                crate::oracle::expect_len("embedding", batch.len(), out)
            })?;
            tracing::debug!(batch = i, size = batch.len(), "embedded batch");
            vectors.extend(encoded);
        }
        Ok(vectors)
    }

    /// Build a snapshot whose row `i` is the embedding of `nodes[i].name`.
    pub fn build(&self, nodes: Vec<GraphNode>) -> IndexResult<IndexSnapshot> {
        if nodes.is_empty() {
            return Err(IndexError::Empty);
        }
        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        let vectors = self.encode(&names)?;
        let index = FlatIndex::from_rows(vectors)?;
        tracing::info!(rows = index.len(), dim = index.dim(), "index built");
        IndexSnapshot::new(index, nodes)
    }

    /// Build over every `knowledge` node followed by every `entity` node.
    pub fn build_from_graph(&self, store: &GraphStore) -> IndexResult<IndexSnapshot> {
        let mut nodes = Vec::new();
        for label in NodeLabel::ALL.into_iter().filter(|l| l.is_indexed()) {
            nodes.extend(store.nodes_with_label(label));
        }
        tracing::info!(nodes = nodes.len(), "collected nodes for indexing");
        self.build(nodes)
    }
}
