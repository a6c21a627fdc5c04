//! Hybrid retrieval: vector recall over node names, graph expansion into
//! context cards, cross-encoder rerank.
//!
//! The query is embedded and `max(oversample, top_k)` nearest nodes are
//! recalled from the index. Each is expanded into a card from its one-hop
//! neighborhood, the reranker scores every card against the query, and the
//! `top_k` best come back in descending relevance.
//!
//! Failure policy: an unusable query embedding yields an empty result; a
//! failed rerank falls back to vector-distance order. Retrieval never errors.
//! Graph reads during card assembly keep the store's retry budget but stop at
//! the retriever policy's deadline or cancel token.

pub mod card;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph::{GraphNode, GraphStore};
use crate::index::{Hit, IndexSnapshot};
use crate::oracle::{Embedder, Reranker, with_retry};
use crate::retry::RetryPolicy;

pub use card::{EntityProfile, assemble_card, assemble_card_with};

/// Retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieveConfig {
    /// Minimum number of candidates recalled before reranking.
    pub oversample: usize,
    /// Default number of results.
    pub top_k: usize,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            oversample: 30,
            top_k: 3,
        }
    }
}

/// A retrieved card with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCard {
    pub node: GraphNode,
    pub text: String,
    /// Reranker score, or negated vector distance when rerank failed.
    pub score: f32,
}

/// Answers queries against an index snapshot and the graph.
pub struct HybridRetriever {
    snapshot: Arc<IndexSnapshot>,
    store: Arc<GraphStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    config: RetrieveConfig,
    policy: RetryPolicy,
}

impl HybridRetriever {
    pub fn new(
        snapshot: Arc<IndexSnapshot>,
        store: Arc<GraphStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        config: RetrieveConfig,
    ) -> Self {
        Self {
            snapshot,
            store,
            embedder,
            reranker,
            config,
            policy: RetryPolicy::oracle(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &RetrieveConfig {
        &self.config
    }

    /// The `top_k` most relevant card texts, most relevant first.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<String> {
        self.retrieve_scored(query, top_k)
            .into_iter()
            .map(|c| c.text)
            .collect()
    }

    /// [`retrieve`](Self::retrieve) with nodes and scores.
    pub fn retrieve_scored(&self, query: &str, top_k: usize) -> Vec<ScoredCard> {
        if top_k == 0 || self.snapshot.is_empty() {
            return Vec::new();
        }

        let Some(query_vec) = self.embed_query(query) else {
            return Vec::new();
        };

        let recall = self.config.oversample.max(top_k).min(self.snapshot.len());
        let hits = match self.snapshot.search(&query_vec, recall) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "vector search failed");
                return Vec::new();
            }
        };

        let read_policy = self.store.policy().clone().within(&self.policy);
        let candidates: Vec<(GraphNode, Hit, String)> = hits
            .into_iter()
            .map(|(node, hit)| {
                let text = assemble_card_with(&self.store, &node, &read_policy);
                (node, hit, text)
            })
            .collect();
        let texts: Vec<String> = candidates.iter().map(|(_, _, t)| t.clone()).collect();

        let scores = match with_retry(&self.policy, "rerank", || {
            let scores = self.reranker.score(query, &texts)?;
            crate::oracle::expect_len("rerank", texts.len(), scores)
        }) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(error = %e, "rerank failed, falling back to vector order");
                candidates.iter().map(|(_, hit, _)| -hit.distance).collect()
            }
        };

        let mut cards: Vec<ScoredCard> = candidates
            .into_iter()
            .zip(scores)
            .map(|((node, _, text), score)| ScoredCard { node, text, score })
            .collect();
        // Stable: equal scores keep vector-recall order.
        cards.sort_by(|a, b| b.score.total_cmp(&a.score));
        cards.truncate(top_k);

        tracing::debug!(recalled = recall, returned = cards.len(), "retrieval done");
        cards
    }

    fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let batch = [query.to_string()];
        let encoded = with_retry(&self.policy, "embed_query", || {
            let out = self.embedder.encode(&batch)?;
            crate::oracle::expect_len("embedding", 1, out)
        });
        match encoded {
            Ok(mut vectors) => {
                let vector = vectors.pop()?;
                if vector.len() != self.snapshot.index().dim() {
                    tracing::warn!(
                        expected = self.snapshot.index().dim(),
                        actual = vector.len(),
                        "query embedding dimension does not match index"
                    );
                    return None;
                }
                Some(vector)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, returning no results");
                None
            }
        }
    }
}
