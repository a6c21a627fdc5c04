//! HTTP clients for embedding and rerank services.
//!
//! Both speak the text-embeddings-inference wire format:
//!
//! - `POST {url}/embed` with `{"inputs": [..]}` returns `[[f32; dim], ..]`
//! - `POST {url}/rerank` with `{"query": .., "texts": [..]}` returns
//!   `[{"index": i, "score": s}, ..]` in arbitrary order

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::OracleError;

use super::{Embedder, OracleResult, Reranker, expect_len};

/// Endpoint settings shared by the embedding and rerank clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".into(),
            timeout_secs: 60,
        }
    }
}

fn agent(config: &ServiceConfig) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
}

fn post<T: serde::de::DeserializeOwned>(
    agent: &ureq::Agent,
    oracle: &str,
    url: &str,
    body: serde_json::Value,
) -> OracleResult<T> {
    let resp = agent
        .post(url)
        .send_json(body)
        .map_err(|e| OracleError::RequestFailed {
            oracle: oracle.to_string(),
            message: e.to_string(),
        })?;
    resp.into_json().map_err(|e| OracleError::Malformed {
        oracle: oracle.to_string(),
        message: e.to_string(),
    })
}

/// Embedding oracle over HTTP.
pub struct HttpEmbedder {
    config: ServiceConfig,
    agent: ureq::Agent,
}

impl HttpEmbedder {
    pub fn new(config: ServiceConfig) -> Self {
        let agent = agent(&config);
        Self { config, agent }
    }
}

impl Embedder for HttpEmbedder {
    fn encode(&self, texts: &[String]) -> OracleResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embed", self.config.url.trim_end_matches('/'));
        let vectors: Vec<Vec<f32>> =
            post(&self.agent, "embedding", &url, json!({ "inputs": texts }))?;
        let vectors = expect_len("embedding", texts.len(), vectors)?;

        if let Some(first) = vectors.first() {
            let dim = first.len();
            if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
                return Err(OracleError::Malformed {
                    oracle: "embedding".into(),
                    message: "vectors of inconsistent or zero dimension".into(),
                });
            }
        }
        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

/// Put `(index, score)` pairs back into passage order.
fn scores_in_order(count: usize, hits: Vec<RerankHit>) -> OracleResult<Vec<f32>> {
    let hits = expect_len("rerank", count, hits)?;
    let mut scores = vec![None; count];
    for hit in hits {
        let Some(slot) = scores.get_mut(hit.index).filter(|slot| slot.is_none()) else {
            return Err(OracleError::Malformed {
                oracle: "rerank".into(),
                message: format!("bad or duplicate passage index {}", hit.index),
            });
        };
        *slot = Some(hit.score);
    }
    // Every slot is filled: `count` distinct in-range indices were seen.
    Ok(scores.into_iter().flatten().collect())
}

/// Rerank oracle over HTTP.
pub struct HttpReranker {
    config: ServiceConfig,
    agent: ureq::Agent,
}

impl HttpReranker {
    pub fn new(config: ServiceConfig) -> Self {
        let agent = agent(&config);
        Self { config, agent }
    }
}

impl Reranker for HttpReranker {
    fn score(&self, query: &str, passages: &[String]) -> OracleResult<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/rerank", self.config.url.trim_end_matches('/'));
        let hits: Vec<RerankHit> = post(
            &self.agent,
            "rerank",
            &url,
            json!({ "query": query, "texts": passages, "truncate": true }),
        )?;
        scores_in_order(passages.len(), hits)
    }
}
