//! External model services: extraction, embedding and reranking.
//!
//! Each service sits behind a trait so ingestion and retrieval can be driven
//! by HTTP clients in production and by deterministic stubs in tests. All
//! traits are `Send + Sync`; clients are shared across worker threads as
//! `Arc<dyn Trait>`.
//!
//! Implementations make a single attempt per call. Retrying is the caller's
//! job, through [`with_retry`].

pub mod http;
pub mod ollama;

use serde_json::Value;

use crate::error::OracleError;
use crate::retry::{RetryError, RetryPolicy};

pub use http::{HttpEmbedder, HttpReranker, ServiceConfig};
pub use ollama::{OllamaConfig, OllamaExtractor};

/// Result type for oracle calls.
pub type OracleResult<T> = std::result::Result<T, OracleError>;

/// Language model turning free text into raw knowledge JSON.
pub trait Extractor: Send + Sync {
    /// Extract `{ "knowledge": .., "entities": [..] }` from a text unit.
    fn extract(&self, text: &str) -> OracleResult<Value>;

    /// Given the (revised) extraction, produce the full record including
    /// `relation`.
    fn summarize(&self, entities: &Value) -> OracleResult<Value>;

    /// Repair a record that failed validation.
    fn repair(&self, record: &Value) -> OracleResult<Value>;
}

/// Text embedding service.
pub trait Embedder: Send + Sync {
    /// Encode `texts` into one fixed-dimension vector each, in input order.
    fn encode(&self, texts: &[String]) -> OracleResult<Vec<Vec<f32>>>;
}

/// Cross-encoder relevance scorer.
pub trait Reranker: Send + Sync {
    /// One relevance score per passage, in passage order. Higher is more
    /// relevant.
    fn score(&self, query: &str, passages: &[String]) -> OracleResult<Vec<f32>>;
}

/// Run an oracle call under `policy`, folding retry outcomes into
/// [`OracleError`].
pub fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: impl FnMut() -> OracleResult<T>,
) -> OracleResult<T> {
    policy
        .run(operation, |_| call())
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => OracleError::Exhausted {
                operation: operation.to_string(),
                attempts,
                last: last.to_string(),
            },
            RetryError::Cancelled { .. } => OracleError::Cancelled {
                operation: operation.to_string(),
            },
        })
}

/// Check that a batch call returned one result per input.
pub(crate) fn expect_len<T>(oracle: &str, expected: usize, got: Vec<T>) -> OracleResult<Vec<T>> {
    if got.len() == expected {
        Ok(got)
    } else {
        Err(OracleError::LengthMismatch {
            oracle: oracle.to_string(),
            expected,
            actual: got.len(),
        })
    }
}
