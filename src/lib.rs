// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # medgraph
//!
//! A medical knowledge graph builder and retriever. Free-text statements are
//! turned into entities and relations by a language model, normalized,
//! stored in a property graph, and served back through hybrid
//! vector + graph retrieval.
//!
//! ## Architecture
//!
//! - **Records** (`record`, `normalize`): canonical knowledge schema and the
//!   normalizer that repairs loosely-shaped model output
//! - **Graph** (`graph`): in-memory (petgraph) or Neo4j backends behind a
//!   retrying store that never fails its callers
//! - **Oracles** (`oracle`): extraction, embedding and rerank services as
//!   injectable traits, with HTTP clients
//! - **Ingestion** (`ingest`): bounded worker pool, retry policy, durable
//!   result log
//! - **Index** (`index`): exact L2 vector index with atomic on-disk snapshots
//! - **Retrieval** (`retrieve`): recall, graph expansion into context cards,
//!   rerank
//!
//! ## Library usage
//!
//! ```no_run
//! use medgraph::graph::{GraphStore, project_record, search_subgraph};
//! use medgraph::normalize::normalize;
//!
//! let store = GraphStore::in_memory();
//! let raw = serde_json::json!({
//!     "knowledge": "胰岛素是由胰腺分泌的激素",
//!     "entities": [{"entity": "胰岛素", "type": "激素", "description": "调节血糖水平的激素"}],
//!     "relations": [{"subject": "胰岛素", "predicate": "主要分泌腺体", "object": "胰腺"}]
//! });
//! project_record(&store, &normalize(&raw));
//! let subgraph = search_subgraph(&store, "胰腺");
//! assert!(!subgraph.links.is_empty());
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod normalize;
pub mod oracle;
pub mod record;
pub mod retrieve;
pub mod retry;
