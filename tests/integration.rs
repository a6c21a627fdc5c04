//! End-to-end integration tests for medgraph.
//!
//! These tests drive the full pipeline with deterministic in-process oracles:
//! ingestion into an in-memory graph, index building, and hybrid retrieval.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use medgraph::error::OracleError;
use medgraph::graph::{
    EdgeKind, GraphNode, GraphStore, MemoryGraph, NodeLabel, search_subgraph,
};
use medgraph::index::IndexBuilder;
use medgraph::ingest::{GraphIngestor, IngestConfig, ResultLog, load_log_into_graph};
use medgraph::oracle::{Embedder, Extractor, OracleResult, Reranker};
use medgraph::retrieve::{HybridRetriever, RetrieveConfig};
use medgraph::retry::RetryPolicy;

const INSULIN: &str = "胰岛素是由胰腺分泌的激素";
const GLUCAGON: &str = "胰高血糖素升高血糖";

/// Extraction oracle answering from a fixed table; unknown units fail.
struct TableExtractor {
    table: HashMap<String, Value>,
    calls: AtomicUsize,
}

impl TableExtractor {
    fn new() -> Self {
        let mut table = HashMap::new();
        table.insert(
            INSULIN.to_string(),
            json!({
                "knowledge": INSULIN,
                "entities": [
                    {"entity": "胰岛素", "type": "激素", "description": "调节血糖水平的激素"},
                    {"entity": "胰腺", "type": "器官", "description": "分泌胰岛素的腺体"}
                ],
                "relation": [{"entity1": "胰岛素", "relation": "主要分泌腺体", "entity2": "胰腺"}]
            }),
        );
        table.insert(
            GLUCAGON.to_string(),
            json!({
                "knowledge": GLUCAGON,
                "entities": [
                    {"entity": "胰高血糖素", "type": "激素", "描述": "升高血糖的激素"},
                    {"entity": "血糖", "type": "生理指标", "description": "血液中的葡萄糖"}
                ],
                "relations": [{"subject": "胰高血糖素", "predicate": "升高", "object": ["血糖"]}]
            }),
        );
        Self {
            table,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Extractor for TableExtractor {
    fn extract(&self, text: &str) -> OracleResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| OracleError::RequestFailed {
                oracle: "table".into(),
                message: format!("no entry for {text}"),
            })
    }

    fn summarize(&self, entities: &Value) -> OracleResult<Value> {
        Ok(entities.clone())
    }

    fn repair(&self, record: &Value) -> OracleResult<Value> {
        Ok(record.clone())
    }
}

/// Bag-of-characters embedding: identical texts get identical vectors.
struct CharBagEmbedder;

const DIM: usize = 16;

fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    for c in text.chars() {
        v[c as usize % DIM] += 1.0;
    }
    v
}

impl Embedder for CharBagEmbedder {
    fn encode(&self, texts: &[String]) -> OracleResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed(t)).collect())
    }
}

/// Scores a card 1.0 when its heading is exactly the query.
struct HeadingReranker;

impl Reranker for HeadingReranker {
    fn score(&self, query: &str, passages: &[String]) -> OracleResult<Vec<f32>> {
        Ok(passages
            .iter()
            .map(|p| if p.lines().next() == Some(query) { 1.0 } else { 0.0 })
            .collect())
    }
}

fn memory_store() -> (Arc<MemoryGraph>, Arc<GraphStore>) {
    let graph = Arc::new(MemoryGraph::new());
    let store = Arc::new(GraphStore::new(graph.clone(), RetryPolicy::store()));
    (graph, store)
}

fn build_ingestor(
    store: Arc<GraphStore>,
    log: Option<Arc<ResultLog>>,
) -> (Arc<TableExtractor>, GraphIngestor) {
    let extractor = Arc::new(TableExtractor::new());
    let config = IngestConfig {
        log_path: None,
        ..IngestConfig::default()
    };
    (
        extractor.clone(),
        GraphIngestor::new(extractor, store, log, config),
    )
}

#[test]
fn end_to_end_ingest_index_retrieve() {
    let (graph, store) = memory_store();
    let (_, ingestor) = build_ingestor(store.clone(), None);

    let report = ingestor.ingest_all(&[INSULIN.to_string(), GLUCAGON.to_string()], 2);
    assert_eq!(report.ingested, 2);
    assert_eq!(report.skipped, 0);

    // Graph shape.
    assert_eq!(graph.count_label(NodeLabel::Knowledge), 2);
    assert_eq!(graph.count_label(NodeLabel::Entity), 4);
    let relation = graph
        .all_edges()
        .into_iter()
        .find(|e| e.kind == EdgeKind::Relation && e.source.name == "胰岛素")
        .expect("relation edge");
    assert_eq!(relation.target, GraphNode::entity("胰腺"));
    assert_eq!(relation.predicate(), Some("主要分泌腺体"));

    // Index and retrieval.
    let snapshot = IndexBuilder::new(Arc::new(CharBagEmbedder))
        .with_batch_size(3)
        .build_from_graph(&store)
        .unwrap();
    assert_eq!(snapshot.len(), 6);

    let retriever = HybridRetriever::new(
        Arc::new(snapshot),
        store.clone(),
        Arc::new(CharBagEmbedder),
        Arc::new(HeadingReranker),
        RetrieveConfig::default(),
    );
    let cards = retriever.retrieve("胰岛素", 1);
    assert_eq!(cards.len(), 1);
    assert!(cards[0].starts_with("胰岛素\n\n(胰岛素, 激素, 调节血糖水平的激素)"));
    assert!(cards[0].contains("(胰岛素, 主要分泌腺体, 胰腺)"));
    assert!(cards[0].contains(INSULIN));
}

#[test]
fn synonym_keys_and_fan_out_survive_ingestion() {
    let (graph, store) = memory_store();
    let (_, ingestor) = build_ingestor(store.clone(), None);
    ingestor.ingest_all(&[GLUCAGON.to_string()], 1);

    assert!(store.contains(&GraphNode::description("升高血糖的激素")));
    let edges = graph.all_edges();
    assert!(edges.iter().any(|e| e.kind == EdgeKind::Relation
        && e.source.name == "胰高血糖素"
        && e.target.name == "血糖"
        && e.predicate() == Some("升高")));
}

#[test]
fn failing_unit_is_contained() {
    let (graph, store) = memory_store();
    let (extractor, ingestor) = build_ingestor(store.clone(), None);

    let report = ingestor.ingest_all(&["无法解析的文本".to_string(), INSULIN.to_string()], 2);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.ingested, 1);
    assert_eq!(report.skipped, 1);
    // 5 attempts for the failing unit, 1 for the good one.
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 6);
    assert!(!store.contains(&GraphNode::knowledge("无法解析的文本")));
    assert_eq!(graph.count_label(NodeLabel::Knowledge), 1);
}

#[test]
fn reingesting_is_idempotent() {
    let (graph, store) = memory_store();
    let (_, ingestor) = build_ingestor(store, None);

    ingestor.ingest_all(&[INSULIN.to_string()], 1);
    let nodes = graph.node_count();
    let edges = graph.edge_count();

    ingestor.ingest_all(&[INSULIN.to_string(), INSULIN.to_string()], 2);
    assert_eq!(graph.node_count(), nodes);
    assert_eq!(graph.edge_count(), edges);
}

#[test]
fn result_log_replays_into_an_equal_graph() {
    let dir = tempfile::TempDir::new().unwrap();
    let log = Arc::new(ResultLog::open(dir.path().join("graph.json")).unwrap());

    let (graph, store) = memory_store();
    let (_, ingestor) = build_ingestor(store, Some(log.clone()));
    ingestor.ingest_all(&[INSULIN.to_string(), GLUCAGON.to_string()], 2);
    assert_eq!(log.len().unwrap(), 2);

    let (replayed, replay_store) = memory_store();
    load_log_into_graph(&log, &replay_store).unwrap();
    assert_eq!(replayed.node_count(), graph.node_count());
    assert_eq!(replayed.edge_count(), graph.edge_count());
}

#[test]
fn index_rows_align_with_identifiers() {
    let nodes: Vec<GraphNode> = ["A", "B", "C"].into_iter().map(GraphNode::entity).collect();
    let snapshot = IndexBuilder::new(Arc::new(CharBagEmbedder))
        .build(nodes)
        .unwrap();

    let hits = snapshot.search(&embed("B"), 1).unwrap();
    assert_eq!(hits[0].1.position, 1);
    assert_eq!(hits[0].0, GraphNode::entity("B"));
}

#[test]
fn keyword_search_finds_neighborhood() {
    let (_, store) = memory_store();
    let (_, ingestor) = build_ingestor(store.clone(), None);
    ingestor.ingest_all(&[INSULIN.to_string(), GLUCAGON.to_string()], 2);

    let sub = search_subgraph(&store, "胰腺");
    assert!(sub.nodes.iter().any(|n| n.name == "胰腺" && n.is_seed));
    assert!(sub.nodes.iter().any(|n| n.name == "胰岛素" && !n.is_seed));
    assert!(!sub.nodes.iter().any(|n| n.name == "胰高血糖素"));
}

#[test]
fn dropped_writes_are_counted_not_raised() {
    use medgraph::error::GraphError;
    use medgraph::graph::{GraphBackend, GraphEdge, GraphResult, Neighbor};

    struct Down;

    impl GraphBackend for Down {
        fn merge_node(&self, _: &GraphNode) -> GraphResult<()> {
            Err(GraphError::Request {
                message: "refused".into(),
            })
        }
        fn merge_edge(&self, _: &GraphEdge) -> GraphResult<()> {
            Err(GraphError::Request {
                message: "refused".into(),
            })
        }
        fn contains(&self, _: &GraphNode) -> GraphResult<bool> {
            Ok(false)
        }
        fn neighbors(&self, _: &GraphNode) -> GraphResult<Vec<Neighbor>> {
            Ok(Vec::new())
        }
        fn nodes_with_label(&self, _: NodeLabel) -> GraphResult<Vec<GraphNode>> {
            Ok(Vec::new())
        }
        fn edges_matching(&self, _: &str) -> GraphResult<Vec<GraphEdge>> {
            Ok(Vec::new())
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    let policy = RetryPolicy::store().with_backoff(std::time::Duration::ZERO);
    let store = Arc::new(GraphStore::new(Arc::new(Down), policy));
    let (_, ingestor) = build_ingestor(store.clone(), None);

    let report = ingestor.ingest_all(&[INSULIN.to_string()], 1);
    assert_eq!(report.ingested, 1);
    assert!(report.projection.dropped > 0);
    assert_eq!(
        store.stats().dropped_writes() as usize,
        report.projection.dropped
    );
}
