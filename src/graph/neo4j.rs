//! Neo4j backend over the transactional HTTP API.
//!
//! Each operation is one auto-commit request to
//! `POST {uri}/db/{database}/tx/commit`. Node labels and edge types come from
//! closed enums and are interpolated backtick-quoted; every name and property
//! value travels as a bound parameter.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::GraphError;

use super::{
    EdgeDirection, EdgeKind, GraphBackend, GraphEdge, GraphNode, GraphResult, NodeLabel, Neighbor,
};

/// Connection settings for a Neo4j server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    /// HTTP endpoint, e.g. `http://localhost:7474`.
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub timeout_secs: u64,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".into(),
            user: "neo4j".into(),
            password: String::new(),
            database: "neo4j".into(),
            timeout_secs: 30,
        }
    }
}

/// Graph backend talking to Neo4j.
pub struct Neo4jGraph {
    config: Neo4jConfig,
    agent: ureq::Agent,
    auth: String,
}

impl Neo4jGraph {
    pub fn new(config: Neo4jConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let auth = format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", config.user, config.password))
        );
        Self {
            config,
            agent,
            auth,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.uri.trim_end_matches('/'),
            self.config.database
        )
    }

    /// Run one Cypher statement and return its result rows.
    fn run(&self, statement: &str, parameters: Value) -> GraphResult<Vec<Vec<Value>>> {
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });

        let resp = self
            .agent
            .post(&self.endpoint())
            .set("Authorization", &self.auth)
            .set("Accept", "application/json")
            .send_json(body)
            .map_err(|e| GraphError::Request {
                message: e.to_string(),
            })?;

        let payload: TxResponse = resp.into_json().map_err(|e| GraphError::Response {
            message: e.to_string(),
        })?;

        if let Some(err) = payload.errors.into_iter().next() {
            return Err(GraphError::Backend {
                code: err.code,
                message: err.message,
            });
        }

        Ok(payload
            .results
            .into_iter()
            .next()
            .map(|r| r.data.into_iter().map(|d| d.row).collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Backtick-quote an identifier for interpolation into Cypher.
fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Build `MERGE (a)-[r:`kind` {k: $p0, ...}]->(b)` pieces for an edge.
fn merge_edge_statement(edge: &GraphEdge) -> (String, Value) {
    let mut params = Map::new();
    params.insert("source".into(), Value::String(edge.source.name.clone()));
    params.insert("target".into(), Value::String(edge.target.name.clone()));

    let props: Vec<String> = edge
        .properties
        .iter()
        .enumerate()
        .map(|(i, (key, value))| {
            let param = format!("p{i}");
            params.insert(param.clone(), Value::String(value.clone()));
            format!("{}: ${param}", quote(key))
        })
        .collect();
    let props = if props.is_empty() {
        String::new()
    } else {
        format!(" {{{}}}", props.join(", "))
    };

    let statement = format!(
        "MERGE (a:{} {{name: $source}}) MERGE (b:{} {{name: $target}}) MERGE (a)-[r:{}{}]->(b)",
        quote(edge.source.label.as_str()),
        quote(edge.target.label.as_str()),
        quote(edge.kind.as_str()),
        props,
    );
    (statement, Value::Object(params))
}

/// First label in a `labels(n)` list that we recognize.
fn parse_labels(value: &Value) -> Option<NodeLabel> {
    value
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find_map(|s| s.parse().ok())
}

fn parse_properties(value: &Value) -> std::collections::BTreeMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode `[srcLabels, srcName, type, props, dstLabels, dstName]`.
fn parse_edge_row(row: &[Value]) -> Option<GraphEdge> {
    let [src_labels, src_name, kind, props, dst_labels, dst_name] = row else {
        return None;
    };
    Some(GraphEdge {
        source: GraphNode::new(parse_labels(src_labels)?, src_name.as_str()?),
        kind: kind.as_str()?.parse::<EdgeKind>().ok()?,
        target: GraphNode::new(parse_labels(dst_labels)?, dst_name.as_str()?),
        properties: parse_properties(props),
    })
}

const EDGE_COLUMNS: &str =
    "labels(a) AS al, a.name AS an, type(r) AS t, properties(r) AS p, labels(b) AS bl, b.name AS bn";

impl GraphBackend for Neo4jGraph {
    fn merge_node(&self, node: &GraphNode) -> GraphResult<()> {
        let statement = format!("MERGE (n:{} {{name: $name}})", quote(node.label.as_str()));
        self.run(&statement, json!({ "name": node.name }))?;
        Ok(())
    }

    fn merge_edge(&self, edge: &GraphEdge) -> GraphResult<()> {
        let (statement, params) = merge_edge_statement(edge);
        self.run(&statement, params)?;
        Ok(())
    }

    fn contains(&self, node: &GraphNode) -> GraphResult<bool> {
        let statement = format!(
            "MATCH (n:{} {{name: $name}}) RETURN count(n) > 0",
            quote(node.label.as_str())
        );
        let rows = self.run(&statement, json!({ "name": node.name }))?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    fn neighbors(&self, node: &GraphNode) -> GraphResult<Vec<Neighbor>> {
        let statement = format!(
            "MATCH (n:{} {{name: $name}})-[r]-(m) \
             WITH n, r, CASE WHEN startNode(r) = n THEN n ELSE m END AS a, \
                        CASE WHEN startNode(r) = n THEN m ELSE n END AS b \
             RETURN {EDGE_COLUMNS} ORDER BY id(r)",
            quote(node.label.as_str())
        );
        let rows = self.run(&statement, json!({ "name": node.name }))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(edge) = parse_edge_row(row) else {
                tracing::debug!(?row, "skipping unrecognized neighbor row");
                continue;
            };
            let (peer, direction) = if edge.source == *node {
                (edge.target.clone(), EdgeDirection::Outgoing)
            } else {
                (edge.source.clone(), EdgeDirection::Incoming)
            };
            out.push(Neighbor {
                node: peer,
                edge,
                direction,
            });
        }
        Ok(out)
    }

    fn nodes_with_label(&self, label: NodeLabel) -> GraphResult<Vec<GraphNode>> {
        let statement = format!(
            "MATCH (n:{}) WHERE n.name IS NOT NULL RETURN n.name ORDER BY id(n)",
            quote(label.as_str())
        );
        let rows = self.run(&statement, json!({}))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first()?.as_str().map(|name| GraphNode::new(label, name)))
            .collect())
    }

    fn edges_matching(&self, keyword: &str) -> GraphResult<Vec<GraphEdge>> {
        let statement = format!(
            "MATCH (a)-[r]->(b) WHERE a.name CONTAINS $keyword OR b.name CONTAINS $keyword \
             RETURN {EDGE_COLUMNS}"
        );
        let rows = self.run(&statement, json!({ "keyword": keyword }))?;
        Ok(rows.iter().filter_map(|row| parse_edge_row(row)).collect())
    }

    fn name(&self) -> &'static str {
        "neo4j"
    }
}
