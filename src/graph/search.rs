//! Keyword search returning a displayable subgraph.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::{EdgeKind, GraphStore, NodeLabel};

/// A node in a search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubgraphNode {
    pub name: String,
    pub label: NodeLabel,
    /// Whether the node's name itself contains the keyword.
    pub is_seed: bool,
}

/// An undirected link between two result nodes, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubgraphLink {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    /// The predicate for `relation` links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

/// Nodes and links around a keyword, ready for a graph view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<SubgraphNode>,
    pub links: Vec<SubgraphLink>,
}

/// Every edge with an endpoint whose name contains `keyword`, plus both
/// endpoints.
///
/// Links are deduplicated on the unordered endpoint pair and edge type, so a
/// pair connected in both directions shows up once. Nodes are keyed by name;
/// if the same name exists under several labels, the first label seen wins.
/// An empty keyword matches nothing.
pub fn search_subgraph(store: &GraphStore, keyword: &str) -> Subgraph {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Subgraph::default();
    }

    let mut nodes: BTreeMap<String, SubgraphNode> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut seen_links: HashSet<(String, String, EdgeKind)> = HashSet::new();
    let mut links = Vec::new();

    for edge in store.edges_matching(keyword) {
        for node in [&edge.source, &edge.target] {
            if !nodes.contains_key(&node.name) {
                order.push(node.name.clone());
                nodes.insert(
                    node.name.clone(),
                    SubgraphNode {
                        name: node.name.clone(),
                        label: node.label,
                        is_seed: node.name.contains(keyword),
                    },
                );
            }
        }

        let (a, b) = if edge.source.name <= edge.target.name {
            (&edge.source.name, &edge.target.name)
        } else {
            (&edge.target.name, &edge.source.name)
        };
        if seen_links.insert((a.clone(), b.clone(), edge.kind)) {
            links.push(SubgraphLink {
                source: edge.source.name.clone(),
                target: edge.target.name.clone(),
                kind: edge.kind,
                relation: edge.predicate().map(str::to_string),
            });
        }
    }

    Subgraph {
        nodes: order
            .into_iter()
            .filter_map(|name| nodes.remove(&name))
            .collect(),
        links,
    }
}
