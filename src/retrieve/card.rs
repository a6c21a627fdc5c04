//! Context cards: the text shown to the reranker and the answer model for a
//! retrieved node.

use std::fmt::Write;

use crate::graph::{EdgeDirection, EdgeKind, GraphNode, GraphStore, NodeLabel, Neighbor};
use crate::retry::RetryPolicy;

/// One-hop facts about an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityProfile {
    pub name: String,
    /// First `type` neighbor seen.
    pub kind: Option<String>,
    /// First `description` neighbor seen.
    pub description: Option<String>,
    /// Statements this entity is mentioned in.
    pub knowledge: Vec<String>,
    /// `(source, predicate, target)` for every relation touching the entity,
    /// in edge direction.
    pub relations: Vec<(String, String, String)>,
}

impl EntityProfile {
    /// Collect the profile from the entity's neighborhood.
    pub fn collect(store: &GraphStore, entity: &GraphNode) -> Self {
        Self::collect_with(store, entity, store.policy())
    }

    /// [`collect`](Self::collect) with the graph read retried under `policy`.
    pub fn collect_with(store: &GraphStore, entity: &GraphNode, policy: &RetryPolicy) -> Self {
        Self::from_neighbors(entity, store.neighbors_of_with(entity, policy))
    }

    fn from_neighbors(entity: &GraphNode, neighbors: Vec<Neighbor>) -> Self {
        let mut profile = EntityProfile {
            name: entity.name.clone(),
            ..Self::default()
        };
        for n in neighbors {
            match (n.edge.kind, n.direction) {
                (EdgeKind::Type, EdgeDirection::Outgoing) => {
                    profile.kind.get_or_insert(n.node.name);
                }
                (EdgeKind::Description, EdgeDirection::Outgoing) => {
                    profile.description.get_or_insert(n.node.name);
                }
                (EdgeKind::Knowledge, EdgeDirection::Outgoing) => {
                    if !profile.knowledge.contains(&n.node.name) {
                        profile.knowledge.push(n.node.name);
                    }
                }
                (EdgeKind::Relation, _) => {
                    let predicate = n.edge.predicate().unwrap_or_default().to_string();
                    profile
                        .relations
                        .push((n.edge.source.name, predicate, n.edge.target.name));
                }
                _ => {}
            }
        }
        profile
    }

    /// `(name, type, description)` with missing parts left empty.
    fn triple(&self) -> String {
        format!(
            "({}, {}, {})",
            self.name,
            self.kind.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or("")
        )
    }

    /// `(name, description, type)`: the order used inside knowledge cards.
    fn mention(&self) -> String {
        format!(
            "({}, {}, {})",
            self.name,
            self.description.as_deref().unwrap_or(""),
            self.kind.as_deref().unwrap_or("")
        )
    }
}

/// Render the context card for a node.
///
/// - `entity`: name, its `(name, type, description)` triple, the statements
///   it appears in and its relations.
/// - `knowledge`: the statement followed by a `(name, description, type)`
///   line per entity pointing at it.
/// - `type` / `description`: just the name (these are never indexed).
pub fn assemble_card(store: &GraphStore, node: &GraphNode) -> String {
    assemble_card_with(store, node, store.policy())
}

/// [`assemble_card`] with every graph read retried under `policy` instead of
/// the store's own, so a caller's deadline or cancel token bounds it.
pub fn assemble_card_with(store: &GraphStore, node: &GraphNode, policy: &RetryPolicy) -> String {
    match node.label {
        NodeLabel::Entity => entity_card(&EntityProfile::collect_with(store, node, policy)),
        NodeLabel::Knowledge => knowledge_card(store, node, policy),
        NodeLabel::Type | NodeLabel::Description => node.name.clone(),
    }
}

fn entity_card(profile: &EntityProfile) -> String {
    let mut card = format!("{}\n\n{}", profile.name, profile.triple());
    if !profile.knowledge.is_empty() {
        let _ = write!(card, "\nrelated knowledge: {}", profile.knowledge.join("; "));
    }
    if !profile.relations.is_empty() {
        let relations: Vec<String> = profile
            .relations
            .iter()
            .map(|(s, p, t)| format!("({s}, {p}, {t})"))
            .collect();
        let _ = write!(card, "\nrelations: {}", relations.join("; "));
    }
    card
}

fn knowledge_card(store: &GraphStore, node: &GraphNode, policy: &RetryPolicy) -> String {
    let mut card = node.name.clone();
    let mut first = true;
    for n in store.neighbors_of_with(node, policy) {
        let is_mention = n.edge.kind == EdgeKind::Knowledge
            && n.direction == EdgeDirection::Incoming
            && n.node.label == NodeLabel::Entity;
        if !is_mention {
            continue;
        }
        card.push_str(if first { "\n\n" } else { "\n" });
        first = false;
        card.push_str(&EntityProfile::collect_with(store, &n.node, policy).mention());
    }
    card
}
