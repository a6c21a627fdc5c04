//! Canonical knowledge record schema.
//!
//! A [`KnowledgeRecord`] is one unit of extracted knowledge: the source
//! statement plus the entities and relations an extraction model found in it.
//! This is also the on-disk shape of the result log (a JSON array of records).

use serde::{Deserialize, Serialize};

/// One unit of ingested knowledge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// The source statement. May be empty.
    #[serde(default)]
    pub knowledge: String,
    /// Entities mentioned by the statement.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Relations between entities. Serialized under the canonical key `relation`.
    #[serde(default, rename = "relation")]
    pub relations: Vec<Relation>,
}

impl KnowledgeRecord {
    /// Whether the record carries nothing worth persisting.
    pub fn is_empty(&self) -> bool {
        self.knowledge.is_empty() && self.entities.is_empty() && self.relations.is_empty()
    }
}

/// A named entity with its type and a short description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Natural key within the `entity` label space. Never empty once normalized.
    pub entity: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl Entity {
    pub fn new(
        entity: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            kind: kind.into(),
            description: description.into(),
        }
    }
}

/// A predicate between two entity ends, either of which may fan out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub entity1: RelationEnd,
    /// Free-text semantic predicate, stored as an edge property.
    pub relation: String,
    pub entity2: RelationEnd,
}

impl Relation {
    pub fn new(
        entity1: impl Into<RelationEnd>,
        relation: impl Into<String>,
        entity2: impl Into<RelationEnd>,
    ) -> Self {
        Self {
            entity1: entity1.into(),
            relation: relation.into(),
            entity2: entity2.into(),
        }
    }

    /// Expand fan-out into concrete `(source, predicate, target)` triples.
    ///
    /// The expansion is the cartesian product of both ends; empty names are
    /// skipped, and an empty predicate yields nothing.
    pub fn triples(&self) -> Vec<(&str, &str, &str)> {
        if self.relation.is_empty() {
            return Vec::new();
        }
        let targets: Vec<&str> = self.entity2.names().collect();
        let mut out = Vec::new();
        for source in self.entity1.names() {
            for target in &targets {
                out.push((source, self.relation.as_str(), *target));
            }
        }
        out
    }
}

/// One end of a relation: a single entity name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationEnd {
    One(String),
    Many(Vec<String>),
}

impl RelationEnd {
    /// Iterate over the non-empty names at this end.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            RelationEnd::One(name) => std::slice::from_ref(name),
            RelationEnd::Many(names) => names,
        };
        slice.iter().map(String::as_str).filter(|n| !n.is_empty())
    }
}

impl From<&str> for RelationEnd {
    fn from(name: &str) -> Self {
        RelationEnd::One(name.to_string())
    }
}

impl From<String> for RelationEnd {
    fn from(name: String) -> Self {
        RelationEnd::One(name)
    }
}

impl From<Vec<&str>> for RelationEnd {
    fn from(names: Vec<&str>) -> Self {
        RelationEnd::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for RelationEnd {
    fn from(names: Vec<String>) -> Self {
        RelationEnd::Many(names)
    }
}
