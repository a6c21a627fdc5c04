//! Record normalizer: repairs loosely-shaped extraction output.
//!
//! Extraction models produce JSON that is *almost* the canonical schema:
//! synonym keys (`relations`, `subject`/`predicate`/`object`, `描述`), missing
//! fields, wrong container types. This module rewrites synonyms, validates the
//! result, and converts it into a typed [`KnowledgeRecord`].
//!
//! - [`revise`] rewrites synonym keys and fills top-level defaults
//! - [`validate`] is a pure check returning every [`FieldError`]
//! - [`normalize`] is total: any input yields a structurally valid record
//! - [`triage`] runs one external repair round-trip for records that fail
//!   validation, and drops them if that does not help

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

use crate::record::{Entity, KnowledgeRecord, Relation, RelationEnd};

const ENTITY_KEYS: [&str; 3] = ["entity", "type", "description"];
const RELATION_KEYS: [&str; 3] = ["entity1", "relation", "entity2"];

/// Synonym → canonical key rewrites for entity items.
const ENTITY_SYNONYMS: &[(&str, &str)] = &[("描述", "description")];

/// Synonym → canonical key rewrites for relation items, applied in order.
const RELATION_SYNONYMS: &[(&str, &str)] = &[
    ("subject", "entity1"),
    ("predicate", "relation"),
    ("object", "entity2"),
    ("type", "relation"),
    ("relationship", "relation"),
];

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?(.*?)```").unwrap());

/// How far a synonym repair reaches when one item is missing keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairScope {
    /// Repair only the entity or relation that is missing keys.
    #[default]
    PerItem,
    /// One incomplete item triggers the repair over every item of the same
    /// list, and every synonym present is popped and overwrites the canonical
    /// key, later synonyms winning. Kept for compatibility with logs produced
    /// that way.
    RecordWide,
}

/// A single validation failure: which field, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Rewrite synonym keys to canonical ones and fill top-level defaults.
///
/// Non-object input is replaced by an empty object. After this call the
/// top-level `knowledge`, `entities` and `relation` fields always exist with
/// the right container types; nested items may still be incomplete.
pub fn revise(raw: Value, scope: RepairScope) -> Value {
    let mut obj = match raw {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    rename_if_absent(&mut obj, "relations", "relation");
    rename_if_absent(&mut obj, "entitie", "entities");

    if !obj.get("knowledge").is_some_and(Value::is_string) {
        obj.insert("knowledge".into(), Value::String(String::new()));
    }

    match obj.get_mut("entities") {
        Some(Value::Array(items)) => repair_items(items, &ENTITY_KEYS, ENTITY_SYNONYMS, scope),
        _ => {
            obj.insert("entities".into(), Value::Array(Vec::new()));
        }
    }

    match obj.get_mut("relation") {
        Some(Value::Array(items)) => {
            repair_items(items, &RELATION_KEYS, RELATION_SYNONYMS, scope)
        }
        _ => {
            obj.insert("relation".into(), Value::Array(Vec::new()));
        }
    }

    Value::Object(obj)
}

fn rename_if_absent(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if !obj.contains_key(to) {
        if let Some(v) = obj.remove(from) {
            obj.insert(to.to_string(), v);
        }
    }
}

fn repair_items(
    items: &mut [Value],
    required: &[&str],
    synonyms: &[(&str, &str)],
    scope: RepairScope,
) {
    match scope {
        RepairScope::PerItem => {
            for item in items.iter_mut() {
                if !missing_keys(item, required).is_empty() {
                    apply_synonyms(item, synonyms);
                }
            }
        }
        RepairScope::RecordWide => {
            if items
                .iter()
                .any(|item| !missing_keys(item, required).is_empty())
            {
                for item in items.iter_mut() {
                    overwrite_with_synonyms(item, synonyms);
                }
            }
        }
    }
}

fn apply_synonyms(item: &mut Value, synonyms: &[(&str, &str)]) {
    if let Value::Object(obj) = item {
        for (from, to) in synonyms {
            rename_if_absent(obj, from, to);
        }
    }
}

fn overwrite_with_synonyms(item: &mut Value, synonyms: &[(&str, &str)]) {
    if let Value::Object(obj) = item {
        for (from, to) in synonyms {
            if let Some(v) = obj.remove(*from) {
                obj.insert(to.to_string(), v);
            }
        }
    }
}

fn missing_keys<'a>(item: &Value, required: &[&'a str]) -> Vec<&'a str> {
    match item {
        Value::Object(obj) => required
            .iter()
            .copied()
            .filter(|k| !obj.contains_key(*k))
            .collect(),
        _ => required.to_vec(),
    }
}

/// Validate a (revised or raw) record. Pure; returns every failure found.
pub fn validate(value: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !value.get("knowledge").is_some_and(Value::is_string) {
        errors.push(FieldError::new(
            "knowledge",
            "Missing or invalid 'knowledge' field",
        ));
    }

    check_list(value, "entities", &ENTITY_KEYS, &mut errors);
    check_list(value, "relation", &RELATION_KEYS, &mut errors);

    errors
}

fn check_list(value: &Value, field: &str, required: &[&str], errors: &mut Vec<FieldError>) {
    match value.get(field) {
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                let missing = missing_keys(item, required);
                if !missing.is_empty() {
                    errors.push(FieldError::new(
                        format!("{field}[{index}]"),
                        format!("Missing keys: {}", missing.join(", ")),
                    ));
                }
            }
        }
        _ => errors.push(FieldError::new(
            field,
            format!("Missing or invalid '{field}' field"),
        )),
    }
}

/// Normalize arbitrary input into a typed record using per-item repair.
///
/// Never fails. Items that cannot be typed (no usable entity name, relation
/// ends that are neither strings nor lists) are left out.
pub fn normalize(raw: &Value) -> KnowledgeRecord {
    normalize_with(raw, RepairScope::default())
}

/// [`normalize`] with an explicit repair scope.
pub fn normalize_with(raw: &Value, scope: RepairScope) -> KnowledgeRecord {
    to_record(&revise(raw.clone(), scope))
}

/// Convert an already-revised value into a typed record.
fn to_record(revised: &Value) -> KnowledgeRecord {
    let knowledge = revised
        .get("knowledge")
        .and_then(Value::as_str)
        .map(clean_name)
        .unwrap_or_default();

    let entities = revised
        .get("entities")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(to_entity).collect())
        .unwrap_or_default();

    let relations = revised
        .get("relation")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(to_relation).collect())
        .unwrap_or_default();

    KnowledgeRecord {
        knowledge,
        entities,
        relations,
    }
}

fn to_entity(item: &Value) -> Option<Entity> {
    let name = item.get("entity").and_then(scalar_text)?;
    if name.is_empty() {
        return None;
    }
    Some(Entity {
        entity: name,
        kind: item.get("type").and_then(scalar_text).unwrap_or_default(),
        description: item
            .get("description")
            .and_then(scalar_text)
            .unwrap_or_default(),
    })
}

fn to_relation(item: &Value) -> Option<Relation> {
    Some(Relation {
        entity1: to_end(item.get("entity1")?)?,
        relation: item.get("relation").and_then(scalar_text)?,
        entity2: to_end(item.get("entity2")?)?,
    })
}

fn to_end(value: &Value) -> Option<RelationEnd> {
    match value {
        Value::Array(items) => Some(RelationEnd::Many(
            items.iter().filter_map(scalar_text).collect(),
        )),
        other => scalar_text(other).map(RelationEnd::One),
    }
}

/// Render a JSON scalar as a cleaned name. Objects, arrays and null yield `None`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(clean_name(s)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Trim and NFC-normalize so that visually identical names share one node.
pub fn clean_name(s: &str) -> String {
    s.trim().nfc().collect()
}

/// Recover a JSON object from free-form model output.
///
/// Accepts bare JSON, JSON inside a ```` ```json ```` fence, or JSON
/// surrounded by prose (the outermost `{ ... }` span is tried last).
pub fn parse_oracle_output(text: &str) -> Option<Value> {
    let body = FENCED_JSON
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body) {
        return Some(value);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Outcome of triaging one raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Triage {
    /// Valid after synonym repair alone.
    Valid(KnowledgeRecord),
    /// Valid after one external repair round-trip.
    Repaired(KnowledgeRecord),
    /// Still invalid after the repair round-trip; not persisted.
    Dropped(Vec<FieldError>),
}

impl Triage {
    /// The record, if it survived triage.
    pub fn into_record(self) -> Option<KnowledgeRecord> {
        match self {
            Triage::Valid(r) | Triage::Repaired(r) => Some(r),
            Triage::Dropped(_) => None,
        }
    }
}

/// Revise, validate, and give an invalid record exactly one repair attempt.
///
/// `repair` receives the revised (still invalid) value and returns the
/// oracle's rewrite, or `None` if the oracle call itself failed.
pub fn triage<F>(raw: Value, scope: RepairScope, repair: F) -> Triage
where
    F: FnOnce(&Value) -> Option<Value>,
{
    let revised = revise(raw, scope);
    let errors = validate(&revised);
    if errors.is_empty() {
        return Triage::Valid(to_record(&revised));
    }

    tracing::debug!(errors = errors.len(), "record invalid, requesting repair");
    let Some(fixed) = repair(&revised) else {
        return Triage::Dropped(errors);
    };

    let fixed = revise(fixed, scope);
    let errors = validate(&fixed);
    if errors.is_empty() {
        Triage::Repaired(to_record(&fixed))
    } else {
        Triage::Dropped(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_input_normalizes_to_valid_shape() {
        let record = normalize(&json!({}));
        assert!(record.is_empty());
        let as_value = serde_json::to_value(&record).unwrap();
        assert!(validate(&as_value).is_empty());
    }

    #[test]
    fn non_object_input_is_total() {
        for raw in [json!(null), json!([1, 2]), json!("text"), json!(42)] {
            let record = normalize(&raw);
            assert!(record.is_empty());
        }
    }

    #[test]
    fn relations_synonym_is_canonicalized() {
        let raw = json!({
            "knowledge": "k",
            "entities": [],
            "relations": [{"entity1": "a", "relation": "r", "entity2": "b"}]
        });
        let revised = revise(raw, RepairScope::PerItem);
        assert!(revised.get("relations").is_none());
        assert_eq!(revised["relation"][0]["entity2"], "b");
        assert!(validate(&revised).is_empty());
    }

    #[test]
    fn entitie_synonym_is_canonicalized() {
        let raw = json!({"entitie": [{"entity": "a", "type": "t", "description": "d"}]});
        let record = normalize(&raw);
        assert_eq!(record.entities.len(), 1);
        assert_eq!(record.entities[0].entity, "a");
    }

    #[test]
    fn knowledge_defaults_when_not_a_string() {
        let revised = revise(json!({"knowledge": 7}), RepairScope::PerItem);
        assert_eq!(revised["knowledge"], "");
    }

    #[test]
    fn triple_synonyms_map_to_canonical_relation_keys() {
        let raw = json!({
            "relation": [
                {"subject": "a", "predicate": "p", "object": "b"},
                {"entity1": "c", "relationship": "q", "entity2": "d"},
                {"entity1": "e", "type": "t", "entity2": "f"}
            ]
        });
        let record = normalize(&raw);
        assert_eq!(record.relations.len(), 3);
        assert_eq!(record.relations[0], Relation::new("a", "p", "b"));
        assert_eq!(record.relations[1], Relation::new("c", "q", "d"));
        assert_eq!(record.relations[2], Relation::new("e", "t", "f"));
    }

    #[test]
    fn description_synonym_per_item() {
        let raw = json!({
            "entities": [
                {"entity": "a", "type": "t", "描述": "d"},
                {"entity": "b", "type": "t", "description": "x", "描述": "y"}
            ]
        });
        let revised = revise(raw, RepairScope::PerItem);
        assert_eq!(revised["entities"][0]["description"], "d");
        // Complete item is untouched under per-item repair.
        assert_eq!(revised["entities"][1]["描述"], "y");
        assert_eq!(revised["entities"][1]["description"], "x");
    }

    #[test]
    fn record_wide_repair_touches_complete_items() {
        let raw = json!({
            "entities": [
                {"entity": "a", "type": "t", "描述": "d"},
                {"entity": "b", "type": "t", "描述": "y"}
            ],
            "relation": [
                {"entity1": "a", "relation": "r", "entity2": "b", "predicate": "ignored"},
                {"subject": "b", "predicate": "p", "object": "a"}
            ]
        });
        let per_item = revise(raw.clone(), RepairScope::PerItem);
        assert!(per_item["relation"][0].get("predicate").is_some());

        let wide = revise(raw, RepairScope::RecordWide);
        assert_eq!(wide["entities"][1]["description"], "y");
        // Synonyms overwrite the canonical key and are removed.
        assert_eq!(wide["relation"][0]["relation"], "ignored");
        assert!(wide["relation"][0].get("predicate").is_none());
        assert!(validate(&wide).is_empty());
    }

    #[test]
    fn record_wide_later_synonym_overwrites_relation() {
        let raw = json!({
            "relation": [
                {"entity1": "a", "relation": "r", "entity2": "b", "type": "t"},
                {"entity1": "c", "entity2": "d"}
            ]
        });
        let wide = revise(raw.clone(), RepairScope::RecordWide);
        assert_eq!(wide["relation"][0]["relation"], "t");
        assert!(wide["relation"][0].get("type").is_none());

        let per_item = revise(raw, RepairScope::PerItem);
        assert_eq!(per_item["relation"][0]["relation"], "r");
        assert_eq!(per_item["relation"][0]["type"], "t");
    }

    #[test]
    fn validate_reports_nested_missing_keys() {
        let value = json!({
            "knowledge": "",
            "entities": [{"entity": "a"}],
            "relation": [{"entity1": "a", "entity2": "b"}, "junk"]
        });
        let errors = validate(&value);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].field, "entities[0]");
        assert_eq!(errors[0].reason, "Missing keys: type, description");
        assert_eq!(errors[1].field, "relation[0]");
        assert_eq!(errors[2].reason, "Missing keys: entity1, relation, entity2");
    }

    #[test]
    fn validate_reports_missing_top_level_fields() {
        let errors = validate(&json!({"entities": {}}));
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["knowledge", "entities", "relation"]);
    }

    #[test]
    fn untypable_items_are_skipped() {
        let raw = json!({
            "entities": [
                {"entity": "", "type": "t", "description": "d"},
                {"entity": {"nested": true}, "type": "t", "description": "d"},
                {"entity": "  胰岛素 ", "type": "激素"}
            ],
            "relation": [{"entity1": "a", "relation": "r", "entity2": null}]
        });
        let record = normalize(&raw);
        assert_eq!(record.entities, vec![Entity::new("胰岛素", "激素", "")]);
        assert!(record.relations.is_empty());
    }

    #[test]
    fn names_are_nfc_normalized() {
        // "é" as e + combining acute accent.
        let decomposed = "caf\u{0065}\u{0301}";
        assert_eq!(clean_name(decomposed), "caf\u{00e9}");
    }

    #[test]
    fn parse_fenced_and_bare_output() {
        let fenced = "Here you go:\n```json\n{\"knowledge\": \"k\"}\n```\nthanks";
        assert_eq!(parse_oracle_output(fenced).unwrap()["knowledge"], "k");

        let bare = "{\"entities\": []}";
        assert!(parse_oracle_output(bare).is_some());

        let prose = "result: {\"knowledge\": \"x\"} end";
        assert_eq!(parse_oracle_output(prose).unwrap()["knowledge"], "x");

        assert!(parse_oracle_output("no json here").is_none());
        assert!(parse_oracle_output("[1, 2]").is_none());
    }

    #[test]
    fn triage_valid_record_skips_repair() {
        let raw = json!({"knowledge": "k", "entities": [], "relation": []});
        let outcome = triage(raw, RepairScope::PerItem, |_| panic!("repair must not run"));
        assert!(matches!(outcome, Triage::Valid(_)));
    }

    #[test]
    fn triage_repairs_once_then_drops() {
        let broken = json!({"entities": [{"entity": "a"}]});

        let repaired = triage(broken.clone(), RepairScope::PerItem, |_| {
            Some(json!({"entities": [{"entity": "a", "type": "t", "description": "d"}]}))
        });
        let record = repaired.into_record().unwrap();
        assert_eq!(record.entities[0].kind, "t");

        let dropped = triage(broken.clone(), RepairScope::PerItem, |v| Some(v.clone()));
        assert!(matches!(dropped, Triage::Dropped(ref e) if e.len() == 1));

        let oracle_down = triage(broken, RepairScope::PerItem, |_| None);
        assert!(oracle_down.into_record().is_none());
    }
}
