//! Persistence tests: index snapshots, the result log, and config files
//! surviving a round trip through disk.

use std::path::Path;

use medgraph::config::{BackendKind, Config};
use medgraph::error::IndexError;
use medgraph::graph::GraphNode;
use medgraph::index::{FlatIndex, IndexSnapshot};
use medgraph::ingest::ResultLog;
use medgraph::normalize::RepairScope;
use medgraph::record::{Entity, KnowledgeRecord, Relation};

fn snapshot(names: &[&str]) -> IndexSnapshot {
    let rows: Vec<Vec<f32>> = (0..names.len())
        .map(|i| vec![i as f32, (i * i) as f32, 1.0])
        .collect();
    let ids = names.iter().map(|n| GraphNode::entity(*n)).collect();
    IndexSnapshot::new(FlatIndex::from_rows(rows).unwrap(), ids).unwrap()
}

fn record(knowledge: &str) -> KnowledgeRecord {
    KnowledgeRecord {
        knowledge: knowledge.into(),
        entities: vec![Entity::new("胰岛素", "激素", "调节血糖水平的激素")],
        relations: vec![Relation::new("胰岛素", "主要分泌腺体", "胰腺")],
    }
}

fn copy_file(from: &Path, to: &Path, name: &str) {
    std::fs::copy(from.join(name), to.join(name)).unwrap();
}

#[test]
fn index_snapshot_survives_reload() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("index");

    let original = snapshot(&["胰岛素", "胰腺", "血糖"]);
    original.save(&path).unwrap();

    let loaded = IndexSnapshot::load(&path).unwrap();
    assert_eq!(loaded, original);

    let hits = loaded.search(&[1.0, 1.0, 1.0], 1).unwrap();
    assert_eq!(hits[0].0, GraphNode::entity("胰腺"));
    assert_eq!(hits[0].1.position, 1);
}

#[test]
fn saving_replaces_the_previous_snapshot() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("index");

    snapshot(&["a", "b"]).save(&path).unwrap();
    let second = snapshot(&["x", "y", "z"]);
    second.save(&path).unwrap();

    let loaded = IndexSnapshot::load(&path).unwrap();
    assert_eq!(loaded.build_id(), second.build_id());
    assert_eq!(loaded.len(), 3);

    // No staging or retired directories left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("index")]);
}

#[test]
fn identifiers_from_another_build_are_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    snapshot(&["a", "b"]).save(&first).unwrap();
    snapshot(&["c", "d"]).save(&second).unwrap();
    copy_file(&second, &first, "ids.json");

    let err = IndexSnapshot::load(&first).unwrap_err();
    assert!(matches!(err, IndexError::MismatchedArtifacts { .. }));
}

#[test]
fn missing_snapshot_is_an_io_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = IndexSnapshot::load(&dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, IndexError::Io { .. }));
}

#[test]
fn result_log_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("data").join("graph.json");

    {
        let log = ResultLog::open(&path).unwrap();
        assert!(log.is_empty().unwrap());
        log.append(&record("胰岛素是由胰腺分泌的激素")).unwrap();
        log.append(&record("胰岛素降低血糖")).unwrap();
    }

    let log = ResultLog::open(&path).unwrap();
    let entries = log.read_raw().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["knowledge"], "胰岛素降低血糖");
    assert_eq!(entries[0]["relation"][0]["entity2"], "胰腺");
    assert_eq!(entries[0]["entities"][0]["type"], "激素");
}

#[test]
fn result_log_replace_all_rewrites_contents() {
    let dir = tempfile::TempDir::new().unwrap();
    let log = ResultLog::open(dir.path().join("graph.json")).unwrap();
    log.append(&record("一")).unwrap();
    log.append(&record("二")).unwrap();

    log.replace_all(&[record("三")]).unwrap();
    let entries = log.read_raw().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["knowledge"], "三");
    assert!(!dir.path().join("graph.json.tmp").exists());
}

#[test]
fn config_round_trips_through_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("conf").join("medgraph.toml");

    let mut config = Config::default();
    config.graph.backend = BackendKind::Memory;
    config.ingest.concurrency = 8;
    config.ingest.repair_scope = RepairScope::RecordWide;
    config.retrieve.top_k = 5;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn malformed_config_reports_parse_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[graph\nbackend = ").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("bad.toml"));
}
