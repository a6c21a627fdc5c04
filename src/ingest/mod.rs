//! Concurrent ingestion: text units → knowledge records → graph.
//!
//! Per unit the pipeline is: extract → revise → summarize (one retried step,
//! 5 attempts by default) → triage with at most one repair → project into the
//! graph → append to the result log. Units run on a bounded rayon pool; a
//! failing unit is logged and skipped, never aborting the batch.
//!
//! The module also hosts the offline passes over an existing result log:
//! [`renormalize_log`], [`load_log_into_graph`] and [`check_log`].

pub mod log;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IngestError, OracleError};
use crate::graph::{GraphStore, ProjectionStats, project_record};
use crate::normalize::{self, FieldError, RepairScope, Triage};
use crate::oracle::{Extractor, with_retry};
use crate::retry::RetryPolicy;

pub use log::ResultLog;

/// Result type for ingestion operations.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Worker count. Zero means [`IngestConfig::default_concurrency`].
    pub concurrency: usize,
    /// Attempts for the extract+summarize step.
    pub oracle_attempts: u32,
    pub repair_scope: RepairScope,
    /// Result log location. `None` disables the log.
    pub log_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            oracle_attempts: 5,
            repair_scope: RepairScope::PerItem,
            log_path: Some(PathBuf::from("data/graph.json")),
        }
    }
}

impl IngestConfig {
    /// Half the available cores, at least one.
    pub fn default_concurrency() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1)
            .max(1)
    }

    pub fn effective_concurrency(&self, requested: usize) -> usize {
        match (requested, self.concurrency) {
            (0, 0) => Self::default_concurrency(),
            (0, configured) => configured,
            (requested, _) => requested,
        }
    }
}

/// What happened to one text unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Projected into the graph (and logged, if a log is configured).
    Ingested,
    /// Extraction failed on every attempt.
    Skipped,
    /// Extraction produced a record that stayed invalid after repair, or an
    /// empty record.
    Dropped,
    /// The caller's cancel token or deadline stopped the unit.
    Cancelled,
}

/// Summary of one [`GraphIngestor::ingest_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub submitted: usize,
    pub ingested: usize,
    /// Units whose record needed the repair round-trip.
    pub repaired: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub cancelled: usize,
    /// Records projected but not persisted to the result log.
    pub log_failures: usize,
    pub projection: ProjectionStats,
}

impl IngestReport {
    fn record(&mut self, result: UnitResult) {
        match result.outcome {
            UnitOutcome::Ingested => self.ingested += 1,
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Dropped => self.dropped += 1,
            UnitOutcome::Cancelled => self.cancelled += 1,
        }
        if result.repaired {
            self.repaired += 1;
        }
        if result.log_failed {
            self.log_failures += 1;
        }
        self.projection.merge(result.projection);
    }
}

impl std::fmt::Display for IngestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} submitted, {} ingested ({} repaired), {} skipped, {} dropped, {} cancelled; \
             {} nodes / {} edges written, {} writes dropped",
            self.submitted,
            self.ingested,
            self.repaired,
            self.skipped,
            self.dropped,
            self.cancelled,
            self.projection.nodes,
            self.projection.edges,
            self.projection.dropped,
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct UnitResult {
    outcome: UnitOutcome,
    repaired: bool,
    log_failed: bool,
    projection: ProjectionStats,
}

impl UnitResult {
    fn bare(outcome: UnitOutcome) -> Self {
        Self {
            outcome,
            repaired: false,
            log_failed: false,
            projection: ProjectionStats::default(),
        }
    }
}

/// Drives extraction, normalization and projection for batches of text.
pub struct GraphIngestor {
    extractor: Arc<dyn Extractor>,
    store: Arc<GraphStore>,
    log: Option<Arc<ResultLog>>,
    config: IngestConfig,
    policy: RetryPolicy,
}

impl GraphIngestor {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        store: Arc<GraphStore>,
        log: Option<Arc<ResultLog>>,
        config: IngestConfig,
    ) -> Self {
        let policy = RetryPolicy::oracle().with_attempts(config.oracle_attempts);
        Self {
            extractor,
            store,
            log,
            config,
            policy,
        }
    }

    /// Override the oracle retry policy, e.g. to attach a cancel token.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Ingest every unit with at most `concurrency` workers (0 = configured
    /// default). Never fails: per-unit problems are logged and counted.
    pub fn ingest_all(&self, units: &[String], concurrency: usize) -> IngestReport {
        let workers = self.config.effective_concurrency(concurrency);
        let started = Instant::now();
        tracing::info!(units = units.len(), workers, "starting ingestion");

        let results: Vec<UnitResult> = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("medgraph-ingest-{i}"))
            .build()
        {
            Ok(pool) => pool.install(|| units.par_iter().map(|u| self.ingest_one(u)).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "worker pool unavailable, ingesting sequentially");
                units.iter().map(|u| self.ingest_one(u)).collect()
            }
        };

        let mut report = IngestReport {
            submitted: units.len(),
            ..IngestReport::default()
        };
        for result in results {
            report.record(result);
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            %report,
            "ingestion finished"
        );
        report
    }

    /// Ingest a single unit.
    pub fn ingest_unit(&self, text: &str) -> UnitOutcome {
        self.ingest_one(text).outcome
    }

    fn ingest_one(&self, text: &str) -> UnitResult {
        let scope = self.config.repair_scope;
        let raw = with_retry(&self.policy, "extract", || {
            let entities = self.extractor.extract(text)?;
            let entities = normalize::revise(entities, scope);
            self.extractor.summarize(&entities)
        });

        let raw = match raw {
            Ok(raw) => raw,
            Err(OracleError::Cancelled { .. }) => {
                tracing::info!(unit = preview(text), "unit cancelled");
                return UnitResult::bare(UnitOutcome::Cancelled);
            }
            Err(e) => {
                tracing::warn!(unit = preview(text), error = %e, "extraction failed, skipping unit");
                return UnitResult::bare(UnitOutcome::Skipped);
            }
        };

        let (record, repaired) = match normalize::triage(raw, scope, |value| self.repair(value)) {
            Triage::Valid(record) => (record, false),
            Triage::Repaired(record) => (record, true),
            Triage::Dropped(errors) => {
                tracing::warn!(
                    unit = preview(text),
                    errors = %join_errors(&errors),
                    "record invalid after repair, dropping"
                );
                return UnitResult::bare(UnitOutcome::Dropped);
            }
        };

        if record.is_empty() {
            tracing::warn!(unit = preview(text), "extraction produced an empty record");
            return UnitResult::bare(UnitOutcome::Dropped);
        }

        let projection = project_record(&self.store, &record);

        let mut log_failed = false;
        if let Some(log) = &self.log {
            if let Err(e) = log.append(&record) {
                tracing::error!(unit = preview(text), error = %e, "failed to append to result log");
                log_failed = true;
            }
        }

        UnitResult {
            outcome: UnitOutcome::Ingested,
            repaired,
            log_failed,
            projection,
        }
    }

    fn repair(&self, value: &Value) -> Option<Value> {
        self.extractor
            .repair(value)
            .map_err(|e| tracing::debug!(error = %e, "repair call failed"))
            .ok()
    }
}

/// First few characters of a unit, for log lines.
fn preview(text: &str) -> String {
    const MAX: usize = 40;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Drop repeated units, keeping the last occurrence of each.
///
/// Survivors stay in their original relative order.
pub fn dedupe_units(units: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut kept: Vec<String> = units
        .into_iter()
        .rev()
        .filter(|unit| seen.insert(unit.clone()))
        .collect();
    kept.reverse();
    kept
}

/// Read text units from a JSON file: either an array of strings or an array
/// of objects with a `knowledge` field.
pub fn read_units(path: &std::path::Path) -> IngestResult<Vec<String>> {
    let input_err = |message: String| IngestError::Input {
        path: path.display().to_string(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| input_err(e.to_string()))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| input_err(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(input_err("expected a JSON array".into()));
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            Value::Object(mut obj) => match obj.remove("knowledge") {
                Some(Value::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect())
}

/// Counts from a triage pass over a result log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriageReport {
    pub valid: usize,
    pub repaired: usize,
    pub dropped: usize,
}

/// Re-run triage over every entry of an existing log and rewrite it with the
/// survivors in canonical form.
///
/// Invalid entries get one repair call (single attempt); entries still
/// invalid afterwards are removed from the log.
pub fn renormalize_log(
    log: &ResultLog,
    extractor: &dyn Extractor,
    scope: RepairScope,
) -> IngestResult<TriageReport> {
    let entries = log.read_raw()?;
    let mut report = TriageReport::default();
    let mut kept = Vec::with_capacity(entries.len());

    for (i, entry) in entries.into_iter().enumerate() {
        let outcome = normalize::triage(entry, scope, |value| {
            extractor
                .repair(value)
                .map_err(|e| tracing::debug!(entry = i, error = %e, "repair call failed"))
                .ok()
        });
        match outcome {
            Triage::Valid(record) => {
                report.valid += 1;
                kept.push(record);
            }
            Triage::Repaired(record) => {
                report.repaired += 1;
                kept.push(record);
            }
            Triage::Dropped(errors) => {
                report.dropped += 1;
                tracing::warn!(entry = i, errors = %join_errors(&errors), "dropping log entry");
            }
        }
    }

    log.replace_all(&kept)?;
    tracing::info!(?report, path = %log.path().display(), "result log renormalized");
    Ok(report)
}

/// Project every entry of a log into the graph.
///
/// Entries are normalized first, so loosely-shaped legacy entries still
/// load. Graph write failures are counted in the returned stats.
pub fn load_log_into_graph(log: &ResultLog, store: &GraphStore) -> IngestResult<ProjectionStats> {
    let entries = log.read_raw()?;
    let mut stats = ProjectionStats::default();
    for entry in &entries {
        stats.merge(project_record(store, &normalize::normalize(entry)));
    }
    tracing::info!(
        entries = entries.len(),
        nodes = stats.nodes,
        edges = stats.edges,
        dropped = stats.dropped,
        "result log loaded into graph"
    );
    Ok(stats)
}

/// Validate every log entry without changing anything.
///
/// Returns `(entry index, errors)` for each entry that fails validation even
/// after synonym repair.
pub fn check_log(log: &ResultLog, scope: RepairScope) -> IngestResult<Vec<(usize, Vec<FieldError>)>> {
    Ok(log
        .read_raw()?
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let errors = normalize::validate(&normalize::revise(entry, scope));
            (!errors.is_empty()).then_some((i, errors))
        })
        .collect())
}
