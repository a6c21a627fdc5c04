//! Rich diagnostic error types for medgraph.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so operators know exactly
//! what went wrong and how to fix it.
//!
//! Note that ingestion and retrieval swallow transient failures by policy:
//! these types surface on the fallible edges (artifact loading, config files,
//! the result log) and inside retry loops, where they are logged.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for medgraph.
#[derive(Debug, Error, Diagnostic)]
pub enum MedGraphError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Oracle errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum OracleError {
    #[error("{oracle} request failed: {message}")]
    #[diagnostic(
        code(medgraph::oracle::request_failed),
        help(
            "Check that the {oracle} service is running and reachable at the \
             configured URL, and that the model is available."
        )
    )]
    RequestFailed { oracle: String, message: String },

    #[error("failed to parse {oracle} response: {message}")]
    #[diagnostic(
        code(medgraph::oracle::malformed),
        help(
            "The service returned output that is not the expected JSON shape. \
             Extraction models occasionally do this; the call is retried."
        )
    )]
    Malformed { oracle: String, message: String },

    #[error("{oracle} returned {actual} results for {expected} inputs")]
    #[diagnostic(
        code(medgraph::oracle::length_mismatch),
        help("The service must return exactly one result per input, in input order.")
    )]
    LengthMismatch {
        oracle: String,
        expected: usize,
        actual: usize,
    },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    #[diagnostic(
        code(medgraph::oracle::exhausted),
        help(
            "Every retry attempt failed. The work item is skipped; inspect the \
             last error for the root cause."
        )
    )]
    Exhausted {
        operation: String,
        attempts: u32,
        last: String,
    },

    #[error("{operation} cancelled before completion")]
    #[diagnostic(
        code(medgraph::oracle::cancelled),
        help("The caller's deadline passed or cancellation was requested.")
    )]
    Cancelled { operation: String },
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph backend request failed: {message}")]
    #[diagnostic(
        code(medgraph::graph::request),
        help(
            "The graph database could not be reached or rejected the request. \
             Check the connection URI, credentials and that the server is up."
        )
    )]
    Request { message: String },

    #[error("graph backend returned an error: {code}: {message}")]
    #[diagnostic(
        code(medgraph::graph::backend),
        help("The Cypher statement failed on the server. See the server error code.")
    )]
    Backend { code: String, message: String },

    #[error("unreadable graph backend response: {message}")]
    #[diagnostic(
        code(medgraph::graph::response),
        help("The server answered with an unexpected payload shape.")
    )]
    Response { message: String },

    #[error("node not found: {id}")]
    #[diagnostic(
        code(medgraph::graph::node_not_found),
        help(
            "The identifier does not resolve to a node. The vector index may be \
             stale relative to the graph; rebuild it."
        )
    )]
    NodeNotFound { id: String },

    #[error("graph operation cancelled: {operation}")]
    #[diagnostic(
        code(medgraph::graph::cancelled),
        help("The caller's deadline passed or cancellation was requested.")
    )]
    Cancelled { operation: String },
}

// ---------------------------------------------------------------------------
// Index errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("I/O error on index artifact {path}: {source}")]
    #[diagnostic(
        code(medgraph::index::io),
        help(
            "A filesystem operation on the index directory failed. Check that \
             it exists, has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("index serialization error: {message}")]
    #[diagnostic(
        code(medgraph::index::serde),
        help("The index artifacts are unreadable. Rebuild the index.")
    )]
    Serialization { message: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(medgraph::index::dim_mismatch),
        help(
            "All vectors in an index must share one dimension. The query was \
             probably encoded by a different embedding model than the index."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("mismatched index artifacts in {path}: {message}")]
    #[diagnostic(
        code(medgraph::index::mismatched_pair),
        help(
            "The vector file and identifier file were not produced by the same \
             build. Never update one without the other; rebuild the index."
        )
    )]
    MismatchedArtifacts { path: String, message: String },

    #[error("cannot build an index from zero nodes")]
    #[diagnostic(
        code(medgraph::index::empty),
        help("Ingest knowledge into the graph before building the index.")
    )]
    Empty,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),
}

// ---------------------------------------------------------------------------
// Ingest errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("result log I/O error at {path}: {source}")]
    #[diagnostic(
        code(medgraph::ingest::log_io),
        help(
            "Failed to read or write the result log. Check the path and \
             permissions. Only one ingesting process may own a log file."
        )
    )]
    LogIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("result log {path} is not a JSON array: {message}")]
    #[diagnostic(
        code(medgraph::ingest::log_parse),
        help("The log must contain a JSON array of knowledge records.")
    )]
    LogParse { path: String, message: String },

    #[error("cannot read text units from {path}: {message}")]
    #[diagnostic(
        code(medgraph::ingest::input),
        help(
            "The input must be a JSON array of strings, or of objects with a \
             `knowledge` string field."
        )
    )]
    Input { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(medgraph::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(medgraph::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(medgraph::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for functions returning medgraph results.
pub type MedGraphResult<T> = std::result::Result<T, MedGraphError>;
