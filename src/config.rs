//! Application configuration, persisted as TOML.
//!
//! Every section and field has a default, so an empty file (or no file) is a
//! valid configuration that talks to local services.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::{GraphBackend, GraphStore, MemoryGraph, Neo4jConfig, Neo4jGraph};
use crate::index::builder::DEFAULT_BATCH_SIZE;
use crate::ingest::IngestConfig;
use crate::oracle::{OllamaConfig, ServiceConfig};
use crate::retrieve::RetrieveConfig;
use crate::retry::RetryPolicy;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Which graph backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local graph; contents are lost on exit.
    Memory,
    #[default]
    Neo4j,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub backend: BackendKind,
    pub neo4j: Neo4jConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSection {
    pub ollama: OllamaConfig,
    pub embedding: ServiceConfig,
    pub rerank: ServiceConfig,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            embedding: ServiceConfig::new("http://localhost:8080"),
            rerank: ServiceConfig::new("http://localhost:8081"),
        }
    }
}

/// Retry policy for graph store calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 2000,
        }
    }
}

impl StoreSection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::store()
            .with_attempts(self.attempts)
            .with_backoff(Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub batch_size: usize,
    /// Snapshot directory.
    pub dir: PathBuf,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dir: PathBuf::from("data/index"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub graph: GraphSection,
    pub oracle: OracleSection,
    pub ingest: IngestConfig,
    pub store: StoreSection,
    pub index: IndexSection,
    pub retrieve: RetrieveConfig,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    /// Load `path` if given, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// The configured graph backend wrapped in a retrying store.
    pub fn graph_store(&self) -> GraphStore {
        let backend: Arc<dyn GraphBackend> = match self.graph.backend {
            BackendKind::Memory => Arc::new(MemoryGraph::new()),
            BackendKind::Neo4j => Arc::new(Neo4jGraph::new(self.graph.neo4j.clone())),
        };
        GraphStore::new(backend, self.store.policy())
    }
}
