//! On-disk index artifacts.
//!
//! A snapshot directory holds three files written together:
//!
//! - `vectors.bin` – bincode-encoded [`FlatIndex`] plus the build id
//! - `ids.json` – node identifiers, one per index row, plus the build id
//! - `manifest.json` – build id, row count, dimension, format version
//!
//! Saving writes a sibling temp directory and swaps it into place, so a
//! reader never sees vectors from one build next to identifiers from another.
//! Loading cross-checks all three files and refuses mismatched pairs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::graph::GraphNode;

use super::{FlatIndex, Hit, IndexResult};

const VECTORS_FILE: &str = "vectors.bin";
const IDS_FILE: &str = "ids.json";
const MANIFEST_FILE: &str = "manifest.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    build_id: u64,
    count: usize,
    dim: usize,
}

#[derive(Serialize, Deserialize)]
struct VectorFile {
    build_id: u64,
    dim: usize,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct IdFile {
    build_id: u64,
    ids: Vec<GraphNode>,
}

/// A vector index together with the node identifier of every row.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    index: FlatIndex,
    ids: Vec<GraphNode>,
    build_id: u64,
}

impl IndexSnapshot {
    /// Pair an index with its identifiers. Lengths must match.
    pub fn new(index: FlatIndex, ids: Vec<GraphNode>) -> IndexResult<Self> {
        if index.len() != ids.len() {
            return Err(IndexError::MismatchedArtifacts {
                path: "<memory>".into(),
                message: format!("{} vectors but {} identifiers", index.len(), ids.len()),
            });
        }
        Ok(Self {
            index,
            ids,
            build_id: rand::random(),
        })
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn ids(&self) -> &[GraphNode] {
        &self.ids
    }

    pub fn build_id(&self) -> u64 {
        self.build_id
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The identifier for an index row.
    pub fn id_at(&self, position: usize) -> Option<&GraphNode> {
        self.ids.get(position)
    }

    /// Search and resolve hits to node identifiers.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<(GraphNode, Hit)>> {
        Ok(self
            .index
            .search(query, k)?
            .into_iter()
            .filter_map(|hit| Some((self.ids.get(hit.position)?.clone(), hit)))
            .collect())
    }

    /// Persist to `dir`, replacing any snapshot already there.
    pub fn save(&self, dir: &Path) -> IndexResult<()> {
        let staging = sibling(dir, &format!("tmp-{:016x}", self.build_id));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;

        let vectors = VectorFile {
            build_id: self.build_id,
            dim: self.index.dim(),
            data: self.index.raw().to_vec(),
        };
        let bytes = bincode::serialize(&vectors).map_err(|e| IndexError::Serialization {
            message: e.to_string(),
        })?;
        write_file(&staging.join(VECTORS_FILE), &bytes)?;

        let ids = IdFile {
            build_id: self.build_id,
            ids: self.ids.clone(),
        };
        write_file(&staging.join(IDS_FILE), &to_json(&ids)?)?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            build_id: self.build_id,
            count: self.ids.len(),
            dim: self.index.dim(),
        };
        write_file(&staging.join(MANIFEST_FILE), &to_json(&manifest)?)?;

        swap_into_place(&staging, dir)?;

        tracing::info!(
            path = %dir.display(),
            build_id = %format!("{:016x}", self.build_id),
            count = self.ids.len(),
            dim = self.index.dim(),
            "index snapshot saved"
        );
        Ok(())
    }

    /// Load a snapshot, verifying that all artifacts come from one build.
    pub fn load(dir: &Path) -> IndexResult<Self> {
        let mismatch = |message: String| IndexError::MismatchedArtifacts {
            path: dir.display().to_string(),
            message,
        };

        let manifest: Manifest = from_json(&dir.join(MANIFEST_FILE))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(mismatch(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }

        let path = dir.join(VECTORS_FILE);
        let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
        let vectors: VectorFile =
            bincode::deserialize(&bytes).map_err(|e| IndexError::Serialization {
                message: format!("{}: {e}", path.display()),
            })?;
        let ids: IdFile = from_json(&dir.join(IDS_FILE))?;

        if vectors.build_id != manifest.build_id || ids.build_id != manifest.build_id {
            return Err(mismatch(format!(
                "build ids differ: manifest {:016x}, vectors {:016x}, ids {:016x}",
                manifest.build_id, vectors.build_id, ids.build_id
            )));
        }
        if vectors.dim != manifest.dim {
            return Err(mismatch(format!(
                "manifest dimension {} but vectors have {}",
                manifest.dim, vectors.dim
            )));
        }

        let index = FlatIndex::from_raw(vectors.dim, vectors.data)?;
        if index.len() != manifest.count || ids.ids.len() != manifest.count {
            return Err(mismatch(format!(
                "manifest lists {} rows, found {} vectors and {} identifiers",
                manifest.count,
                index.len(),
                ids.ids.len()
            )));
        }

        tracing::debug!(path = %dir.display(), count = manifest.count, "index snapshot loaded");
        Ok(Self {
            index,
            ids: ids.ids,
            build_id: manifest.build_id,
        })
    }
}

/// Move the old snapshot aside, move `staging` in, drop the old one. If the
/// new snapshot cannot be moved in, the old one is put back.
fn swap_into_place(staging: &Path, dir: &Path) -> IndexResult<()> {
    let retired = sibling(dir, "old");
    if retired.exists() {
        fs::remove_dir_all(&retired).map_err(|e| io_err(&retired, e))?;
    }
    let had_previous = dir.exists();
    if had_previous {
        fs::rename(dir, &retired).map_err(|e| io_err(dir, e))?;
    }
    if let Err(e) = fs::rename(staging, dir) {
        if had_previous {
            if let Err(restore) = fs::rename(&retired, dir) {
                tracing::error!(
                    path = %dir.display(),
                    error = %restore,
                    "could not restore previous index"
                );
            }
        }
        return Err(io_err(dir, e));
    }
    if had_previous {
        if let Err(e) = fs::remove_dir_all(&retired) {
            tracing::warn!(path = %retired.display(), error = %e, "could not remove retired index");
        }
    }
    Ok(())
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index".into());
    name.push(format!(".{suffix}"));
    dir.with_file_name(name)
}

fn io_err(path: &Path, source: std::io::Error) -> IndexError {
    IndexError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> IndexResult<()> {
    fs::write(path, bytes).map_err(|e| io_err(path, e))
}

fn to_json<T: Serialize>(value: &T) -> IndexResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| IndexError::Serialization {
        message: e.to_string(),
    })
}

fn from_json<T: serde::de::DeserializeOwned>(path: &Path) -> IndexResult<T> {
    let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| IndexError::Serialization {
        message: format!("{}: {e}", path.display()),
    })
}
