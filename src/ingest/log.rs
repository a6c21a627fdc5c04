//! Durable result log: a JSON array of knowledge records on disk.
//!
//! Every append rewrites the whole array through a temp file and an atomic
//! rename, under a process-local lock. A crash therefore leaves either the
//! previous array or the new one, never a torn file. Only one process may
//! own a log at a time.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::IngestError;
use crate::record::KnowledgeRecord;

use super::IngestResult;

/// Append-only result log with whole-file atomic rewrites.
#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResultLog {
    /// Open the log at `path`, creating it as `[]` if missing.
    pub fn open(path: impl Into<PathBuf>) -> IngestResult<Self> {
        let log = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };
        if !log.path.exists() {
            if let Some(parent) = log.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| log.io_err(e))?;
            }
            log.write_atomic(&[])?;
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry as raw JSON. Entries written by older tools may not match
    /// the canonical schema; run them through the normalizer before use.
    pub fn read_raw(&self) -> IngestResult<Vec<Value>> {
        let _guard = self.lock.lock().expect("result log lock poisoned");
        self.read_unlocked()
    }

    /// Append one record.
    pub fn append(&self, record: &KnowledgeRecord) -> IngestResult<()> {
        let entry = serde_json::to_value(record).map_err(|e| self.parse_err(e))?;
        let _guard = self.lock.lock().expect("result log lock poisoned");
        let mut entries = self.read_unlocked()?;
        entries.push(entry);
        self.write_atomic(&entries)
    }

    /// Replace the whole log with `records`.
    pub fn replace_all(&self, records: &[KnowledgeRecord]) -> IngestResult<()> {
        let entries = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.parse_err(e))?;
        let _guard = self.lock.lock().expect("result log lock poisoned");
        self.write_atomic(&entries)
    }

    pub fn len(&self) -> IngestResult<usize> {
        Ok(self.read_raw()?.len())
    }

    pub fn is_empty(&self) -> IngestResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read_unlocked(&self) -> IngestResult<Vec<Value>> {
        let text = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| self.parse_err(e))
    }

    fn write_atomic(&self, entries: &[Value]) -> IngestResult<()> {
        let tmp = self.tmp_path();
        let body = serde_json::to_string_pretty(entries).map_err(|e| self.parse_err(e))?;
        {
            let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
            file.write_all(body.as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "log.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> IngestError {
        IngestError::LogIo {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn parse_err(&self, e: serde_json::Error) -> IngestError {
        IngestError::LogParse {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }
}
