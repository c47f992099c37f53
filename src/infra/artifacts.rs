//! Persisted artifact index
//!
//! `<work>/packages/index.json` maps `name/arch` to the pkgrel, build-input
//! fingerprint and location of the last successful build. Read once when a
//! run is planned, updated after every successful job.
//!
//! Concurrent runs share the file: every update holds a `flock` on
//! `index.json.lock`, merges into the index as currently on disk and
//! replaces the file atomically.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::defaults::{ARTIFACT_INDEX_VERSION, INDEX_LOCK_POLL_MS};
use crate::core::rebuild::{ArtifactLookup, ArtifactRecord};
use crate::core::resolver::BuildTarget;
use crate::error::ArtifactStoreError;
use crate::infra::lockfile::LockFile;

/// On-disk index format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub version: u32,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRecord>,
}

impl Default for ArtifactIndex {
    fn default() -> Self {
        Self {
            version: ARTIFACT_INDEX_VERSION,
            artifacts: BTreeMap::new(),
        }
    }
}

/// Artifact index with per-record write locks
#[derive(Debug)]
pub struct ArtifactStore {
    path: PathBuf,
    index: AsyncMutex<ArtifactIndex>,
    record_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ArtifactStore {
    /// Open the index at `path`; a missing file is an empty index
    pub fn open(path: &Path) -> Result<Self, ArtifactStoreError> {
        let index = read_index(path)?;
        tracing::debug!("Loaded {} artifact record(s) from {}", index.artifacts.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            index: AsyncMutex::new(index),
            record_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the index file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current index
    pub async fn snapshot(&self) -> ArtifactIndex {
        self.index.lock().await.clone()
    }

    /// Records keyed by target, for planning
    pub async fn records(&self) -> HashMap<BuildTarget, ArtifactRecord> {
        let index = self.index.lock().await;
        index
            .artifacts
            .iter()
            .filter_map(|(key, record)| {
                let (name, arch) = key.rsplit_once('/')?;
                let arch = arch.parse().ok()?;
                Some((BuildTarget::new(name, arch), record.clone()))
            })
            .collect()
    }

    /// Store the record of a successful build and persist the index
    pub async fn record(&self, target: &BuildTarget, record: ArtifactRecord) -> Result<(), ArtifactStoreError> {
        let key = target.key();
        let record_lock = {
            let mut locks = self
                .record_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        let _record_guard = record_lock.lock().await;

        let mut index = self.index.lock().await;
        let lock_path = self.path.with_extension("json.lock");
        let poll = Duration::from_millis(INDEX_LOCK_POLL_MS);
        let _file_lock = LockFile::acquire(&lock_path, "forgeroot artifact index", poll)
            .await
            .map_err(|e| ArtifactStoreError::Write {
                path: lock_path.clone(),
                error: e.to_string(),
            })?;

        // Other processes may have recorded since this store was opened
        let mut updated = read_index(&self.path)?;
        updated.artifacts.insert(key, record);
        write_atomic(&self.path, &updated)?;
        *index = updated;
        tracing::debug!("Recorded artifact for {target}");
        Ok(())
    }
}

impl ArtifactLookup for ArtifactIndex {
    fn lookup(&self, target: &BuildTarget) -> Option<ArtifactRecord> {
        self.artifacts.get(&target.key()).cloned()
    }
}

fn read_index(path: &Path) -> Result<ArtifactIndex, ArtifactStoreError> {
    if !path.exists() {
        return Ok(ArtifactIndex::default());
    }
    let content = fs::read_to_string(path).map_err(|e| ArtifactStoreError::Read {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ArtifactStoreError::Parse {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

fn write_atomic(path: &Path, index: &ArtifactIndex) -> Result<(), ArtifactStoreError> {
    let write_error = |e: String| ArtifactStoreError::Write {
        path: path.to_path_buf(),
        error: e,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
    }
    let content = serde_json::to_string_pretty(index).map_err(|e| write_error(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| write_error(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| write_error(e.to_string()))
}
