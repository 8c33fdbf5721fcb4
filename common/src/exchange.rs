//! Single-slot, overwrite-latest channel between the analyzer and its readers.
//!
//! The analyzer holds the only [`SnapshotPublisher`]; any number of
//! [`SnapshotReader`]s observe the last published [`Snapshot`]. Readers never
//! see a partially written value, and an empty slot means "no data yet".

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::snapshot::{Metrics, Snapshot, TrafficStatus};

pub trait SnapshotPublisher: Send + Sync {
    /// Replace the visible snapshot. Last write wins.
    fn publish(&self, snapshot: &Snapshot) -> Result<(), ExchangeError>;
}

pub trait SnapshotReader: Send + Sync {
    /// The most recently published snapshot, or `None` if nothing was published yet.
    fn latest(&self) -> Result<Option<Snapshot>, ExchangeError>;

    fn get_traffic_status(&self) -> Result<Option<TrafficStatus>, ExchangeError> {
        Ok(self.latest()?.map(|s| s.traffic_status()))
    }

    fn get_metrics(&self) -> Result<Option<Metrics>, ExchangeError> {
        Ok(self.latest()?.map(|s| s.metrics()))
    }
}

// ---------------------------------------------------------------------------
// File transport
// ---------------------------------------------------------------------------

/// Publishes snapshots as a JSON file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    path: PathBuf,
}

impl FilePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotPublisher for FilePublisher {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), ExchangeError> {
        write_json_atomic(&self.path, snapshot)?;
        debug!(
            path = %self.path.display(),
            total_vehicles = snapshot.total_vehicles,
            status = %snapshot.status,
            "published snapshot"
        );
        Ok(())
    }
}

/// Reads the JSON file written by [`FilePublisher`].
#[derive(Debug, Clone)]
pub struct FileReader {
    path: PathBuf,
}

impl FileReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotReader for FileReader {
    fn latest(&self) -> Result<Option<Snapshot>, ExchangeError> {
        read_json(&self.path)
    }
}

/// Serialize `value` and atomically replace `path` with it.
///
/// The bytes go to a sibling temporary file which is synced and then renamed
/// over `path`, so a concurrent reader sees either the old or the new content.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ExchangeError> {
    let bytes = serde_json::to_vec(value).map_err(ExchangeError::Serialize)?;
    let tmp = temp_path_for(path);

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };

    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        ExchangeError::Write(path.display().to_string(), e)
    })
}

/// Read and deserialize a JSON file. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ExchangeError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ExchangeError::Read(path.display().to_string(), e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ExchangeError::Corrupt(path.display().to_string(), e))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".into());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// In-process slot. Clones share the same slot, so one clone can publish
/// while others read.
#[derive(Debug, Clone, Default)]
pub struct MemoryExchange {
    slot: Arc<RwLock<Option<Snapshot>>>,
}

impl MemoryExchange {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotPublisher for MemoryExchange {
    fn publish(&self, snapshot: &Snapshot) -> Result<(), ExchangeError> {
        let mut slot = self.slot.write().map_err(|_| ExchangeError::Poisoned)?;
        *slot = Some(snapshot.clone());
        Ok(())
    }
}

impl SnapshotReader for MemoryExchange {
    fn latest(&self) -> Result<Option<Snapshot>, ExchangeError> {
        let slot = self.slot.read().map_err(|_| ExchangeError::Poisoned)?;
        Ok(slot.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("failed to read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("corrupt snapshot in {0}: {1}")]
    Corrupt(String, serde_json::Error),
    #[error("snapshot slot lock poisoned")]
    Poisoned,
}
