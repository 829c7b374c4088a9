//! Download state module
//!
//! Persists the set of open downloads so an interrupted peer can pick them
//! up again after a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Serialize, Deserialize};
use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, trace};

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One open download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// When the download was first started (Unix seconds)
    pub start_time: u64,
    /// Segment count of the file being downloaded
    pub total_segments: u32,
}

/// All open downloads of a peer, keyed by file name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    pub downloads: BTreeMap<String, DownloadRecord>,
}

impl DownloadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an open download; an existing entry keeps its start time
    pub fn open(&mut self, file_name: &str, total_segments: u32) -> DownloadRecord {
        let record = self
            .downloads
            .entry(file_name.to_string())
            .or_insert(DownloadRecord {
                start_time: unix_now(),
                total_segments,
            });
        record.total_segments = total_segments;
        *record
    }

    /// Drop a resolved download
    pub fn close(&mut self, file_name: &str) -> Option<DownloadRecord> {
        self.downloads.remove(file_name)
    }

    pub fn get(&self, file_name: &str) -> Option<&DownloadRecord> {
        self.downloads.get(file_name)
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Location of the persisted download state
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the state; an empty state removes the file
    pub async fn save(&self, state: &DownloadState) -> Result<()> {
        if state.is_empty() {
            return self.clear().await;
        }

        let data = state.serialize()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write download state to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to commit download state to {}", self.path.display()))?;

        trace!("Saved download state ({} open downloads)", state.len());
        Ok(())
    }

    /// Load the state, empty when no file exists
    pub async fn load(&self) -> Result<DownloadState> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(DownloadState::new());
        }
        let data = fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read download state from {}", self.path.display()))?;
        let state = DownloadState::deserialize(&data)
            .with_context(|| format!("Corrupt download state in {}", self.path.display()))?;
        debug!("Loaded download state with {} open downloads", state.len());
        Ok(state)
    }

    /// Delete the state file
    pub async fn clear(&self) -> Result<()> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            fs::remove_file(&self.path).await?;
            debug!("Removed download state file {}", self.path.display());
        }
        Ok(())
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }
}
