//! Persistent checkpoint index
//!
//! `index.json` is the single durable record of a workspace's history: the
//! ordered list of [`CheckpointRecord`]s (oldest first), the workspace it
//! belongs to, and the one-slot undo pointer `lastRestoreBackupId`.
//!
//! The checkpoint store is the only writer. Every mutation goes through one
//! of the methods below and is followed by [`CheckpointIndex::save`], which
//! replaces the file atomically.
//!
//! An index that exists but cannot be parsed is not fatal: it is moved aside
//! to `index.json.corrupt`, an error is logged, and a fresh empty index takes
//! its place.

use crate::checkpoint::CheckpointRecord;
use crate::error::Result;
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Format version written to `index.json`
pub const INDEX_VERSION: u32 = 1;

/// Ordered checkpoint history of one workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointIndex {
    /// Document format version
    pub version: u32,
    /// Records, oldest first
    pub checkpoints: Vec<CheckpointRecord>,
    /// Time of the last successful save
    pub last_updated: DateTime<Utc>,
    /// Workspace root the history belongs to
    pub workspace_path: String,
    /// Most recent restore backup that can still be undone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restore_backup_id: Option<String>,
}

impl CheckpointIndex {
    /// Empty index for `workspace`
    pub fn new(workspace: &Path) -> Self {
        Self {
            version: INDEX_VERSION,
            checkpoints: Vec::new(),
            last_updated: Utc::now(),
            workspace_path: workspace.to_string_lossy().into_owned(),
            last_restore_backup_id: None,
        }
    }

    /// Load the index at `path`, or create an empty one
    ///
    /// A freshly created index is saved immediately.
    pub fn load_or_create(path: &Path, workspace: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Creating new checkpoint index at {:?}", path);
            let mut index = Self::new(workspace);
            index.save(path)?;
            return Ok(index);
        }

        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<CheckpointIndex>(&raw) {
            Ok(mut index) => {
                if index.version != INDEX_VERSION {
                    warn!(
                        "Index version {} differs from supported version {}",
                        index.version, INDEX_VERSION
                    );
                }
                let workspace = workspace.to_string_lossy();
                if index.workspace_path != workspace {
                    warn!(
                        "Index was written for {:?}, now opened at {:?}",
                        index.workspace_path, workspace
                    );
                    index.workspace_path = workspace.into_owned();
                }
                index.drop_dangling_backup_slot();
                debug!("Loaded index with {} checkpoints", index.checkpoints.len());
                Ok(index)
            }
            Err(e) => {
                let quarantine = corrupt_path(path);
                error!(
                    "Checkpoint index {:?} is corrupt ({}); checkpoint history is lost. \
                     The unreadable file was moved to {:?}",
                    path, e, quarantine
                );
                std::fs::rename(path, &quarantine)?;
                let mut index = Self::new(workspace);
                index.save(path)?;
                Ok(index)
            }
        }
    }

    /// Persist atomically, stamping `last_updated`
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.version = INDEX_VERSION;
        self.last_updated = Utc::now();
        let json = serde_json::to_vec_pretty(self)?;
        utils::atomic_write(path, &json)?;
        debug!("Saved index with {} checkpoints", self.checkpoints.len());
        Ok(())
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Whether there are no records
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Newest record
    pub fn last(&self) -> Option<&CheckpointRecord> {
        self.checkpoints.last()
    }

    /// Position of the record matching `id_or_prefix`
    ///
    /// An exact id wins; otherwise the first record (oldest first) whose id
    /// starts with the prefix.
    pub fn position(&self, id_or_prefix: &str) -> Option<usize> {
        let needle = id_or_prefix.trim();
        if needle.is_empty() {
            return None;
        }
        self.checkpoints
            .iter()
            .position(|c| c.id == needle)
            .or_else(|| self.checkpoints.iter().position(|c| c.id.starts_with(needle)))
    }

    /// Record matching `id_or_prefix`
    pub fn resolve(&self, id_or_prefix: &str) -> Option<&CheckpointRecord> {
        self.position(id_or_prefix).map(|pos| &self.checkpoints[pos])
    }

    /// Append a record
    pub fn push(&mut self, record: CheckpointRecord) {
        self.checkpoints.push(record);
    }

    /// Drop every record after `pos`, returning them oldest first
    pub fn truncate_after(&mut self, pos: usize) -> Vec<CheckpointRecord> {
        if pos + 1 >= self.checkpoints.len() {
            return Vec::new();
        }
        let dropped = self.checkpoints.split_off(pos + 1);
        self.drop_dangling_backup_slot();
        dropped
    }

    /// Evict the oldest records until at most `cap` remain
    pub fn evict_oldest(&mut self, cap: usize) -> Vec<CheckpointRecord> {
        if self.checkpoints.len() <= cap {
            return Vec::new();
        }
        let excess = self.checkpoints.len() - cap;
        let evicted: Vec<CheckpointRecord> = self.checkpoints.drain(..excess).collect();
        self.drop_dangling_backup_slot();
        evicted
    }

    /// Remove every record and the undo slot
    pub fn clear(&mut self) {
        self.checkpoints.clear();
        self.last_restore_backup_id = None;
    }

    fn drop_dangling_backup_slot(&mut self) {
        if let Some(ref id) = self.last_restore_backup_id {
            if !self.checkpoints.iter().any(|c| &c.id == id) {
                debug!("Clearing restore backup slot {}: record no longer exists", id);
                self.last_restore_backup_id = None;
            }
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}
