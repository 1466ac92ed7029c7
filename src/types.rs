//! Core data types shared across the snapback library
//!
//! - **Configuration**: [`StoreConfig`]
//! - **Requests**: [`CheckpointRequest`], [`RestoreOptions`], [`CancelFlag`]
//! - **Results**: [`RestorePreview`], [`RestoreResult`], [`CheckpointDiff`],
//!   [`ScanSummary`], [`StoreStats`]
//!
//! ## Examples
//!
//! ```rust
//! use snapback::types::{CheckpointRequest, RestoreOptions};
//!
//! let request = CheckpointRequest::new("Before refactor")
//!     .conversation("conv-42", 7);
//!
//! let options = RestoreOptions {
//!     create_backup_before_restore: false,
//!     ..Default::default()
//! };
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default name of the hidden storage directory inside the workspace
pub const DEFAULT_STORAGE_DIR: &str = ".snapback";

/// Default retention cap
pub const DEFAULT_MAX_CHECKPOINTS: usize = 50;

/// Configuration for a checkpoint store session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Hidden directory (relative to the workspace root) holding all state
    pub storage_dir_name: String,
    /// Number of checkpoints kept before the oldest are evicted
    pub max_checkpoints: usize,
    /// Upper bound on concurrent hashing workers
    pub parallel_workers: usize,
    /// Exclusion patterns added to the built-in list
    pub exclude_patterns: Vec<String>,
    /// Protected directories added to the built-in list
    pub protected_paths: Vec<String>,
    /// Media extensions added to the built-in catalogue
    pub media_extensions: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_dir_name: DEFAULT_STORAGE_DIR.to_string(),
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            parallel_workers: num_cpus::get(),
            exclude_patterns: Vec::new(),
            protected_paths: Vec::new(),
            media_extensions: Vec::new(),
        }
    }
}

/// Parameters for creating a checkpoint
#[derive(Debug, Clone, Default)]
pub struct CheckpointRequest {
    /// Human label (truncated on storage)
    pub message: String,
    /// Opaque conversation correlation id
    pub conversation_id: Option<String>,
    /// Opaque message position within the conversation
    pub message_index: Option<u64>,
    /// Mark the checkpoint as a pre-restore safety net
    pub is_restore_backup: bool,
    /// Checkpoint whose restore triggered this backup
    pub restored_from_checkpoint_id: Option<String>,
}

impl CheckpointRequest {
    /// Plain checkpoint with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach caller correlation ids
    pub fn conversation(mut self, conversation_id: impl Into<String>, message_index: u64) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self.message_index = Some(message_index);
        self
    }

    /// Mark as the safety net taken before restoring `restored_from`
    pub fn restore_backup(mut self, restored_from: impl Into<String>) -> Self {
        self.is_restore_backup = true;
        self.restored_from_checkpoint_id = Some(restored_from.into());
        self
    }
}

/// Shared cancellation flag checked between file operations
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// New, not-cancelled flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for restoring to a checkpoint
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Take an auto-backup checkpoint of the current state first
    pub create_backup_before_restore: bool,
    /// Keep files that are absent from the target instead of deleting them
    pub preserve_untracked: bool,
    /// Optional cancellation flag
    pub cancel: Option<CancelFlag>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            create_backup_before_restore: true,
            preserve_untracked: false,
            cancel: None,
        }
    }
}

/// What a restore would do, computed without touching the tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePreview {
    /// Resolved checkpoint id
    pub checkpoint_id: String,
    /// Checkpoint message
    pub message: String,
    /// Files that would be overwritten or recreated
    pub files_to_restore: Vec<String>,
    /// Files that would be deleted
    pub files_to_delete: Vec<String>,
    /// Present files kept because they are media
    pub media_preserved: Vec<String>,
    /// Present files kept because they are under a protected directory
    pub protected_preserved: Vec<String>,
    /// Number of files that would be restored
    pub restore_count: usize,
    /// Number of files that would be deleted
    pub delete_count: usize,
}

impl RestorePreview {
    /// Whether restoring would change nothing
    pub fn is_noop(&self) -> bool {
        self.restore_count == 0 && self.delete_count == 0
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    /// Whether the restore ran to completion (per-file errors allowed)
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Checkpoint that was restored
    pub checkpoint_id: String,
    /// Paths written from backup blobs
    pub restored_files: Vec<String>,
    /// Paths deleted from the workspace
    pub deleted_files: Vec<String>,
    /// Safety-net checkpoint taken before the restore, if any
    pub backup_checkpoint_id: Option<String>,
    /// Non-fatal conditions (skipped backup, unrestorable media)
    pub warnings: Vec<String>,
    /// Per-file failures
    pub errors: Vec<String>,
    /// Bytes written
    pub bytes_written: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// File-level differences between two states
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDiff {
    /// Source checkpoint id
    pub from_id: String,
    /// Target checkpoint id, `None` for the live working tree
    pub to_id: Option<String>,
    /// Paths present only in the target
    pub added: Vec<String>,
    /// Paths present in both with differing hash or size
    pub modified: Vec<String>,
    /// Paths present only in the source
    pub deleted: Vec<String>,
}

impl CheckpointDiff {
    /// Whether the two states are identical
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed paths
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

/// Statistics of one directory scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Files visited and hashed (or served from cache)
    pub files: usize,
    /// Files whose hash came from the cache
    pub cache_hits: usize,
    /// Files that had to be read and hashed
    pub cache_misses: usize,
    /// Media files recorded from metadata alone
    #[serde(default)]
    pub media_files: usize,
    /// Files skipped because stat or read failed
    pub errors: Vec<String>,
    /// Scan duration in milliseconds
    pub duration_ms: u64,
}

/// Read-only overview of a store session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Number of records in the index
    pub total_checkpoints: usize,
    /// Records that are restore backups
    pub restore_backups: usize,
    /// Code files in the newest record
    pub tracked_files: usize,
    /// Media references in the newest record
    pub media_files: usize,
    /// Bytes occupied by backup blobs
    pub backup_bytes: u64,
    /// Entries in the hash cache
    pub hash_cache_entries: usize,
    /// Oldest record timestamp
    pub oldest: Option<DateTime<Utc>>,
    /// Newest record timestamp
    pub newest: Option<DateTime<Utc>>,
    /// Outstanding undo slot
    pub last_restore_backup_id: Option<String>,
    /// Retention cap in effect
    pub max_checkpoints: usize,
    /// Summary of the most recent scan
    pub last_scan: ScanSummary,
}
