//! Checkpoint records and their parts
//!
//! A [`CheckpointRecord`] is immutable once appended to the index. Its
//! `files` list is the *complete* reconstruction set of tracked code files at
//! the moment it was taken, not just the delta, so any record can be restored
//! directly without replaying its ancestors:
//!
//! ```text
//! files(N) = (files(N-1) - modified_or_deleted(N)) + changed(N)
//! ```
//!
//! Only the entries in `changed(N)` have a blob under this record's own backup
//! directory; the rest carry forward the `backup_path` of the record that
//! originally copied them.
//!
//! ## Examples
//!
//! ```rust
//! use snapback::checkpoint::{truncate_message, generate_checkpoint_id, MAX_MESSAGE_LEN};
//!
//! let id = generate_checkpoint_id();
//! assert!(id.contains('-'));
//!
//! let long = "x".repeat(250);
//! assert_eq!(truncate_message(&long).chars().count(), MAX_MESSAGE_LEN);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length of a checkpoint message, ellipsis included
pub const MAX_MESSAGE_LEN: usize = 100;

const ELLIPSIS: &str = "...";

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointType {
    /// First checkpoint of a history: every code file was copied
    Full,
    /// Only files changed since the parent were copied
    Incremental,
    /// Safety net taken automatically before a restore
    AutoBackup,
}

impl std::fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CheckpointType::Full => "full",
            CheckpointType::Incremental => "incremental",
            CheckpointType::AutoBackup => "auto-backup",
        };
        f.write_str(label)
    }
}

/// Stored copy of one code file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    /// Path relative to the workspace root (`/` separated)
    pub relative_path: String,
    /// Truncated content digest
    pub hash: String,
    /// Size in bytes
    pub size: u64,
    /// Blob location relative to the storage directory
    pub backup_path: String,
}

/// Reference to a media file; its content is never copied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReference {
    /// Path relative to the workspace root
    pub relative_path: String,
    /// Size in bytes at checkpoint time
    pub size: u64,
    /// Lower-cased extension without the dot
    pub extension: String,
}

/// One entry in the checkpoint history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    /// Time-ordered unique id (`<unix-millis>-<random>`)
    pub id: String,
    /// Creation instant
    pub timestamp: DateTime<Utc>,
    /// Human label, at most [`MAX_MESSAGE_LEN`] characters
    pub message: String,
    /// Opaque correlation id supplied by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Opaque position within the caller's conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_index: Option<u64>,
    /// Complete reconstruction set of code files
    pub files: Vec<FileSnapshot>,
    /// Media files present at checkpoint time
    #[serde(default)]
    pub media_files: Vec<MediaReference>,
    /// Paths tracked by the parent that no longer exist
    #[serde(default)]
    pub deleted_files: Vec<String>,
    /// Paths whose content was copied into this record's backup directory
    #[serde(default)]
    pub changed_files: Vec<String>,
    /// Bytes copied into this record's backup directory
    #[serde(default)]
    pub bytes_copied: u64,
    /// Kind of checkpoint
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    /// Immediately preceding record, `None` for the first
    #[serde(default)]
    pub parent_checkpoint_id: Option<String>,
    /// Created automatically as a safety net before a restore
    #[serde(default)]
    pub is_restore_backup: bool,
    /// Id of the checkpoint whose restore triggered this backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from_checkpoint_id: Option<String>,
}

impl CheckpointRecord {
    /// Leading characters of the id suitable for display
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(18)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Code files keyed by relative path
    pub fn file_map(&self) -> BTreeMap<&str, &FileSnapshot> {
        self.files
            .iter()
            .map(|f| (f.relative_path.as_str(), f))
            .collect()
    }

    /// Look up a code file by relative path
    pub fn find_file(&self, relative_path: &str) -> Option<&FileSnapshot> {
        self.files.iter().find(|f| f.relative_path == relative_path)
    }

    /// Whether the path was tracked as code or media
    pub fn tracks(&self, relative_path: &str) -> bool {
        self.files.iter().any(|f| f.relative_path == relative_path)
            || self.media_files.iter().any(|m| m.relative_path == relative_path)
    }

    /// Total size of the code files in the reconstruction set
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Generate a time-ordered, collision-resistant checkpoint id
pub fn generate_checkpoint_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", millis, &suffix[..8])
}

/// Clamp a message to [`MAX_MESSAGE_LEN`] characters with an ellipsis marker
pub fn truncate_message(message: &str) -> String {
    let message = message.trim();
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let keep = MAX_MESSAGE_LEN - ELLIPSIS.chars().count();
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}
