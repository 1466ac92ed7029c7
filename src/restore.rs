//! Restore planning and execution
//!
//! Restoring happens in two steps. [`RestorePlanner::plan`] compares a target
//! [`CheckpointRecord`] with a fresh [`ScanResult`] and decides, without
//! touching the tree, which files must be written back and which must go.
//! [`PlanExecutor::apply`] then carries that plan out file by file.
//!
//! Two vetoes apply to deletion and are absolute: a file that is media *now*
//! and a file under a protected directory are never deleted, whatever the
//! target checkpoint recorded.
//!
//! Per-file failures never abort the run; they are collected on the
//! [`ApplyOutcome`].

use crate::checkpoint::{CheckpointRecord, FileSnapshot};
use crate::error::{Result, SnapbackError};
use crate::policy::{MediaClassifier, ProtectedPaths};
use crate::scanner::ScanResult;
use crate::storage::BackupStore;
use crate::types::{CancelFlag, RestorePreview};
use crate::utils;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace, warn};

/// File-level actions a restore will take
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestorePlan {
    /// Target files whose live copy is missing or differs
    pub to_restore: Vec<String>,
    /// Live files absent from the target that may be deleted
    pub to_delete: Vec<String>,
    /// Live files absent from the target kept because they are media
    pub media_preserved: Vec<String>,
    /// Live files absent from the target kept because they are protected
    pub protected_preserved: Vec<String>,
    /// Media recorded by the target that no longer exists (never restorable)
    pub missing_media: Vec<String>,
}

impl RestorePlan {
    /// Whether applying the plan would change nothing
    pub fn is_noop(&self) -> bool {
        self.to_restore.is_empty() && self.to_delete.is_empty()
    }

    /// User-facing preview of this plan
    pub fn to_preview(&self, target: &CheckpointRecord) -> RestorePreview {
        RestorePreview {
            checkpoint_id: target.id.clone(),
            message: target.message.clone(),
            files_to_restore: self.to_restore.clone(),
            files_to_delete: self.to_delete.clone(),
            media_preserved: self.media_preserved.clone(),
            protected_preserved: self.protected_preserved.clone(),
            restore_count: self.to_restore.len(),
            delete_count: self.to_delete.len(),
        }
    }
}

/// Computes restore plans under the media and protected-path vetoes
#[derive(Debug, Clone, Copy)]
pub struct RestorePlanner<'a> {
    media: &'a MediaClassifier,
    protected: &'a ProtectedPaths,
}

impl<'a> RestorePlanner<'a> {
    /// Planner applying the given policies
    pub fn new(media: &'a MediaClassifier, protected: &'a ProtectedPaths) -> Self {
        Self { media, protected }
    }

    /// Plan a restore of `target` over the `current` tree
    ///
    /// With `preserve_untracked` nothing is scheduled for deletion.
    pub fn plan(
        &self,
        target: &CheckpointRecord,
        current: &ScanResult,
        preserve_untracked: bool,
    ) -> RestorePlan {
        let mut plan = RestorePlan::default();

        for snapshot in &target.files {
            let unchanged = current
                .get(&snapshot.relative_path)
                .map(|live| live.hash == snapshot.hash)
                .unwrap_or(false);
            if !unchanged {
                plan.to_restore.push(snapshot.relative_path.clone());
            }
        }

        let tracked: HashSet<&str> = target
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .chain(target.media_files.iter().map(|m| m.relative_path.as_str()))
            .collect();

        for relative_path in current.files.keys() {
            if tracked.contains(relative_path.as_str()) {
                continue;
            }
            if self.media.is_media(relative_path) {
                plan.media_preserved.push(relative_path.clone());
            } else if self.protected.is_protected(relative_path) {
                plan.protected_preserved.push(relative_path.clone());
            } else if !preserve_untracked {
                plan.to_delete.push(relative_path.clone());
            }
        }

        plan.missing_media = target
            .media_files
            .iter()
            .filter(|m| !current.contains(&m.relative_path))
            .map(|m| m.relative_path.clone())
            .collect();

        plan
    }
}

/// Result of applying a plan
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Paths written from backup blobs
    pub restored: Vec<String>,
    /// Paths removed from the workspace
    pub deleted: Vec<String>,
    /// Per-file failures
    pub errors: Vec<String>,
    /// Bytes written
    pub bytes_written: u64,
    /// Whether a cancellation request stopped the run early
    pub cancelled: bool,
}

/// Applies a [`RestorePlan`] to the workspace
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    workspace: &'a Path,
    backups: &'a BackupStore,
    protected: &'a ProtectedPaths,
    history: &'a [CheckpointRecord],
}

impl<'a> PlanExecutor<'a> {
    /// Executor over `history` (oldest first) for `workspace`
    pub fn new(
        workspace: &'a Path,
        backups: &'a BackupStore,
        protected: &'a ProtectedPaths,
        history: &'a [CheckpointRecord],
    ) -> Self {
        Self {
            workspace,
            backups,
            protected,
            history,
        }
    }

    /// Delete then restore, checking `cancel` between files
    pub fn apply(
        &self,
        target_pos: usize,
        plan: &RestorePlan,
        cancel: Option<&CancelFlag>,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let is_cancelled = || cancel.map(|c| c.is_cancelled()).unwrap_or(false);

        let Some(target) = self.history.get(target_pos) else {
            outcome
                .errors
                .push(format!("No checkpoint at position {}", target_pos));
            return outcome;
        };

        let mut touched_dirs = BTreeSet::new();
        for relative_path in &plan.to_delete {
            if is_cancelled() {
                outcome.cancelled = true;
                return outcome;
            }
            match self.delete_file(relative_path) {
                Ok(removed) => {
                    if removed {
                        trace!("Deleted {}", relative_path);
                    }
                    outcome.deleted.push(relative_path.clone());
                    if let Some((dir, _)) = relative_path.rsplit_once('/') {
                        touched_dirs.insert(dir.to_string());
                    }
                }
                Err(e) => {
                    log_file_failure("delete", relative_path, &e);
                    outcome
                        .errors
                        .push(format!("Failed to delete {}: {}", relative_path, e));
                }
            }
        }
        self.remove_emptied_dirs(touched_dirs);

        let snapshots = target.file_map();
        for relative_path in &plan.to_restore {
            if is_cancelled() {
                outcome.cancelled = true;
                return outcome;
            }
            let Some(snapshot) = snapshots.get(relative_path.as_str()) else {
                outcome
                    .errors
                    .push(format!("{} is not part of checkpoint {}", relative_path, target.id));
                continue;
            };
            match self.restore_file(target_pos, snapshot) {
                Ok(bytes) => {
                    outcome.bytes_written += bytes;
                    outcome.restored.push(relative_path.clone());
                }
                Err(e) => {
                    log_file_failure("restore", relative_path, &e);
                    outcome
                        .errors
                        .push(format!("Failed to restore {}: {}", relative_path, e));
                }
            }
        }

        outcome
    }

    /// Find a blob holding `snapshot`'s content
    ///
    /// Tries the recorded backup path, then the target's own directory, then
    /// older checkpoints newest-first, then newer checkpoints, accepting only
    /// entries with the same path and hash.
    pub fn locate_blob(&self, target_pos: usize, snapshot: &FileSnapshot) -> Result<PathBuf> {
        if let Some(path) = self.existing_blob(&snapshot.backup_path) {
            return Ok(path);
        }
        if let Some(target) = self.history.get(target_pos) {
            let own = BackupStore::backup_key(&target.id, &snapshot.relative_path);
            if let Some(path) = self.existing_blob(&own) {
                return Ok(path);
            }
        }

        let older = self.history[..target_pos.min(self.history.len())].iter().rev();
        let newer = self.history.iter().skip(target_pos + 1);
        for record in older.chain(newer) {
            let Some(candidate) = record.find_file(&snapshot.relative_path) else {
                continue;
            };
            if candidate.hash != snapshot.hash {
                continue;
            }
            if let Some(path) = self.existing_blob(&candidate.backup_path) {
                debug!(
                    "Recovered blob for {} from checkpoint {}",
                    snapshot.relative_path, record.id
                );
                return Ok(path);
            }
            let own = BackupStore::backup_key(&record.id, &snapshot.relative_path);
            if let Some(path) = self.existing_blob(&own) {
                debug!(
                    "Recovered blob for {} from checkpoint {}",
                    snapshot.relative_path, record.id
                );
                return Ok(path);
            }
        }

        Err(SnapbackError::BlobMissing {
            path: snapshot.relative_path.clone(),
            hash: snapshot.hash.clone(),
        })
    }

    fn existing_blob(&self, backup_key: &str) -> Option<PathBuf> {
        self.backups
            .blob_path(backup_key)
            .ok()
            .filter(|p| p.is_file())
    }

    fn restore_file(&self, target_pos: usize, snapshot: &FileSnapshot) -> Result<u64> {
        let destination = utils::resolve_relative(self.workspace, &snapshot.relative_path)?;
        let blob = self.locate_blob(target_pos, snapshot)?;

        if self.check_symlinks(&snapshot.relative_path)? {
            debug!("Replacing symlink at {}", snapshot.relative_path);
            fs::remove_file(&destination)?;
        }
        if destination.is_dir() {
            return Err(SnapbackError::internal(format!(
                "{} is a directory in the workspace",
                snapshot.relative_path
            )));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(&blob, &destination)?;
        trace!("Restored {} ({} bytes)", snapshot.relative_path, bytes);
        Ok(bytes)
    }

    fn delete_file(&self, relative_path: &str) -> Result<bool> {
        let path = utils::resolve_relative(self.workspace, relative_path)?;
        self.check_symlinks(relative_path)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Refuse a path that leads through a symlinked directory
    ///
    /// Returns whether the final component itself is a symlink. Links are
    /// never tracked, so only the link is replaced, never what it points to.
    fn check_symlinks(&self, relative_path: &str) -> Result<bool> {
        let mut current = self.workspace.to_path_buf();
        let mut components = relative_path.split('/').peekable();
        while let Some(component) = components.next() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    if components.peek().is_none() {
                        return Ok(true);
                    }
                    return Err(SnapbackError::UnsafePath(format!(
                        "{} (parent {:?} is a symlink)",
                        relative_path, current
                    )));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    /// Remove directories emptied by deletions, deepest first
    ///
    /// Never removes the workspace root or a protected directory.
    fn remove_emptied_dirs(&self, dirs: BTreeSet<String>) {
        let mut dirs: Vec<String> = dirs.into_iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));

        for dir in dirs {
            let mut current = Some(dir.as_str());
            while let Some(relative_dir) = current {
                if relative_dir.is_empty() || self.protected.is_protected_dir(relative_dir) {
                    break;
                }
                let Ok(path) = utils::resolve_relative(self.workspace, relative_dir) else {
                    break;
                };
                match utils::remove_dir_if_empty(&path) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        trace!("Could not remove directory {:?}: {}", path, e);
                        break;
                    }
                }
                current = relative_dir.rsplit_once('/').map(|(parent, _)| parent);
            }
        }
    }
}

/// Per-file failures never stop a batch; unexpected kinds are logged louder
fn log_file_failure(action: &str, relative_path: &str, err: &SnapbackError) {
    if err.is_recoverable() {
        warn!("Failed to {} {}: {}", action, relative_path, err);
    } else {
        error!("Failed to {} {}: {}", action, relative_path, err);
    }
}
