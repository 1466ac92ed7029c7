//! Checkpoint store: the public operation contract
//!
//! [`CheckpointStore`] owns one workspace session at a time. The session
//! holds the checkpoint index, the backup blob store, the scanner (and
//! through it the hash cache) and the path policies. Every operation takes
//! the session lock for its whole duration, so checkpoint creation, restores,
//! clears and scans never interleave.
//!
//! ## Lifecycle
//!
//! ```text
//! CheckpointStore::new / StoreBuilder::build   (not initialized)
//!         │
//!         ▼
//! initialize(workspace)  ── loads index, cache, config; seeds a scan
//!         │
//!         ▼
//! create / preview / restore / diff / status / clear ...
//!         │
//!         ▼
//! close()                ── flushes the hash cache, back to not initialized
//! ```
//!
//! Operations against a store without a session return
//! [`SnapbackError::NotInitialized`].
//!
//! ## Examples
//!
//! ```rust,no_run
//! use snapback::{CheckpointStore, RestoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CheckpointStore::builder().max_checkpoints(20).build();
//! store.initialize("./my_project")?;
//!
//! let first = store.checkpoint("Before refactor")?;
//! // ... edit files ...
//! let preview = store.preview_restore(first.short_id())?;
//! println!("{} to restore, {} to delete", preview.restore_count, preview.delete_count);
//!
//! let result = store.restore_to_checkpoint(&first.id, RestoreOptions::default())?;
//! if store.has_restore_backup() {
//!     store.restore_from_backup()?;
//! }
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{
    generate_checkpoint_id, truncate_message, CheckpointRecord, CheckpointType, FileSnapshot,
    MediaReference,
};
use crate::error::{Result, SnapbackError};
use crate::hash_cache::HashCache;
use crate::index::CheckpointIndex;
use crate::policy::{ExclusionPolicy, MediaClassifier, ProtectedPaths};
use crate::restore::{PlanExecutor, RestorePlanner};
use crate::scanner::{DirectoryScanner, ScanResult};
use crate::storage::{BackupStore, StorageLayout};
use crate::types::*;
use crate::utils;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Checkpoint engine for one workspace at a time
pub struct CheckpointStore {
    config: StoreConfig,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.session.lock();
        f.debug_struct("CheckpointStore")
            .field("config", &self.config)
            .field("workspace", &session.as_ref().map(|s| s.workspace.clone()))
            .field(
                "checkpoints",
                &session.as_ref().map(|s| s.index.len()).unwrap_or(0),
            )
            .finish()
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl CheckpointStore {
    /// Create an uninitialized store with `config`
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Fluent builder for a store
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Open a session on `workspace`
    ///
    /// Creates the storage layout if needed, loads (or creates) the index and
    /// the hash cache, and seeds the hash cache with one full scan. A
    /// `config.json` left by an earlier session takes precedence over the
    /// builder configuration; otherwise the builder configuration is written
    /// there. An already open session is closed first.
    ///
    /// # Errors
    ///
    /// - [`SnapbackError::WorkspaceUnavailable`] if `workspace` is not a directory
    /// - [`SnapbackError::Io`] if the storage directory cannot be created
    /// - [`SnapbackError::InvalidPattern`] if an exclusion pattern is malformed
    #[instrument(skip(self, workspace), fields(workspace = %workspace.as_ref().display()))]
    pub fn initialize(&self, workspace: impl AsRef<Path>) -> Result<()> {
        let workspace = workspace.as_ref();
        if !workspace.is_dir() {
            return Err(SnapbackError::WorkspaceUnavailable(workspace.to_path_buf()));
        }
        let root = workspace.canonicalize()?;

        let mut guard = self.session.lock();
        if let Some(mut previous) = guard.take() {
            debug!("Closing previous session on {:?}", previous.workspace);
            previous.scanner.flush_cache()?;
        }

        let session = Session::open(root, &self.config)?;
        info!(
            "Initialized checkpoint store at {:?} ({} checkpoints)",
            session.workspace,
            session.index.len()
        );
        *guard = Some(session);
        Ok(())
    }

    /// Whether a session is open
    pub fn is_initialized(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Root of the open session's workspace
    pub fn workspace_root(&self) -> Option<PathBuf> {
        self.session.lock().as_ref().map(|s| s.workspace.clone())
    }

    /// Effective configuration: the session's when open, otherwise the builder's
    pub fn config(&self) -> StoreConfig {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.config.clone())
            .unwrap_or_else(|| self.config.clone())
    }

    /// Persist the hash cache and end the session
    #[instrument(skip(self))]
    pub fn close(&self) -> Result<()> {
        if let Some(mut session) = self.session.lock().take() {
            session.scanner.flush_cache()?;
            info!("Closed checkpoint store for {:?}", session.workspace);
        }
        Ok(())
    }

    /// Create a checkpoint with just a message
    pub fn checkpoint(&self, message: impl Into<String>) -> Result<CheckpointRecord> {
        self.create_checkpoint(CheckpointRequest::new(message))
    }

    /// Snapshot the current workspace
    ///
    /// Scans the tree, copies every code file whose hash differs from the
    /// newest checkpoint into a fresh backup directory, records media by
    /// reference, appends the record and applies retention.
    ///
    /// # Errors
    ///
    /// - [`SnapbackError::NotInitialized`] without a session
    /// - [`SnapbackError::Io`] if copying a file fails for any reason other
    ///   than the file having vanished since the scan; the partial backup
    ///   directory is removed and no record is appended
    #[instrument(skip(self, request), fields(message = %request.message))]
    pub fn create_checkpoint(&self, request: CheckpointRequest) -> Result<CheckpointRecord> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(SnapbackError::NotInitialized)?;
        session.create_checkpoint(request, true)
    }

    /// Compute what restoring `id_or_prefix` would do, without doing it
    pub fn preview_restore(&self, id_or_prefix: &str) -> Result<RestorePreview> {
        self.preview_restore_with_cancel(id_or_prefix, None)
    }

    /// [`preview_restore`](Self::preview_restore) that can be abandoned
    ///
    /// The flag is checked between files while the tree is hashed.
    ///
    /// # Errors
    ///
    /// - [`SnapbackError::Cancelled`] once `cancel` is set
    #[instrument(skip(self, cancel))]
    pub fn preview_restore_with_cancel(
        &self,
        id_or_prefix: &str,
        cancel: Option<&CancelFlag>,
    ) -> Result<RestorePreview> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(SnapbackError::NotInitialized)?;
        let pos = session.resolve(id_or_prefix)?;
        let current = session.scan_with_cancel(cancel)?;
        let target = &session.index.checkpoints[pos];
        let plan = RestorePlanner::new(&session.media, &session.protected).plan(target, &current, false);
        Ok(plan.to_preview(target))
    }

    /// Restore the workspace to `id_or_prefix`
    ///
    /// With [`RestoreOptions::create_backup_before_restore`] an auto-backup
    /// checkpoint of the current state is taken first and becomes the undo
    /// slot; if it cannot be created the restore proceeds without it and
    /// says so in [`RestoreResult::warnings`]. Without a backup, every record
    /// newer than the target is dropped once the restore completes.
    ///
    /// Per-file failures are reported in [`RestoreResult::errors`] and do not
    /// stop the restore. A cancelled restore returns `success == false` and
    /// leaves the history untouched.
    #[instrument(skip(self, options))]
    pub fn restore_to_checkpoint(
        &self,
        id_or_prefix: &str,
        options: RestoreOptions,
    ) -> Result<RestoreResult> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(SnapbackError::NotInitialized)?;
        session.restore(id_or_prefix, &options)
    }

    /// All records, oldest first
    pub fn get_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(SnapbackError::NotInitialized)?;
        Ok(session.index.checkpoints.clone())
    }

    /// Record matching an id or unambiguous prefix
    pub fn get_checkpoint(&self, id_or_prefix: &str) -> Result<Option<CheckpointRecord>> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(SnapbackError::NotInitialized)?;
        Ok(session.index.resolve(id_or_prefix).cloned())
    }

    /// Read-only overview of the session
    pub fn get_stats(&self) -> Result<StoreStats> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(SnapbackError::NotInitialized)?;
        let index = &session.index;

        Ok(StoreStats {
            total_checkpoints: index.len(),
            restore_backups: index.checkpoints.iter().filter(|c| c.is_restore_backup).count(),
            tracked_files: index.last().map(|c| c.files.len()).unwrap_or(0),
            media_files: index.last().map(|c| c.media_files.len()).unwrap_or(0),
            backup_bytes: session.backups.backup_bytes(),
            hash_cache_entries: session.scanner.cache().len(),
            oldest: index.checkpoints.first().map(|c| c.timestamp),
            newest: index.last().map(|c| c.timestamp),
            last_restore_backup_id: index.last_restore_backup_id.clone(),
            max_checkpoints: session.config.max_checkpoints,
            last_scan: session.last_scan.clone(),
        })
    }

    /// The auto-backup an undo would restore, if any
    pub fn get_last_restore_backup(&self) -> Result<Option<CheckpointRecord>> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(SnapbackError::NotInitialized)?;
        Ok(session
            .index
            .last_restore_backup_id
            .as_deref()
            .and_then(|id| session.index.resolve(id))
            .cloned())
    }

    /// Whether an undo is available; `false` without a session
    pub fn has_restore_backup(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .and_then(|s| s.index.last_restore_backup_id.as_ref())
            .is_some()
    }

    /// Undo the last restore by restoring its auto-backup
    ///
    /// Does not take a further backup. Clears the undo slot afterwards.
    #[instrument(skip(self))]
    pub fn restore_from_backup(&self) -> Result<RestoreResult> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(SnapbackError::NotInitialized)?;
        let backup_id = session
            .index
            .last_restore_backup_id
            .clone()
            .ok_or(SnapbackError::NoRestoreBackup)?;

        let options = RestoreOptions {
            create_backup_before_restore: false,
            ..Default::default()
        };
        let result = session.restore(&backup_id, &options)?;
        if result.success {
            session.index.last_restore_backup_id = None;
            session.save_index()?;
        }
        Ok(result)
    }

    /// Delete every record and every backup blob
    ///
    /// Irreversible. Returns the number of records removed.
    #[instrument(skip(self))]
    pub fn clear_all_checkpoints(&self) -> Result<usize> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(SnapbackError::NotInitialized)?;
        let removed = session.index.len();
        session.backups.clear()?;
        session.index.clear();
        session.save_index()?;
        warn!("Cleared {} checkpoints and all backups", removed);
        Ok(removed)
    }

    /// Compare two checkpoints by path, hash and size
    pub fn diff(&self, from: &str, to: &str) -> Result<CheckpointDiff> {
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(SnapbackError::NotInitialized)?;
        let from = &session.index.checkpoints[session.resolve(from)?];
        let to = &session.index.checkpoints[session.resolve(to)?];

        let old = snapshot_states(&from.files);
        let new = snapshot_states(&to.files);
        let mut diff = compare_states(&old, &new);
        diff.from_id = from.id.clone();
        diff.to_id = Some(to.id.clone());
        Ok(diff)
    }

    /// Compare the newest checkpoint with the live working tree
    ///
    /// Only code files are compared; media never has content to differ.
    /// Without any checkpoint, every live code file is reported as added.
    #[instrument(skip(self))]
    pub fn status(&self) -> Result<CheckpointDiff> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(SnapbackError::NotInitialized)?;
        let current = session.scan()?;

        let live: BTreeMap<&str, (&str, u64)> = current
            .files
            .iter()
            .filter(|(path, _)| !session.media.is_media(path))
            .map(|(path, f)| (path.as_str(), (f.hash.as_str(), f.size)))
            .collect();
        let (from_id, recorded) = match session.index.last() {
            Some(last) => (last.id.clone(), snapshot_states(&last.files)),
            None => (String::new(), BTreeMap::new()),
        };

        let mut diff = compare_states(&recorded, &live);
        diff.from_id = from_id;
        diff.to_id = None;
        Ok(diff)
    }
}

/// Builder for [`CheckpointStore`]
///
/// ```rust
/// use snapback::StoreBuilder;
///
/// let store = StoreBuilder::new()
///     .max_checkpoints(10)
///     .parallel_workers(2)
///     .exclude_patterns(vec!["*.bak".to_string()])
///     .build();
/// assert!(!store.is_initialized());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StoreBuilder {
    config: StoreConfig,
}

impl StoreBuilder {
    /// Builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Retention cap; at least one checkpoint is always kept
    pub fn max_checkpoints(mut self, count: usize) -> Self {
        self.config.max_checkpoints = count.max(1);
        self
    }

    /// Hashing worker count (minimum 1)
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.config.parallel_workers = count.max(1);
        self
    }

    /// Extra exclusion patterns
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude_patterns = patterns;
        self
    }

    /// Extra protected directories
    pub fn protected_paths(mut self, paths: Vec<String>) -> Self {
        self.config.protected_paths = paths;
        self
    }

    /// Extra media extensions
    pub fn media_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.media_extensions = extensions;
        self
    }

    /// Name of the hidden storage directory
    pub fn storage_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.storage_dir_name = name.into();
        self
    }

    /// Build an uninitialized store
    pub fn build(self) -> CheckpointStore {
        CheckpointStore::new(self.config)
    }
}

/// State of one open workspace
struct Session {
    workspace: PathBuf,
    config: StoreConfig,
    backups: BackupStore,
    index_path: PathBuf,
    index: CheckpointIndex,
    scanner: DirectoryScanner,
    media: MediaClassifier,
    protected: ProtectedPaths,
    last_scan: ScanSummary,
}

impl Session {
    fn open(workspace: PathBuf, requested: &StoreConfig) -> Result<Self> {
        let layout = StorageLayout::new(&workspace, &requested.storage_dir_name);
        layout.ensure()?;

        let config = match layout.load_config()? {
            Some(persisted) => {
                debug!("Using persisted configuration from {:?}", layout.config_path());
                StoreConfig {
                    storage_dir_name: requested.storage_dir_name.clone(),
                    ..persisted
                }
            }
            None => {
                layout.save_config(requested)?;
                requested.clone()
            }
        };

        let exclusions = Arc::new(ExclusionPolicy::with_defaults(
            &config.exclude_patterns,
            &config.storage_dir_name,
        )?);
        let media = MediaClassifier::with_defaults(&config.media_extensions);
        let protected = ProtectedPaths::with_defaults(&config.protected_paths);

        let index_path = layout.index_path();
        let index = CheckpointIndex::load_or_create(&index_path, &workspace)?;
        let cache = HashCache::load(layout.hash_cache_path());
        let scanner = DirectoryScanner::new(
            workspace.clone(),
            exclusions,
            cache,
            config.parallel_workers,
        )?
        .with_media(media.clone());

        let mut session = Self {
            workspace,
            backups: BackupStore::new(&layout),
            config,
            index_path,
            index,
            scanner,
            media,
            protected,
            last_scan: ScanSummary::default(),
        };
        session.scan()?;
        Ok(session)
    }

    fn scan(&mut self) -> Result<ScanResult> {
        self.scan_with_cancel(None)
    }

    fn scan_with_cancel(&mut self, cancel: Option<&CancelFlag>) -> Result<ScanResult> {
        let scan = self.scanner.scan_with_cancel(cancel)?;
        self.last_scan = scan.summary.clone();
        Ok(scan)
    }

    fn save_index(&mut self) -> Result<()> {
        self.index.save(&self.index_path)
    }

    fn resolve(&self, id_or_prefix: &str) -> Result<usize> {
        self.index
            .position(id_or_prefix)
            .ok_or_else(|| SnapbackError::CheckpointNotFound(id_or_prefix.to_string()))
    }

    /// Snapshot the tree; retention is applied when `prune` is set
    fn create_checkpoint(&mut self, request: CheckpointRequest, prune: bool) -> Result<CheckpointRecord> {
        let start = Instant::now();
        let scan = self.scan()?;
        let id = generate_checkpoint_id();

        let parent = self.index.last();
        let parent_id = parent.map(|p| p.id.clone());
        let parent_files = parent.map(|p| p.file_map()).unwrap_or_default();

        let mut files = Vec::new();
        let mut media_files = Vec::new();
        let mut changed_files = Vec::new();
        let mut bytes_copied = 0u64;

        for (relative_path, live) in &scan.files {
            if self.media.is_media(relative_path) {
                media_files.push(MediaReference {
                    relative_path: relative_path.clone(),
                    size: live.size,
                    extension: MediaClassifier::extension_of(relative_path),
                });
                continue;
            }

            if let Some(previous) = parent_files.get(relative_path.as_str()) {
                if previous.hash == live.hash {
                    files.push((*previous).clone());
                    continue;
                }
            }

            let source = utils::resolve_relative(&self.workspace, relative_path)?;
            match self.backups.copy_into_backup(&id, relative_path, &source) {
                Ok((backup_path, bytes)) => {
                    bytes_copied += bytes;
                    changed_files.push(relative_path.clone());
                    files.push(FileSnapshot {
                        relative_path: relative_path.clone(),
                        hash: live.hash.clone(),
                        size: live.size,
                        backup_path,
                    });
                }
                Err(SnapbackError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{} vanished before it could be copied", relative_path);
                }
                Err(e) => {
                    warn!("Failed to back up {}: {}", relative_path, e);
                    if let Err(cleanup) = self.backups.remove_checkpoint_dir(&id) {
                        warn!("Failed to remove partial backup {}: {}", id, cleanup);
                    }
                    return Err(e);
                }
            }
        }

        let deleted_files: Vec<String> = parent
            .map(|p| {
                p.files
                    .iter()
                    .map(|f| &f.relative_path)
                    .chain(p.media_files.iter().map(|m| &m.relative_path))
                    .filter(|path| !scan.contains(path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let checkpoint_type = if request.is_restore_backup {
            CheckpointType::AutoBackup
        } else if parent_id.is_none() {
            CheckpointType::Full
        } else {
            CheckpointType::Incremental
        };

        let record = CheckpointRecord {
            id: id.clone(),
            timestamp: chrono::Utc::now(),
            message: truncate_message(&request.message),
            conversation_id: request.conversation_id,
            message_index: request.message_index,
            files,
            media_files,
            deleted_files,
            changed_files,
            bytes_copied,
            checkpoint_type,
            parent_checkpoint_id: parent_id,
            is_restore_backup: request.is_restore_backup,
            restored_from_checkpoint_id: request.restored_from_checkpoint_id,
        };

        self.index.push(record.clone());
        if record.is_restore_backup {
            self.index.last_restore_backup_id = Some(id.clone());
        }
        if prune {
            self.prune();
        }
        if let Err(e) = self.save_index() {
            self.index.checkpoints.retain(|c| c.id != id);
            if let Err(cleanup) = self.backups.remove_checkpoint_dir(&id) {
                warn!("Failed to remove backup {}: {}", id, cleanup);
            }
            return Err(e);
        }

        info!(
            "Created {} checkpoint {} in {}ms ({} files, {} copied, {} bytes, {} media, {} deleted)",
            record.checkpoint_type,
            record.short_id(),
            start.elapsed().as_millis(),
            record.files.len(),
            record.changed_files.len(),
            record.bytes_copied,
            record.media_files.len(),
            record.deleted_files.len()
        );
        Ok(record)
    }

    /// Evict records beyond the retention cap
    ///
    /// Blobs of evicted records that survivors still reference are moved
    /// into the earliest surviving record that references them before the
    /// evicted directories are deleted.
    fn prune(&mut self) -> Vec<String> {
        let cap = self.config.max_checkpoints.max(1);
        let evicted = self.index.evict_oldest(cap);
        if evicted.is_empty() {
            return Vec::new();
        }

        let evicted_ids: HashSet<&str> = evicted.iter().map(|r| r.id.as_str()).collect();
        let mut relocated: HashMap<String, String> = HashMap::new();

        for record in self.index.checkpoints.iter_mut() {
            for file in record.files.iter_mut() {
                let owned_by_evicted = BackupStore::owner_of_key(&file.backup_path)
                    .map(|owner| evicted_ids.contains(owner))
                    .unwrap_or(false);
                if !owned_by_evicted {
                    continue;
                }
                if let Some(new_key) = relocated.get(&file.backup_path) {
                    file.backup_path = new_key.clone();
                    continue;
                }
                match self
                    .backups
                    .relocate_blob(&file.backup_path, &record.id, &file.relative_path)
                {
                    Ok(new_key) => {
                        relocated.insert(file.backup_path.clone(), new_key.clone());
                        file.backup_path = new_key;
                    }
                    Err(e) => warn!(
                        "Could not keep blob {} for {}: {}",
                        file.backup_path, record.id, e
                    ),
                }
            }
        }

        for record in &evicted {
            if let Err(e) = self.backups.remove_checkpoint_dir(&record.id) {
                warn!("Failed to remove backups of evicted checkpoint {}: {}", record.id, e);
            }
        }

        info!(
            "Pruned {} checkpoints beyond the cap of {} ({} blobs relocated)",
            evicted.len(),
            cap,
            relocated.len()
        );
        evicted.into_iter().map(|r| r.id).collect()
    }

    fn restore(&mut self, id_or_prefix: &str, options: &RestoreOptions) -> Result<RestoreResult> {
        let start = Instant::now();
        let target_id = self.index.checkpoints[self.resolve(id_or_prefix)?].id.clone();
        info!("Restoring to checkpoint {}", target_id);

        let mut warnings = Vec::new();
        let mut backup_checkpoint_id = None;
        if options.create_backup_before_restore {
            let short: String = target_id.chars().take(18).collect();
            let request = CheckpointRequest::new(format!("Before restoring to {}", short))
                .restore_backup(target_id.clone());
            match self.create_checkpoint(request, false) {
                Ok(backup) => backup_checkpoint_id = Some(backup.id),
                Err(e) => {
                    warn!("Restore backup could not be created, continuing without it: {}", e);
                    warnings.push(format!(
                        "No restore backup was taken, this restore cannot be undone: {}",
                        e.user_message()
                    ));
                }
            }
        }

        let pos = self.resolve(&target_id)?;
        let current = self.scan()?;
        let target = &self.index.checkpoints[pos];
        let plan = RestorePlanner::new(&self.media, &self.protected).plan(
            target,
            &current,
            options.preserve_untracked,
        );
        for path in &plan.missing_media {
            warnings.push(format!("Media file {} is missing and cannot be restored", path));
        }

        let outcome = PlanExecutor::new(
            &self.workspace,
            &self.backups,
            &self.protected,
            &self.index.checkpoints,
        )
        .apply(pos, &plan, options.cancel.as_ref());
        self.scanner.invalidate(&outcome.restored);

        let mut result = RestoreResult {
            success: !outcome.cancelled,
            message: String::new(),
            checkpoint_id: target_id.clone(),
            restored_files: outcome.restored,
            deleted_files: outcome.deleted,
            backup_checkpoint_id,
            warnings,
            errors: outcome.errors,
            bytes_written: outcome.bytes_written,
            duration_ms: 0,
        };

        if outcome.cancelled {
            warn!("Restore to {} cancelled", target_id);
            result.message = format!(
                "Restore cancelled after {} restored and {} deleted files",
                result.restored_files.len(),
                result.deleted_files.len()
            );
        } else {
            if let Err(e) = self.scan() {
                warn!("Post-restore scan failed: {}", e);
                result.warnings.push(format!("Post-restore scan failed: {}", e));
            }

            if !options.create_backup_before_restore {
                let dropped = self.index.truncate_after(pos);
                for record in &dropped {
                    if let Err(e) = self.backups.remove_checkpoint_dir(&record.id) {
                        warn!("Failed to remove backups of {}: {}", record.id, e);
                    }
                }
                if !dropped.is_empty() {
                    debug!("Dropped {} checkpoints newer than {}", dropped.len(), target_id);
                }
            }

            result.message = format!(
                "Restored {} files and deleted {} files from checkpoint {}",
                result.restored_files.len(),
                result.deleted_files.len(),
                target_id
            );
            if !result.errors.is_empty() {
                result
                    .message
                    .push_str(&format!(" ({} files failed)", result.errors.len()));
            }
        }

        self.prune();
        self.save_index()?;
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!("{} in {}ms", result.message, result.duration_ms);
        Ok(result)
    }
}

type FileState<'a> = BTreeMap<&'a str, (&'a str, u64)>;

fn snapshot_states(files: &[FileSnapshot]) -> FileState<'_> {
    files
        .iter()
        .map(|f| (f.relative_path.as_str(), (f.hash.as_str(), f.size)))
        .collect()
}

fn compare_states(old: &FileState<'_>, new: &FileState<'_>) -> CheckpointDiff {
    let mut diff = CheckpointDiff::default();
    for (path, state) in new {
        match old.get(path) {
            None => diff.added.push(path.to_string()),
            Some(previous) if previous != state => diff.modified.push(path.to_string()),
            Some(_) => {}
        }
    }
    diff.deleted = old
        .keys()
        .filter(|path| !new.contains_key(*path))
        .map(|path| path.to_string())
        .collect();
    diff
}
