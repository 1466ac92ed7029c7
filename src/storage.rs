//! On-disk layout and backup blob storage
//!
//! All persistent state lives under one hidden directory inside the
//! workspace:
//!
//! ```text
//! <workspace>/.snapback/
//! ├── index.json             # CheckpointIndex
//! ├── hash-cache.json        # HashCache
//! ├── config.json            # StoreConfig used by this workspace
//! └── backups/
//!     └── <checkpoint_id>/   # content copies taken by that checkpoint
//!         └── <relative/path/of/file>
//! ```
//!
//! A blob is addressed by its *backup key*: its path relative to the storage
//! root, always `/`-separated (`backups/<id>/src/main.rs`). Keys are what
//! [`FileSnapshot::backup_path`](crate::checkpoint::FileSnapshot) records, so
//! the whole storage directory can move with the workspace.

use crate::error::Result;
use crate::types::StoreConfig;
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Index document file name
pub const INDEX_FILE: &str = "index.json";
/// Hash cache file name
pub const HASH_CACHE_FILE: &str = "hash-cache.json";
/// Persisted configuration file name
pub const CONFIG_FILE: &str = "config.json";
/// Directory holding per-checkpoint blob directories
pub const BACKUPS_DIR: &str = "backups";

/// Paths of everything the store persists
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout for `storage_dir_name` inside `workspace`
    pub fn new(workspace: &Path, storage_dir_name: &str) -> Self {
        Self {
            root: workspace.join(storage_dir_name),
        }
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `index.json`
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// `hash-cache.json`
    pub fn hash_cache_path(&self) -> PathBuf {
        self.root.join(HASH_CACHE_FILE)
    }

    /// `config.json`
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// `backups/`
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Create the storage root and the backups directory
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }

    /// Configuration persisted by an earlier session, if any
    pub fn load_config(&self) -> Result<Option<StoreConfig>> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                warn!("Ignoring unreadable {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Persist the effective configuration
    pub fn save_config(&self, config: &StoreConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config)?;
        utils::atomic_write(&self.config_path(), &json)
    }
}

/// Per-checkpoint content copies of code files
#[derive(Debug, Clone)]
pub struct BackupStore {
    storage_root: PathBuf,
}

impl BackupStore {
    /// Blob store rooted at the layout's storage directory
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            storage_root: layout.root().to_path_buf(),
        }
    }

    /// Backup key of `relative_path` inside checkpoint `checkpoint_id`
    pub fn backup_key(checkpoint_id: &str, relative_path: &str) -> String {
        format!("{}/{}/{}", BACKUPS_DIR, checkpoint_id, relative_path)
    }

    /// Checkpoint id whose directory holds the blob behind `backup_key`
    pub fn owner_of_key(backup_key: &str) -> Option<&str> {
        backup_key
            .strip_prefix(BACKUPS_DIR)?
            .strip_prefix('/')?
            .split('/')
            .next()
            .filter(|id| !id.is_empty())
    }

    /// Directory owning all blobs copied by `checkpoint_id`
    pub fn checkpoint_dir(&self, checkpoint_id: &str) -> PathBuf {
        self.storage_root.join(BACKUPS_DIR).join(checkpoint_id)
    }

    /// Absolute path of the blob behind a backup key
    pub fn blob_path(&self, backup_key: &str) -> Result<PathBuf> {
        utils::resolve_relative(&self.storage_root, backup_key)
    }

    /// Copy a live file into the checkpoint's backup directory
    ///
    /// Returns the backup key and the number of bytes copied.
    pub fn copy_into_backup(
        &self,
        checkpoint_id: &str,
        relative_path: &str,
        source: &Path,
    ) -> Result<(String, u64)> {
        let key = Self::backup_key(checkpoint_id, relative_path);
        let destination = self.blob_path(&key)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(source, &destination)?;
        trace!("Backed up {} ({} bytes)", relative_path, bytes);
        Ok((key, bytes))
    }

    /// Move a blob into another checkpoint's directory, returning its new key
    ///
    /// Falls back to copy-and-delete when a rename is not possible.
    pub fn relocate_blob(
        &self,
        backup_key: &str,
        to_checkpoint_id: &str,
        relative_path: &str,
    ) -> Result<String> {
        let new_key = Self::backup_key(to_checkpoint_id, relative_path);
        let from = self.blob_path(backup_key)?;
        let to = self.blob_path(&new_key)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::rename(&from, &to).is_err() {
            fs::copy(&from, &to)?;
            fs::remove_file(&from)?;
        }
        debug!("Relocated blob {} -> {}", backup_key, new_key);
        Ok(new_key)
    }

    /// Delete a checkpoint's blob directory; a missing directory is fine
    pub fn remove_checkpoint_dir(&self, checkpoint_id: &str) -> Result<bool> {
        utils::remove_tree(&self.checkpoint_dir(checkpoint_id))
    }

    /// Delete every blob directory
    pub fn clear(&self) -> Result<()> {
        let backups = self.storage_root.join(BACKUPS_DIR);
        utils::remove_tree(&backups)?;
        fs::create_dir_all(&backups)?;
        Ok(())
    }

    /// Bytes occupied by all blobs
    pub fn backup_bytes(&self) -> u64 {
        utils::dir_size(&self.storage_root.join(BACKUPS_DIR))
    }
}
