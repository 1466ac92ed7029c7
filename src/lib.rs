//! # Snapback - incremental workspace checkpoints
//!
//! A checkpoint engine for a single project directory: take cheap incremental
//! snapshots of the tree, preview what rolling back would change, restore to
//! any retained snapshot, and undo that restore.
//!
//! ## Overview
//!
//! - **Incremental copies, complete records**: a checkpoint only copies the
//!   code files that changed since its parent, but every record lists the
//!   full set of files needed to rebuild the tree, so any record restores on
//!   its own.
//! - **Hash cache**: file hashes are reused while a file's mtime and size are
//!   unchanged, so repeated scans of large trees read almost nothing.
//! - **Media by reference**: images, video, archives, fonts and other binary
//!   assets are recorded by name and size only. They are never copied and
//!   never deleted by a restore.
//! - **Protected directories**: anything under a conventional asset directory
//!   (`uploads/`, `public/images/`, `storage/app/public/`, ...) survives a
//!   restore even when the target checkpoint never saw it.
//! - **One-level undo**: a restore can first take an auto-backup checkpoint
//!   of the current state, and [`CheckpointStore::restore_from_backup`] goes
//!   back to it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapback::{CheckpointStore, RestoreOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CheckpointStore::builder().build();
//! store.initialize("./my_project")?;
//!
//! let checkpoint = store.checkpoint("Initial state")?;
//! println!("Created checkpoint: {}", checkpoint.id);
//!
//! // Make some changes to your files...
//!
//! let preview = store.preview_restore(&checkpoint.id)?;
//! println!("{} files would be restored", preview.restore_count);
//!
//! let result = store.restore_to_checkpoint(&checkpoint.id, RestoreOptions::default())?;
//! println!("Restored {} files", result.restored_files.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage
//!
//! Everything lives in a hidden directory inside the workspace (`.snapback`
//! by default): `index.json` with the checkpoint history, `hash-cache.json`,
//! `config.json`, and `backups/<checkpoint-id>/` holding content copies with
//! the workspace's directory structure mirrored.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, SnapbackError>`. Problems with a single
//! file never fail a whole operation; they are collected on the result
//! (`RestoreResult::errors`, `ScanSummary::errors`).
//!
//! ## Module Organization
//!
//! - [`store`]: the [`CheckpointStore`] operation contract and its builder
//! - [`checkpoint`]: checkpoint records and id/message helpers
//! - [`policy`]: exclusion, media and protected-path rules
//! - [`scanner`] and [`hash_cache`]: tree walking and change detection
//! - [`restore`]: restore planning and execution
//! - [`index`] and [`storage`]: persisted documents and backup blobs
//! - [`types`]: request, result and configuration types
//! - [`error`]: error types

pub mod checkpoint;
pub mod error;
pub mod hash_cache;
pub mod index;
pub mod policy;
pub mod restore;
pub mod scanner;
pub mod storage;
pub mod store;
pub mod types;
pub mod utils;

pub use checkpoint::{CheckpointRecord, CheckpointType, FileSnapshot, MediaReference};
pub use error::{Result, SnapbackError};
pub use policy::{ExclusionPolicy, MediaClassifier, ProtectedPaths};
pub use store::{CheckpointStore, StoreBuilder};
pub use types::*;
