//! Error types for the snapback library
//!
//! Every store operation returns [`Result<T>`]. Failures that concern a single
//! file (stat, read, copy, unlink) are never surfaced through this type; they
//! are collected on the operation's result object instead so a batch can keep
//! going.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the snapback library
pub type Result<T> = std::result::Result<T, SnapbackError>;

/// Main error type for all snapback operations
#[derive(Debug, Error)]
pub enum SnapbackError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors raised while walking the workspace tree
    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),

    /// The store has no active workspace session
    #[error("Checkpoint store is not initialized")]
    NotInitialized,

    /// The workspace root is missing or is not a directory
    #[error("Workspace root unavailable: {0:?}")]
    WorkspaceUnavailable(PathBuf),

    /// Id or prefix did not resolve to any checkpoint
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// No restore backup is currently recorded
    #[error("No restore backup available")]
    NoRestoreBackup,

    /// A backup blob could not be found at its recorded path or in history
    #[error("Backup blob missing for {path} (hash {hash})")]
    BlobMissing {
        /// Relative path of the file
        path: String,
        /// Content hash that was being looked up
        hash: String,
    },

    /// A relative path read from the index escapes the workspace
    #[error("Unsafe relative path: {0}")]
    UnsafePath(String),

    /// Invalid exclusion pattern
    #[error("Invalid exclusion pattern: {0}")]
    InvalidPattern(String),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Operation stopped by a cancellation request
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for SnapbackError {
    fn from(err: globset::Error) -> Self {
        SnapbackError::InvalidPattern(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for SnapbackError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        SnapbackError::ThreadPool(err.to_string())
    }
}

impl SnapbackError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SnapbackError::Internal(msg.into())
    }

    /// Check if this error only affects a single file and the batch may continue
    pub fn is_recoverable(&self) -> bool {
        match self {
            SnapbackError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            SnapbackError::BlobMissing { .. } | SnapbackError::UnsafePath(_) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SnapbackError::CheckpointNotFound(id) => {
                format!("Checkpoint '{}' not found. Run 'snapback list' to see available checkpoints.", id)
            }
            SnapbackError::NotInitialized => {
                "No workspace session is active. Initialize the store with a workspace root first.".to_string()
            }
            SnapbackError::WorkspaceUnavailable(path) => {
                format!("Workspace {:?} does not exist or is not a directory.", path)
            }
            SnapbackError::NoRestoreBackup => {
                "There is no restore to undo. A backup is only recorded when a restore runs with backups enabled.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
