//! Utility functions for snapback
//!
//! Hashing helpers, relative-path keys, atomic writes and tolerant recursive
//! deletion shared by the scanner, the backup store and the restore planner.
//!
//! ## Relative path keys
//!
//! Every tracked file is identified by its path relative to the workspace
//! root, rendered with `/` separators regardless of platform. These keys are
//! what `index.json` and `hash-cache.json` store, so a workspace can be moved
//! or opened from another OS without invalidating history.
//!
//! ```rust,ignore
//! use crate::utils::{relative_key, resolve_relative};
//! use std::path::Path;
//!
//! let key = relative_key(Path::new("/ws/src/main.rs"), Path::new("/ws"))?;
//! assert_eq!(key, "src/main.rs");
//! let abs = resolve_relative(Path::new("/ws"), &key)?;
//! ```

use crate::error::{Result, SnapbackError};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::trace;

/// Number of hex characters kept from the content digest
///
/// This is a change-detection digest, not an integrity primitive; 64 bits
/// is plenty for a single workspace.
pub const DIGEST_HEX_LEN: usize = 16;

/// Hash a file's content, streaming it through SHA-256
///
/// Returns the first [`DIGEST_HEX_LEN`] hex characters of the digest.
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(truncate_digest(hex::encode(hasher.finalize())))
}

/// Hash in-memory data with the same digest as [`hash_file_content`]
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    truncate_digest(hex::encode(hasher.finalize()))
}

fn truncate_digest(mut digest: String) -> String {
    digest.truncate(DIGEST_HEX_LEN);
    digest
}

/// Modification time of a file in nanoseconds since the Unix epoch
///
/// Filesystems that cannot report an mtime yield 0, which simply forces a
/// cache miss on the next comparison that has a real value.
pub fn mtime_nanos(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

/// Build the `/`-separated relative key of `path` under `base`
///
/// Tries a lexical strip first so symlinked workspace roots keep their
/// spelling, and falls back to canonical paths.
pub fn relative_key(path: &Path, base: &Path) -> Result<String> {
    let relative = match path.strip_prefix(base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let path_canon = path.canonicalize()?;
            let base_canon = base.canonicalize()?;
            path_canon
                .strip_prefix(&base_canon)
                .map(|p| p.to_path_buf())
                .map_err(|_| {
                    SnapbackError::internal(format!(
                        "Path {:?} is not under {:?}",
                        path_canon, base_canon
                    ))
                })?
        }
    };

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// Join a relative key onto `base`, refusing keys that escape it
pub fn resolve_relative(base: &Path, key: &str) -> Result<PathBuf> {
    if key.is_empty() {
        return Err(SnapbackError::UnsafePath(key.to_string()));
    }
    let mut resolved = base.to_path_buf();
    for segment in key.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(SnapbackError::UnsafePath(key.to_string())),
            _ => {
                let component = Path::new(segment);
                if component.is_absolute() || component.components().count() != 1 {
                    return Err(SnapbackError::UnsafePath(key.to_string()));
                }
                resolved.push(segment);
            }
        }
    }
    Ok(resolved)
}

/// Atomic file write (temp file in the same directory, then rename)
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| SnapbackError::Io(e.error))?;
    Ok(())
}

/// Delete a directory subtree, treating an already-missing tree as success
///
/// Returns whether anything was removed.
pub fn remove_tree(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            trace!("Removed tree: {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Total size in bytes of all regular files below `path`
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Format bytes in human-readable form (1024-based units)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
