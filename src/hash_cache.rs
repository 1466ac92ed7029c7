//! Persistent hash cache for fast change detection
//!
//! Maps each relative path to the content hash it had the last time it was
//! read, together with the `(mtime, size)` observed at that moment. When the
//! live file still reports the same `(mtime, size)` the cached hash is reused
//! and the file is not read at all.
//!
//! This is a known approximation: two content-different writes that land in
//! the same mtime tick and leave the size unchanged are reported as unchanged.
//!
//! On disk the cache is `hash-cache.json`:
//!
//! ```text
//! { "version": 1, "lastUpdated": "...", "entries": [ ["src/main.rs", {"hash": "...", "mtime": 0, "size": 0}], ... ] }
//! ```

use crate::error::Result;
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Format version written to `hash-cache.json`
pub const HASH_CACHE_VERSION: u32 = 1;

/// Cached observation of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCacheEntry {
    /// Truncated content digest
    pub hash: String,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime: i64,
    /// Size in bytes
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HashCacheDocument {
    version: u32,
    last_updated: DateTime<Utc>,
    entries: Vec<(String, HashCacheEntry)>,
}

/// Path-keyed cache of content hashes, owned by the scanner
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    entries: HashMap<String, HashCacheEntry>,
    dirty: bool,
}

impl HashCache {
    /// Empty cache that will persist to `path`
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Load the cache from `path`
    ///
    /// A missing file yields an empty cache. An unreadable or unparsable file
    /// is logged and also yields an empty cache; the next scan simply rehashes
    /// everything.
    pub fn load(path: PathBuf) -> Self {
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No hash cache at {:?}, starting empty", path);
                return Self::new(path);
            }
            Err(e) => {
                warn!("Failed to read hash cache {:?}: {}", path, e);
                return Self::new(path);
            }
        };

        match serde_json::from_str::<HashCacheDocument>(&raw) {
            Ok(doc) => {
                if doc.version != HASH_CACHE_VERSION {
                    warn!(
                        "Hash cache version {} differs from {}, discarding",
                        doc.version, HASH_CACHE_VERSION
                    );
                    return Self::new(path);
                }
                debug!("Loaded {} hash cache entries", doc.entries.len());
                Self {
                    path,
                    entries: doc.entries.into_iter().collect(),
                    dirty: false,
                }
            }
            Err(e) => {
                warn!("Hash cache {:?} is corrupt ({}), starting empty", path, e);
                Self::new(path)
            }
        }
    }

    /// Cached hash for `relative_path` if its `(mtime, size)` still match
    pub fn lookup(&self, relative_path: &str, mtime: i64, size: u64) -> Option<&str> {
        self.entries
            .get(relative_path)
            .filter(|e| e.mtime == mtime && e.size == size)
            .map(|e| e.hash.as_str())
    }

    /// Raw entry for `relative_path`
    pub fn get(&self, relative_path: &str) -> Option<&HashCacheEntry> {
        self.entries.get(relative_path)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, relative_path: String, entry: HashCacheEntry) {
        trace!("Caching hash for {}", relative_path);
        if self.entries.get(&relative_path) != Some(&entry) {
            self.entries.insert(relative_path, entry);
            self.dirty = true;
        }
    }

    /// Drop the entry for `relative_path`
    pub fn remove(&mut self, relative_path: &str) -> bool {
        let removed = self.entries.remove(relative_path).is_some();
        self.dirty |= removed;
        removed
    }

    /// Drop entries whose path fails `keep`; returns how many were dropped
    pub fn retain_paths<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|path, _| keep(path));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            self.dirty = true;
        }
        dropped
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether there are unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// File the cache persists to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the cache, sorted by path for stable output
    pub fn save(&mut self) -> Result<()> {
        let mut entries: Vec<(String, HashCacheEntry)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let doc = HashCacheDocument {
            version: HASH_CACHE_VERSION,
            last_updated: Utc::now(),
            entries,
        };
        let json = serde_json::to_vec(&doc)?;
        utils::atomic_write(&self.path, &json)?;
        self.dirty = false;
        debug!("Saved {} hash cache entries to {:?}", self.entries.len(), self.path);
        Ok(())
    }
}
