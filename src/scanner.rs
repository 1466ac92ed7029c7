//! Directory scanning and content hashing
//!
//! The [`DirectoryScanner`] walks the workspace with the `ignore` crate's
//! `WalkBuilder`, consulting the [`ExclusionPolicy`] before every directory
//! is entered, so excluded subtrees (`node_modules`, `.git`, the storage
//! directory, ...) are never descended into.
//!
//! Every surviving regular file is then either served from the
//! [`HashCache`] (when its `(mtime, size)` still match) or read and hashed.
//! Hashing runs on a dedicated rayon pool bounded by the configured worker
//! count; each worker produces an independent outcome and the results are
//! merged back into the cache sequentially. Media files are only stat'ed;
//! their content is never read and never cached.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crate::scanner::DirectoryScanner;
//! use crate::hash_cache::HashCache;
//! use crate::policy::ExclusionPolicy;
//! use std::sync::Arc;
//!
//! let policy = Arc::new(ExclusionPolicy::with_defaults(&[], ".snapback")?);
//! let cache = HashCache::load(root.join(".snapback/hash-cache.json"));
//! let mut scanner = DirectoryScanner::new(root.clone(), policy, cache, 4)?;
//! let scan = scanner.scan()?;
//! println!("{} files, {} cache hits", scan.len(), scan.summary.cache_hits);
//! ```
//!
//! Symbolic links are not followed and are not tracked.

use crate::error::{Result, SnapbackError};
use crate::hash_cache::{HashCache, HashCacheEntry};
use crate::policy::{ExclusionPolicy, MediaClassifier};
use crate::types::{CancelFlag, ScanSummary};
use crate::utils;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Observed state of one live file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Truncated content digest, empty for media whose content is never read
    pub hash: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime: i64,
}

/// Current state of the workspace: relative path to observed file
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Every non-excluded regular file, keyed by relative path
    pub files: BTreeMap<String, ScannedFile>,
    /// Counters for this scan
    pub summary: ScanSummary,
}

impl ScanResult {
    /// Observed state of one path
    pub fn get(&self, relative_path: &str) -> Option<&ScannedFile> {
        self.files.get(relative_path)
    }

    /// Whether the path was seen
    pub fn contains(&self, relative_path: &str) -> bool {
        self.files.contains_key(relative_path)
    }

    /// Number of files seen
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files were seen
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

enum HashOutcome {
    Cached(String, ScannedFile),
    Hashed(String, ScannedFile),
    Media(String, ScannedFile),
    Failed(String, String),
    Skipped,
}

/// Walks a workspace and produces its path-to-hash map
pub struct DirectoryScanner {
    root: PathBuf,
    exclusions: Arc<ExclusionPolicy>,
    media: Option<MediaClassifier>,
    cache: HashCache,
    pool: rayon::ThreadPool,
    workers: usize,
}

impl std::fmt::Debug for DirectoryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryScanner")
            .field("root", &self.root)
            .field("cache_entries", &self.cache.len())
            .field("workers", &self.workers)
            .finish()
    }
}

impl DirectoryScanner {
    /// Create a scanner over `root` with at most `workers` hashing threads
    pub fn new(
        root: PathBuf,
        exclusions: Arc<ExclusionPolicy>,
        cache: HashCache,
        workers: usize,
    ) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("snapback-hash-{}", i))
            .build()?;

        Ok(Self {
            root,
            exclusions,
            media: None,
            cache,
            pool,
            workers,
        })
    }

    /// Record files `media` classifies by stat only, without reading them
    pub fn with_media(mut self, media: MediaClassifier) -> Self {
        self.media = Some(media);
        self
    }

    /// Workspace root being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hash cache owned by this scanner
    pub fn cache(&self) -> &HashCache {
        &self.cache
    }

    /// Persist the hash cache if it has unsaved changes
    pub fn flush_cache(&mut self) -> Result<()> {
        if self.cache.is_dirty() {
            self.cache.save()?;
        }
        Ok(())
    }

    /// Forget cached hashes of files this process just rewrote
    ///
    /// A rewrite can land in the same mtime tick with the same size as the
    /// cached version, so the next scan must read these paths again.
    pub fn invalidate<'p>(&mut self, paths: impl IntoIterator<Item = &'p String>) -> usize {
        paths
            .into_iter()
            .filter(|path| self.cache.remove(path))
            .count()
    }

    /// Walk the workspace and hash every non-excluded regular file
    ///
    /// Files that cannot be stat'ed or read are skipped and listed in
    /// [`ScanSummary::errors`]. The hash cache is pruned of paths that were
    /// not seen and persisted before returning.
    pub fn scan(&mut self) -> Result<ScanResult> {
        self.scan_with_cancel(None)
    }

    /// [`scan`](Self::scan) that stops hashing once `cancel` is set
    ///
    /// A cancelled scan keeps the hashes it already computed in the cache
    /// but neither prunes nor persists it, and returns
    /// [`SnapbackError::Cancelled`].
    #[instrument(skip(self, cancel), fields(root = %self.root.display()))]
    pub fn scan_with_cancel(&mut self, cancel: Option<&CancelFlag>) -> Result<ScanResult> {
        let start = Instant::now();
        if !self.root.is_dir() {
            return Err(SnapbackError::WorkspaceUnavailable(self.root.clone()));
        }

        let (candidates, mut errors) = self.collect_candidates();
        trace!("Walk produced {} candidate files", candidates.len());

        let cache = &self.cache;
        let media = self.media.as_ref();
        let is_cancelled = || cancel.map(|c| c.is_cancelled()).unwrap_or(false);
        let outcomes: Vec<HashOutcome> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|(relative_path, path)| {
                    if is_cancelled() {
                        return HashOutcome::Skipped;
                    }
                    let is_media = media.map(|m| m.is_media(relative_path)).unwrap_or(false);
                    hash_one(cache, relative_path, path, is_media)
                })
                .collect()
        });

        let mut summary = ScanSummary::default();
        let mut files = BTreeMap::new();
        for outcome in outcomes {
            match outcome {
                HashOutcome::Cached(relative_path, file) => {
                    summary.cache_hits += 1;
                    files.insert(relative_path, file);
                }
                HashOutcome::Hashed(relative_path, file) => {
                    summary.cache_misses += 1;
                    self.cache.insert(
                        relative_path.clone(),
                        HashCacheEntry {
                            hash: file.hash.clone(),
                            mtime: file.mtime,
                            size: file.size,
                        },
                    );
                    files.insert(relative_path, file);
                }
                HashOutcome::Media(relative_path, file) => {
                    summary.media_files += 1;
                    files.insert(relative_path, file);
                }
                HashOutcome::Failed(relative_path, reason) => {
                    debug!("Skipping {}: {}", relative_path, reason);
                    errors.push(format!("{}: {}", relative_path, reason));
                }
                HashOutcome::Skipped => {}
            }
        }

        if is_cancelled() {
            debug!(
                "Scan cancelled after hashing {} of {} files",
                summary.cache_misses,
                candidates.len()
            );
            return Err(SnapbackError::Cancelled);
        }

        let dropped = self
            .cache
            .retain_paths(|path| files.get(path).is_some_and(|f| !f.hash.is_empty()));
        if dropped > 0 {
            trace!("Dropped {} stale hash cache entries", dropped);
        }
        if self.cache.is_dirty() || !self.cache.path().exists() {
            if let Err(e) = self.cache.save() {
                warn!("Failed to persist hash cache: {}", e);
            }
        }

        summary.files = files.len();
        summary.errors = errors;
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scanned {} files in {}ms ({} cached, {} hashed, {} media, {} skipped)",
            summary.files,
            summary.duration_ms,
            summary.cache_hits,
            summary.cache_misses,
            summary.media_files,
            summary.errors.len()
        );

        Ok(ScanResult { files, summary })
    }

    /// Walk the tree, pruning excluded directories before descent
    fn collect_candidates(&self) -> (Vec<(String, PathBuf)>, Vec<String>) {
        let policy = Arc::clone(&self.exclusions);
        let filter_root = self.root.clone();

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                match utils::relative_key(entry.path(), &filter_root) {
                    Ok(relative_path) => !policy.should_exclude(&relative_path, is_dir),
                    Err(_) => false,
                }
            })
            .build();

        let mut candidates = Vec::new();
        let mut errors = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let err = SnapbackError::from(e);
                    warn!("{}", err);
                    errors.push(err.to_string());
                    continue;
                }
            };

            let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }

            match utils::relative_key(entry.path(), &self.root) {
                Ok(relative_path) if !relative_path.is_empty() => {
                    candidates.push((relative_path, entry.into_path()));
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("{}: {}", entry.path().display(), e)),
            }
        }

        (candidates, errors)
    }
}

fn hash_one(cache: &HashCache, relative_path: &str, path: &Path, is_media: bool) -> HashOutcome {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => return HashOutcome::Failed(relative_path.to_string(), e.to_string()),
    };
    let size = metadata.len();
    let mtime = utils::mtime_nanos(&metadata);

    if is_media {
        return HashOutcome::Media(
            relative_path.to_string(),
            ScannedFile {
                hash: String::new(),
                size,
                mtime,
            },
        );
    }

    if let Some(hash) = cache.lookup(relative_path, mtime, size) {
        return HashOutcome::Cached(
            relative_path.to_string(),
            ScannedFile {
                hash: hash.to_string(),
                size,
                mtime,
            },
        );
    }

    match utils::hash_file_content(path) {
        Ok(hash) => HashOutcome::Hashed(relative_path.to_string(), ScannedFile { hash, size, mtime }),
        Err(e) => HashOutcome::Failed(relative_path.to_string(), e.to_string()),
    }
}
