//! Path policies: exclusion, media classification and deletion protection
//!
//! Three independent, read-only rule sets decide how a relative path is
//! treated by the engine:
//!
//! - [`ExclusionPolicy`]: does the path participate in snapshotting at all?
//!   Checked before the scanner descends into a directory, so an excluded
//!   subtree is never walked.
//! - [`MediaClassifier`]: is a tracked file "media" (recorded by name, size
//!   and extension only, never copied, never deleted by a restore)?
//! - [`ProtectedPaths`]: is a file under a conventional asset directory and
//!   therefore exempt from restore-time deletion?
//!
//! All three operate on `/`-separated relative keys (see
//! [`crate::utils::relative_key`]).
//!
//! ## Matching
//!
//! Literal exclusion and protection entries are split into path segments and
//! match when that segment sequence appears anywhere in the path. `node_modules`
//! therefore matches `node_modules`, `node_modules/x/y.js` and
//! `packages/a/node_modules/z.js`, while `storage/app/public` only matches that
//! exact three-segment run. Exclusion entries containing glob metacharacters
//! (`*.log`) are compiled with `globset`. A trailing `/` marks a
//! directory-only entry.

use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;

/// Names, directories and suffix globs excluded from every scan
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    // Dependency trees
    "node_modules",
    "vendor",
    "bower_components",
    ".venv",
    "venv",
    // Build output
    "dist",
    "build",
    "out",
    "target",
    ".next",
    ".nuxt",
    ".output",
    ".turbo",
    ".vercel",
    // Caches
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".cache",
    ".parcel-cache",
    "coverage",
    ".nyc_output",
    "storage/framework",
    "storage/logs",
    "bootstrap/cache",
    // Editor and OS clutter
    ".idea",
    ".DS_Store",
    "Thumbs.db",
    // Volatile files
    "*.log",
    "*.tmp",
    "*.swp",
    "*.pyc",
    "*.class",
    "*.o",
];

/// Extensions whose files are tracked by reference only
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[
    // Images
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "ico", "tif", "tiff", "psd", "heic", "avif", "raw",
    // Video
    "mp4", "mov", "avi", "mkv", "webm", "wmv", "flv", "m4v", "mpg", "mpeg",
    // Audio
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "wma",
    // Archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "rar", "7z",
    // Fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // Binaries and documents
    "exe", "dll", "so", "dylib", "bin", "dmg", "iso", "pdf", "sqlite", "db",
];

/// Asset directories whose contents are never deleted by a restore
pub const DEFAULT_PROTECTED_PATHS: &[&str] = &[
    "uploads",
    "media",
    "images",
    "img",
    "assets/images",
    "public/uploads",
    "public/images",
    "storage/app/public",
    "storage/app",
    "static/media",
    "wp-content/uploads",
    "attachments",
    "user-content",
];

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}

/// Whether `needle` occurs as a contiguous run of whole segments in `haystack`
fn contains_segments(haystack: &[&str], needle: &[String]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack
            .windows(needle.len())
            .any(|window| window.iter().zip(needle).all(|(a, b)| *a == b.as_str()))
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

#[derive(Debug, Clone)]
struct SegmentRule {
    segments: Vec<String>,
    directory_only: bool,
}

/// Decides whether a path participates in snapshotting
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    rules: Vec<SegmentRule>,
    globs: GlobSet,
}

impl ExclusionPolicy {
    /// Build a policy from an explicit pattern list
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        let mut glob_builder = GlobSetBuilder::new();

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }

            if has_glob_meta(pattern) {
                glob_builder.add(Glob::new(pattern.trim_end_matches('/'))?);
            } else {
                let segments = split_segments(pattern);
                if !segments.is_empty() {
                    rules.push(SegmentRule {
                        segments,
                        directory_only: pattern.ends_with('/'),
                    });
                }
            }
        }

        Ok(Self {
            rules,
            globs: glob_builder.build()?,
        })
    }

    /// Default rule set plus `extra` patterns and the storage directory itself
    pub fn with_defaults(extra: &[String], storage_dir_name: &str) -> Result<Self> {
        let patterns = DEFAULT_EXCLUDES
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().cloned())
            .chain(std::iter::once(storage_dir_name.to_string()));
        Self::new(patterns)
    }

    /// Decide whether `relative_path` is excluded
    ///
    /// Directory-only entries match a file only through one of its parent
    /// directories.
    pub fn should_exclude(&self, relative_path: &str, is_directory: bool) -> bool {
        let segments: Vec<&str> = relative_path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        if segments.is_empty() {
            return false;
        }

        let dir_segments = if is_directory {
            &segments[..]
        } else {
            &segments[..segments.len() - 1]
        };

        let literal_hit = self.rules.iter().any(|rule| {
            let scope = if rule.directory_only { dir_segments } else { &segments[..] };
            contains_segments(scope, &rule.segments)
        });
        if literal_hit {
            return true;
        }

        let name = segments[segments.len() - 1];
        self.globs.is_match(name) || self.globs.is_match(segments.join("/"))
    }
}

/// Decides whether a tracked file is backed up by reference only
#[derive(Debug, Clone)]
pub struct MediaClassifier {
    extensions: HashSet<String>,
}

impl MediaClassifier {
    /// Build a classifier from an extension list (with or without leading dot)
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { extensions }
    }

    /// Default catalogue plus `extra` extensions
    pub fn with_defaults(extra: &[String]) -> Self {
        Self::new(
            DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .chain(extra.iter().cloned()),
        )
    }

    /// Lower-cased extension of a relative path, or empty
    pub fn extension_of(relative_path: &str) -> String {
        Path::new(relative_path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Whether the file is media by extension
    pub fn is_media(&self, relative_path: &str) -> bool {
        let ext = Self::extension_of(relative_path);
        !ext.is_empty() && self.extensions.contains(&ext)
    }
}

/// Decides whether a path may ever be deleted during restore
#[derive(Debug, Clone)]
pub struct ProtectedPaths {
    prefixes: Vec<Vec<String>>,
}

impl ProtectedPaths {
    /// Build from an explicit list of directory paths
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = paths
            .into_iter()
            .map(|p| split_segments(p.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        Self { prefixes }
    }

    /// Default asset directories plus `extra`
    pub fn with_defaults(extra: &[String]) -> Self {
        Self::new(
            DEFAULT_PROTECTED_PATHS
                .iter()
                .map(|p| p.to_string())
                .chain(extra.iter().cloned()),
        )
    }

    /// Whether the file at `relative_path` lives under a protected directory
    pub fn is_protected(&self, relative_path: &str) -> bool {
        let segments: Vec<&str> = relative_path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return false;
        }
        let dirs = &segments[..segments.len() - 1];
        self.prefixes.iter().any(|p| contains_segments(dirs, p))
    }

    /// Whether a directory is itself protected or lies under one
    pub fn is_protected_dir(&self, relative_dir: &str) -> bool {
        let segments: Vec<&str> = relative_dir.split('/').filter(|s| !s.is_empty()).collect();
        self.prefixes.iter().any(|p| contains_segments(&segments, p))
    }
}
