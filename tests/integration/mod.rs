//! Integration tests for snapback
//!
//! Drives realistic multi-step workflows: long histories with random
//! navigation, retention under churn, undo, and concurrent callers.

use ::snapback::*;
use filetime::FileTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Test harness for checkpoint scenarios
///
/// Every write gets its own synthetic mtime so change detection never
/// depends on how coarse the filesystem clock is.
pub struct SnapbackTestHarness {
    pub temp_dir: TempDir,
    pub store: CheckpointStore,
    pub file_generator: FileGenerator,
    clock: i64,
}

/// Shape of a generated project
pub struct ProjectConfig {
    pub max_depth: usize,
    pub dirs_per_level: usize,
    pub files_per_dir: usize,
    pub file_size_range: Range<usize>,
}

/// Random edits applied between checkpoints
pub struct MutationConfig {
    pub num_mutations: usize,
    pub file_size_range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Added(String),
    Modified(String),
    Deleted(String),
}

/// Deterministic content generator
pub struct FileGenerator {
    pub rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn generate_file_content(&mut self, size_range: Range<usize>) -> Vec<u8> {
        let len = self.rng.random_range(size_range);
        (0..len).map(|_| self.rng.random_range(b'a'..=b'z')).collect()
    }
}

impl SnapbackTestHarness {
    /// Harness with the given retention cap
    pub fn new(max_checkpoints: usize) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = StoreBuilder::new()
            .max_checkpoints(max_checkpoints)
            .parallel_workers(4)
            .build();
        store.initialize(temp_dir.path()).unwrap();

        Self {
            temp_dir,
            store,
            file_generator: FileGenerator::new(42),
            clock: 1_600_000_000,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file and give it a fresh, unique mtime
    pub fn write_file(&mut self, relative: &str, content: &[u8]) -> anyhow::Result<()> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        self.clock += 1;
        filetime::set_file_mtime(&path, FileTime::from_unix_time(self.clock, 0))?;
        Ok(())
    }

    /// Generate a nested project of text and source files
    pub fn generate_complex_project(&mut self, config: ProjectConfig) -> anyhow::Result<usize> {
        let mut created = 0;
        for depth in 1..=config.max_depth {
            for dir_idx in 0..config.dirs_per_level {
                let dir: Vec<String> = (0..depth).map(|level| format!("dir_{}_{}", level, dir_idx)).collect();
                let dir = dir.join("/");
                for file_idx in 0..config.files_per_dir {
                    let ext = if file_idx % 2 == 0 { "txt" } else { "rs" };
                    let content = self
                        .file_generator
                        .generate_file_content(config.file_size_range.clone());
                    self.write_file(&format!("{}/file_{}.{}", dir, file_idx, ext), &content)?;
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    /// Code files currently in the workspace, as relative keys
    pub fn list_files(&self) -> Vec<String> {
        snapshot_tree(self.root()).into_keys().collect()
    }

    /// Apply random modifications, deletions and additions
    pub fn mutate_files(&mut self, config: MutationConfig) -> anyhow::Result<Vec<FileChange>> {
        let mut all_files = self.list_files();
        let mut changes = Vec::new();

        for mutation_idx in 0..config.num_mutations {
            if all_files.is_empty() {
                break;
            }
            match self.file_generator.rng.random_range(0..3) {
                0 => {
                    let idx = self.file_generator.rng.random_range(0..all_files.len());
                    let path = all_files[idx].clone();
                    let content = self
                        .file_generator
                        .generate_file_content(config.file_size_range.clone());
                    self.write_file(&path, &content)?;
                    changes.push(FileChange::Modified(path));
                }
                1 => {
                    let idx = self.file_generator.rng.random_range(0..all_files.len());
                    let path = all_files.remove(idx);
                    fs::remove_file(self.root().join(&path))?;
                    changes.push(FileChange::Deleted(path));
                }
                _ => {
                    let path = format!("mutated_{}_{}.txt", self.clock, mutation_idx);
                    let content = self
                        .file_generator
                        .generate_file_content(config.file_size_range.clone());
                    self.write_file(&path, &content)?;
                    all_files.push(path.clone());
                    changes.push(FileChange::Added(path));
                }
            }
        }
        Ok(changes)
    }
}

/// Content of every file outside the storage directory, keyed by relative path
pub fn snapshot_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut tree = BTreeMap::new();
    let walker = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != DEFAULT_STORAGE_DIR);
    for entry in walker.filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            let relative: PathBuf = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            tree.insert(key, fs::read(entry.path()).unwrap());
        }
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_random_navigation_through_history() {
        let mut harness = SnapbackTestHarness::new(50);
        harness
            .generate_complex_project(ProjectConfig {
                max_depth: 2,
                dirs_per_level: 3,
                files_per_dir: 4,
                file_size_range: 10..400,
            })
            .unwrap();

        let mut states = Vec::new();
        for i in 0..8 {
            harness
                .mutate_files(MutationConfig {
                    num_mutations: 6,
                    file_size_range: 10..400,
                })
                .unwrap();
            let checkpoint = harness.store.checkpoint(format!("Checkpoint {}", i)).unwrap();
            states.push((checkpoint.id, snapshot_tree(harness.root())));
        }

        let mut rng = StdRng::seed_from_u64(123);
        for _ in 0..12 {
            let (id, expected) = &states[rng.random_range(0..states.len())];
            info!("Navigating to checkpoint {}", id);

            let before = harness.store.get_checkpoints().unwrap().len();
            let result = harness
                .store
                .restore_to_checkpoint(id, RestoreOptions::default())
                .unwrap();
            assert!(result.success);
            assert!(result.errors.is_empty(), "{:?}", result.errors);
            assert!(result.warnings.is_empty(), "{:?}", result.warnings);
            assert_eq!(&snapshot_tree(harness.root()), expected);
            assert_eq!(harness.store.get_checkpoints().unwrap().len(), before + 1);
            assert!(harness.store.preview_restore(id).unwrap().is_noop());
        }
    }

    #[test]
    #[traced_test]
    fn test_undo_returns_to_pre_restore_state() {
        let mut harness = SnapbackTestHarness::new(50);
        harness
            .generate_complex_project(ProjectConfig {
                max_depth: 2,
                dirs_per_level: 2,
                files_per_dir: 3,
                file_size_range: 10..200,
            })
            .unwrap();
        let base = harness.store.checkpoint("Base").unwrap();

        harness
            .mutate_files(MutationConfig {
                num_mutations: 10,
                file_size_range: 10..200,
            })
            .unwrap();
        let edited = snapshot_tree(harness.root());

        let restore = harness
            .store
            .restore_to_checkpoint(&base.id, RestoreOptions::default())
            .unwrap();
        assert!(restore.backup_checkpoint_id.is_some());
        assert_ne!(snapshot_tree(harness.root()), edited);

        let undo = harness.store.restore_from_backup().unwrap();
        assert!(undo.success);
        assert_eq!(snapshot_tree(harness.root()), edited);
        assert!(!harness.store.has_restore_backup());
    }

    #[test]
    fn test_prune_keeps_survivors_restorable() {
        let mut harness = SnapbackTestHarness::new(3);
        harness
            .generate_complex_project(ProjectConfig {
                max_depth: 2,
                dirs_per_level: 2,
                files_per_dir: 5,
                file_size_range: 10..200,
            })
            .unwrap();

        let mut states = BTreeMap::new();
        for i in 0..10 {
            harness
                .mutate_files(MutationConfig {
                    num_mutations: 3,
                    file_size_range: 10..200,
                })
                .unwrap();
            let checkpoint = harness.store.checkpoint(format!("Round {}", i)).unwrap();
            states.insert(checkpoint.id, snapshot_tree(harness.root()));
        }

        let survivors = harness.store.get_checkpoints().unwrap();
        assert_eq!(survivors.len(), 3);
        let surviving_ids: Vec<&str> = survivors.iter().map(|c| c.id.as_str()).collect();
        for record in &survivors {
            for file in &record.files {
                let owner = file.backup_path.split('/').nth(1).unwrap();
                assert!(surviving_ids.contains(&owner), "{} points at evicted {}", file.relative_path, owner);
                assert!(harness.root().join(DEFAULT_STORAGE_DIR).join(&file.backup_path).is_file());
            }
        }

        let no_backup = RestoreOptions {
            create_backup_before_restore: false,
            ..Default::default()
        };
        for record in survivors.iter().rev() {
            let result = harness.store.restore_to_checkpoint(&record.id, no_backup.clone()).unwrap();
            assert!(result.errors.is_empty(), "{:?}", result.errors);
            assert_eq!(&snapshot_tree(harness.root()), &states[&record.id]);
            assert_eq!(harness.store.get_checkpoints().unwrap().last().unwrap().id, record.id);
        }
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let harness = SnapbackTestHarness::new(50);
        let root = harness.root().to_path_buf();
        let store = Arc::new(harness.store);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                let root = root.clone();
                thread::spawn(move || {
                    fs::write(root.join(format!("worker_{}.txt", i)), format!("worker {}", i)).unwrap();
                    store.checkpoint(format!("Worker {}", i)).unwrap().id
                })
            })
            .collect();
        let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let history = store.get_checkpoints().unwrap();
        assert_eq!(history.len(), 4);
        for pair in history.windows(2) {
            assert_eq!(pair[1].parent_checkpoint_id.as_deref(), Some(pair[0].id.as_str()));
        }
        assert_eq!(history.last().unwrap().files.len(), 4);

        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_conversation_tags_and_stats() {
        let mut harness = SnapbackTestHarness::new(50);
        harness.write_file("src/lib.rs", b"pub fn answer() -> u32 { 42 }").unwrap();
        harness.write_file("assets/logo.png", b"\x89PNG").unwrap();

        for index in 0..3 {
            harness
                .write_file("src/lib.rs", format!("pub fn answer() -> u32 {{ {} }}", index).as_bytes())
                .unwrap();
            harness
                .store
                .create_checkpoint(CheckpointRequest::new(format!("Turn {}", index)).conversation("chat-7", index))
                .unwrap();
        }

        let history = harness.store.get_checkpoints().unwrap();
        let indexes: Vec<Option<u64>> = history.iter().map(|c| c.message_index).collect();
        assert_eq!(indexes, vec![Some(0), Some(1), Some(2)]);
        assert!(history.iter().all(|c| c.conversation_id.as_deref() == Some("chat-7")));

        let stats = harness.store.get_stats().unwrap();
        assert_eq!(stats.total_checkpoints, 3);
        assert_eq!(stats.tracked_files, 1);
        assert_eq!(stats.media_files, 1);
        assert!(stats.backup_bytes > 0);
        assert!(stats.oldest <= stats.newest);
    }
}
