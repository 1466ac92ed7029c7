//! Property-based testing for snapback
//!
//! Uses proptest to check restore fidelity, history independence and the
//! message/id helpers across randomly generated inputs.

use ::snapback::checkpoint::{generate_checkpoint_id, truncate_message, MAX_MESSAGE_LEN};
use ::snapback::*;
use filetime::FileTime;
use proptest::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A single edit to the working tree
#[derive(Debug, Clone)]
pub enum FileOperation {
    Create { path: String, content: Vec<u8> },
    Modify { path: String, content: Vec<u8> },
    Delete { path: String },
}

fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        (path_strategy(), content_strategy())
            .prop_map(|(path, content)| FileOperation::Create { path, content }),
        (path_strategy(), content_strategy())
            .prop_map(|(path, content)| FileOperation::Modify { path, content }),
        path_strategy().prop_map(|path| FileOperation::Delete { path }),
    ]
}

/// Paths whose directory and file names can never collide with each other
/// or with excluded, protected or media names
fn path_strategy() -> impl Strategy<Value = String> {
    let dirs = prop::collection::vec("d_[a-z]{1,4}", 0..=3);
    let file = prop_oneof!["f_[a-z0-9]{1,6}\\.txt", "f_[a-z]{1,6}\\.rs", "f_[a-z]{1,6}"];
    (dirs, file).prop_map(|(mut parts, file)| {
        parts.push(file);
        parts.join("/")
    })
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 \n]{0,300}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 1..2000),
        (any::<u8>(), 1..500usize).prop_map(|(byte, count)| vec![byte; count]),
    ]
}

/// Applies operations, stamping every write with a unique mtime
struct TreeWriter {
    clock: i64,
}

impl TreeWriter {
    fn new() -> Self {
        Self { clock: 1_500_000_000 }
    }

    fn write(&mut self, root: &Path, path: &str, content: &[u8]) -> anyhow::Result<()> {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, content)?;
        self.clock += 1;
        filetime::set_file_mtime(&full, FileTime::from_unix_time(self.clock, 0))?;
        Ok(())
    }

    fn apply(&mut self, root: &Path, op: &FileOperation) -> anyhow::Result<()> {
        match op {
            FileOperation::Create { path, content } => self.write(root, path, content)?,
            FileOperation::Modify { path, content } => {
                if root.join(path).is_file() {
                    self.write(root, path, content)?;
                }
            }
            FileOperation::Delete { path } => {
                let full = root.join(path);
                if full.is_file() {
                    fs::remove_file(full)?;
                }
            }
        }
        Ok(())
    }
}

/// Digest of every file's path and content outside the storage directory
fn compute_directory_hash(root: &Path) -> anyhow::Result<String> {
    let mut entries = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != DEFAULT_STORAGE_DIR);
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root)?.to_string_lossy().replace('\\', "/");
            entries.push((relative, entry.path().to_path_buf()));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, full) in entries {
        hasher.update(relative.as_bytes());
        hasher.update(b"\0");
        hasher.update(fs::read(&full)?);
        hasher.update(b"\0");
    }
    Ok(hex::encode(hasher.finalize()))
}

fn open_store(root: &Path) -> CheckpointStore {
    let store = StoreBuilder::new().parallel_workers(2).build();
    store.initialize(root).unwrap();
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Checkpoint then restore reproduces the tree exactly
    #[test]
    fn checkpoint_restore_identity(
        operations in prop::collection::vec(file_operation_strategy(), 1..40),
        later in prop::collection::vec(file_operation_strategy(), 1..20),
        take_backup in any::<bool>(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut writer = TreeWriter::new();
        let store = open_store(root);

        for op in &operations {
            writer.apply(root, op).unwrap();
        }
        let checkpoint = store.checkpoint("Property checkpoint").unwrap();
        let original_hash = compute_directory_hash(root).unwrap();

        for op in &later {
            writer.apply(root, op).unwrap();
        }
        writer.write(root, "f_extra.txt", b"always differs").unwrap();

        let options = RestoreOptions {
            create_backup_before_restore: take_backup,
            ..Default::default()
        };
        let result = store.restore_to_checkpoint(&checkpoint.id, options).unwrap();

        prop_assert!(result.errors.is_empty(), "{:?}", result.errors);
        prop_assert_eq!(compute_directory_hash(root).unwrap(), original_hash);
        prop_assert_eq!(result.backup_checkpoint_id.is_some(), take_backup);
    }

    /// Every checkpoint in a history restores to its own state, in any order
    #[test]
    fn checkpoint_independence(
        operation_sets in prop::collection::vec(
            prop::collection::vec(file_operation_strategy(), 1..12),
            2..6
        ),
        order in prop::collection::vec(any::<prop::sample::Index>(), 1..8),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut writer = TreeWriter::new();
        let store = open_store(root);

        let mut recorded = Vec::new();
        for ops in &operation_sets {
            for op in ops {
                writer.apply(root, op).unwrap();
            }
            let checkpoint = store.checkpoint("Step").unwrap();
            recorded.push((checkpoint.id, compute_directory_hash(root).unwrap()));
        }

        for pick in &order {
            let (id, expected) = &recorded[pick.index(recorded.len())];
            let result = store.restore_to_checkpoint(id, RestoreOptions::default()).unwrap();
            prop_assert!(result.errors.is_empty(), "{:?}", result.errors);
            prop_assert_eq!(&compute_directory_hash(root).unwrap(), expected);
        }
    }

    /// An unchanged tree never copies anything
    #[test]
    fn unchanged_tree_copies_nothing(
        operations in prop::collection::vec(file_operation_strategy(), 1..30),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut writer = TreeWriter::new();
        for op in &operations {
            writer.apply(root, op).unwrap();
        }
        let store = open_store(root);

        let first = store.checkpoint("first").unwrap();
        let second = store.checkpoint("second").unwrap();
        prop_assert_eq!(second.bytes_copied, 0);
        prop_assert!(second.changed_files.is_empty());
        prop_assert_eq!(first.files, second.files);
    }

    /// Stored messages never exceed the limit and short ones are kept as typed
    #[test]
    fn message_truncation_bounds(message in "\\PC{0,300}") {
        let stored = truncate_message(&message);
        let trimmed = message.trim();
        prop_assert!(stored.chars().count() <= MAX_MESSAGE_LEN);
        if trimmed.chars().count() <= MAX_MESSAGE_LEN {
            prop_assert_eq!(stored.as_str(), trimmed);
        } else {
            prop_assert!(stored.ends_with("..."));
            let kept: String = trimmed.chars().take(MAX_MESSAGE_LEN - 3).collect();
            prop_assert!(stored.starts_with(&kept));
        }
    }
}

#[cfg(test)]
mod edge_case_tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique_and_ordered_by_time() {
        let ids: Vec<String> = (0..500).map(|_| generate_checkpoint_id()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let millis: Vec<u64> = ids
            .iter()
            .map(|id| id.split('-').next().unwrap().parse().unwrap())
            .collect();
        assert!(millis.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_restore_into_emptied_workspace() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut writer = TreeWriter::new();
        writer.write(root, "d_a/d_b/f_one.txt", b"one").unwrap();
        writer.write(root, "f_two.rs", b"two").unwrap();
        let store = open_store(root);
        let checkpoint = store.checkpoint("full").unwrap();
        let expected = compute_directory_hash(root).unwrap();

        fs::remove_dir_all(root.join("d_a")).unwrap();
        fs::remove_file(root.join("f_two.rs")).unwrap();

        let preview = store.preview_restore(&checkpoint.id).unwrap();
        assert_eq!(preview.restore_count, 2);
        store.restore_to_checkpoint(&checkpoint.id, RestoreOptions::default()).unwrap();
        assert_eq!(compute_directory_hash(root).unwrap(), expected);
    }
}
