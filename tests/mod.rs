//! Main test module for snapback
//!
//! This module includes all test suites:
//! - Integration tests for multi-step workflows
//! - Property-based tests for restore fidelity
//! - Edge cases for unusual trees and inputs

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::snapback::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn open(root: &Path) -> CheckpointStore {
        let store = StoreBuilder::new().parallel_workers(2).build();
        store.initialize(root).unwrap();
        store
    }

    fn no_backup() -> RestoreOptions {
        RestoreOptions {
            create_backup_before_restore: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(temp_dir.path());

        let checkpoint = store.checkpoint("Empty").unwrap();
        assert!(checkpoint.files.is_empty());
        assert!(checkpoint.media_files.is_empty());
        assert_eq!(checkpoint.checkpoint_type, CheckpointType::Full);

        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();
        let result = store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();
        assert_eq!(result.deleted_files, vec!["file.txt"]);
        assert!(!temp_dir.path().join("file.txt").exists());
        assert!(temp_dir.path().join(".snapback/index.json").exists());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "ünïcödé.txt",
            "文件.txt",
            "no_extension",
        ];
        for name in &special_names {
            fs::write(root.join(name), format!("content of {}", name)).unwrap();
        }

        let store = open(root);
        let checkpoint = store.checkpoint("Special names").unwrap();
        assert_eq!(checkpoint.files.len(), special_names.len());

        for name in &special_names {
            fs::remove_file(root.join(name)).unwrap();
        }
        store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();

        for name in &special_names {
            let content = fs::read_to_string(root.join(name)).unwrap();
            assert_eq!(content, format!("content of {}", name));
        }
    }

    #[test]
    fn test_deep_nesting_and_empty_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let deep = root.join("a/b/c/d/e/f/g/h");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("leaf.rs"), "// leaf").unwrap();
        fs::write(root.join("empty.txt"), "").unwrap();

        let store = open(root);
        let checkpoint = store.checkpoint("Deep").unwrap();
        assert!(checkpoint.tracks("a/b/c/d/e/f/g/h/leaf.rs"));
        assert_eq!(checkpoint.find_file("empty.txt").unwrap().size, 0);

        fs::remove_dir_all(root.join("a")).unwrap();
        fs::remove_file(root.join("empty.txt")).unwrap();
        store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();

        assert_eq!(fs::read_to_string(deep.join("leaf.rs")).unwrap(), "// leaf");
        assert!(root.join("empty.txt").is_file());
    }

    #[test]
    fn test_excluded_trees_are_invisible() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        fs::write(root.join("node_modules/left-pad/index.js"), "module.exports = 1").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(root.join("debug.log"), "noise").unwrap();
        fs::write(root.join("main.js"), "require('left-pad')").unwrap();

        let store = open(root);
        let checkpoint = store.checkpoint("Excluded").unwrap();
        let paths: Vec<&str> = checkpoint
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["main.js"]);

        fs::write(root.join("node_modules/left-pad/new.js"), "added later").unwrap();
        store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();
        assert!(root.join("node_modules/left-pad/new.js").exists());
        assert!(root.join(".git/HEAD").exists());
        assert!(root.join("debug.log").exists());
    }

    #[test]
    fn test_custom_exclusions_and_media() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("notes.bak"), "backup").unwrap();
        fs::write(root.join("scene.blend"), "3d").unwrap();
        fs::write(root.join("main.py"), "print()").unwrap();

        let store = StoreBuilder::new()
            .exclude_patterns(vec!["*.bak".to_string()])
            .media_extensions(vec!["blend".to_string()])
            .build();
        store.initialize(root).unwrap();
        let checkpoint = store.checkpoint("Custom").unwrap();

        assert_eq!(checkpoint.files.len(), 1);
        assert_eq!(checkpoint.media_files.len(), 1);
        assert_eq!(checkpoint.media_files[0].extension, "blend");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(outside.path().join("secret.txt"), "outside").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("linked")).unwrap();
        fs::write(root.join("real.txt"), "inside").unwrap();

        let store = open(root);
        let checkpoint = store.checkpoint("Links").unwrap();
        assert_eq!(checkpoint.files.len(), 1);
        assert!(checkpoint.tracks("real.txt"));

        store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();
        assert!(outside.path().join("secret.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_refuses_symlinked_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("lib")).unwrap();
        fs::write(root.join("lib/x.rs"), "checkpointed").unwrap();

        let store = open(root);
        let checkpoint = store.checkpoint("Library").unwrap();

        fs::remove_dir_all(root.join("lib")).unwrap();
        fs::write(outside.path().join("x.rs"), "OUTSIDE USER DATA").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("lib")).unwrap();

        let result = store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();
        assert!(result.restored_files.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("lib/x.rs"));
        assert_eq!(
            fs::read_to_string(outside.path().join("x.rs")).unwrap(),
            "OUTSIDE USER DATA"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_replaces_symlinked_file_without_touching_target() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("config.txt"), "checkpointed").unwrap();

        let store = open(root);
        let checkpoint = store.checkpoint("Config").unwrap();

        let target = outside.path().join("config.txt");
        fs::write(&target, "OUTSIDE USER DATA").unwrap();
        fs::remove_file(root.join("config.txt")).unwrap();
        std::os::unix::fs::symlink(&target, root.join("config.txt")).unwrap();

        let result = store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.restored_files, vec!["config.txt"]);
        assert_eq!(fs::read_to_string(&target).unwrap(), "OUTSIDE USER DATA");

        let metadata = fs::symlink_metadata(root.join("config.txt")).unwrap();
        assert!(metadata.file_type().is_file());
        assert_eq!(fs::read_to_string(root.join("config.txt")).unwrap(), "checkpointed");
    }

    #[test]
    fn test_long_message_is_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(temp_dir.path());
        let checkpoint = store.checkpoint("x".repeat(250)).unwrap();
        assert_eq!(checkpoint.message.chars().count(), 100);
        assert!(checkpoint.message.ends_with("..."));

        let exact = store.checkpoint("y".repeat(100)).unwrap();
        assert_eq!(exact.message, "y".repeat(100));
    }

    #[test]
    fn test_retention_cap_of_one() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let store = StoreBuilder::new().max_checkpoints(0).build();
        store.initialize(root).unwrap();
        assert_eq!(store.config().max_checkpoints, 1);

        fs::write(root.join("a.txt"), "1").unwrap();
        store.checkpoint("one").unwrap();
        fs::write(root.join("a.txt"), "22").unwrap();
        let last = store.checkpoint("two").unwrap();

        let remaining = store.get_checkpoints().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, last.id);

        fs::write(root.join("a.txt"), "333").unwrap();
        store.restore_to_checkpoint(&last.id, no_backup()).unwrap();
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "22");
    }

    #[test]
    fn test_tampered_index_paths_are_refused() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "a").unwrap();
        let store = open(root);
        let checkpoint = store.checkpoint("Tamper").unwrap();
        store.close().unwrap();

        let index_path = root.join(".snapback/index.json");
        let raw = fs::read_to_string(&index_path).unwrap();
        fs::write(&index_path, raw.replace("\"a.txt\"", "\"../escape.txt\"")).unwrap();

        let store = open(root);
        let result = store.restore_to_checkpoint(&checkpoint.id, no_backup()).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(!temp_dir.path().parent().unwrap().join("escape.txt").exists());
    }
}
