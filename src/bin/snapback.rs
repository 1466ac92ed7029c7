//! # Snapback CLI - checkpoints for a working directory
//!
//! Command-line front-end for the snapback checkpoint engine.
//!
//! ## Usage
//! ```bash
//! # Start tracking the current directory
//! snapback init
//!
//! # Take a checkpoint
//! snapback checkpoint -m "Before refactor"
//!
//! # See what a restore would do, then do it
//! snapback preview <checkpoint-id>
//! snapback restore <checkpoint-id>
//!
//! # Changed your mind? Go back to the state before the restore
//! snapback undo
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use snapback::utils::format_bytes;
use snapback::{
    CheckpointRecord, CheckpointRequest, CheckpointStore, CheckpointType, RestoreOptions,
    RestoreResult, Result, SnapbackError, StoreBuilder, DEFAULT_STORAGE_DIR,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Snapback CLI - incremental checkpoints and one-step undo for a directory
#[derive(Parser)]
#[command(name = "snapback")]
#[command(version)]
#[command(about = "Checkpoint and restore the state of a working directory")]
#[command(long_about = None)]
struct Cli {
    /// Path to the workspace (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Name of the storage directory inside the workspace
    #[arg(short, long, global = true, default_value = DEFAULT_STORAGE_DIR)]
    storage_dir: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a workspace
    Init {
        /// Number of checkpoints to keep
        #[arg(long)]
        max_checkpoints: Option<usize>,

        /// Extra exclusion patterns
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Extra protected directories
        #[arg(long)]
        protect: Vec<String>,

        /// Extra media extensions
        #[arg(long)]
        media: Vec<String>,
    },

    /// Create a checkpoint
    #[command(alias = "cp")]
    Checkpoint {
        /// Description message
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation the checkpoint belongs to
        #[arg(long)]
        conversation: Option<String>,

        /// Position of the message within the conversation
        #[arg(long, requires = "conversation")]
        message_index: Option<u64>,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// List checkpoints
    #[command(alias = "ls")]
    List {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,

        /// Limit results to the newest N
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one checkpoint
    Show {
        /// Checkpoint ID or prefix
        checkpoint: String,

        /// List every tracked file
        #[arg(long)]
        files: bool,
    },

    /// Show what restoring a checkpoint would change
    Preview {
        /// Checkpoint ID or prefix
        checkpoint: String,
    },

    /// Restore to a checkpoint
    #[command(alias = "rs")]
    Restore {
        /// Checkpoint ID or prefix
        checkpoint: String,

        /// Skip the safety-net checkpoint (drops newer checkpoints)
        #[arg(long)]
        no_backup: bool,

        /// Keep files that the checkpoint does not know about
        #[arg(long)]
        preserve_untracked: bool,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Undo the last restore
    Undo,

    /// Compare two checkpoints
    Diff {
        /// From checkpoint
        from: String,

        /// To checkpoint
        to: String,
    },

    /// Compare the newest checkpoint with the working tree
    Status,

    /// Show storage statistics
    Stats,

    /// Delete every checkpoint and backup
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("snapback=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let root_path = cli.path.unwrap_or_else(|| PathBuf::from("."));
    let storage_dir = cli.storage_dir;

    match cli.command {
        Commands::Init {
            max_checkpoints,
            exclude,
            protect,
            media,
        } => cmd_init(root_path, storage_dir, max_checkpoints, exclude, protect, media),
        Commands::Checkpoint {
            message,
            conversation,
            message_index,
            progress,
        } => {
            let store = open_store(root_path, storage_dir)?;
            cmd_checkpoint(&store, message, conversation, message_index, progress)
        }
        Commands::List { detailed, limit } => {
            cmd_list(&open_store(root_path, storage_dir)?, detailed, limit)
        }
        Commands::Show { checkpoint, files } => {
            cmd_show(&open_store(root_path, storage_dir)?, &checkpoint, files)
        }
        Commands::Preview { checkpoint } => {
            cmd_preview(&open_store(root_path, storage_dir)?, &checkpoint)
        }
        Commands::Restore {
            checkpoint,
            no_backup,
            preserve_untracked,
            progress,
        } => {
            let store = open_store(root_path, storage_dir)?;
            let options = RestoreOptions {
                create_backup_before_restore: !no_backup,
                preserve_untracked,
                ..Default::default()
            };
            cmd_restore(&store, &checkpoint, options, progress)
        }
        Commands::Undo => cmd_undo(&open_store(root_path, storage_dir)?),
        Commands::Diff { from, to } => cmd_diff(&open_store(root_path, storage_dir)?, &from, &to),
        Commands::Status => cmd_status(&open_store(root_path, storage_dir)?),
        Commands::Stats => cmd_stats(&open_store(root_path, storage_dir)?),
        Commands::Clear { yes } => cmd_clear(&open_store(root_path, storage_dir)?, yes),
    }
}

/// Start tracking a workspace
///
/// Writes the storage directory with its `config.json`, an empty index and
/// a seeded hash cache. Running it again on a tracked workspace is harmless;
/// the persisted configuration is kept.
fn cmd_init(
    root_path: PathBuf,
    storage_dir: String,
    max_checkpoints: Option<usize>,
    exclude: Vec<String>,
    protect: Vec<String>,
    media: Vec<String>,
) -> Result<()> {
    println!("{}", "Initializing snapback...".blue().bold());

    let mut builder = StoreBuilder::new()
        .storage_dir_name(storage_dir.clone())
        .exclude_patterns(exclude)
        .protected_paths(protect)
        .media_extensions(media);
    if let Some(max) = max_checkpoints {
        builder = builder.max_checkpoints(max);
    }
    let store = builder.build();
    store.initialize(&root_path)?;
    let stats = store.get_stats()?;
    let config = store.config();
    let root = store.workspace_root().unwrap_or(root_path);
    store.close()?;

    println!("{} Initialized snapback workspace", "✓".green().bold());
    println!("  Root: {}", root.display().to_string().cyan());
    println!("  Storage: {}", root.join(&storage_dir).display().to_string().cyan());
    println!("  Keeps: {} checkpoints", config.max_checkpoints.to_string().cyan());
    println!("  Files seen: {}", stats.last_scan.files.to_string().cyan());
    if stats.total_checkpoints > 0 {
        println!(
            "  Existing checkpoints: {}",
            stats.total_checkpoints.to_string().yellow()
        );
    }
    println!("\nNext steps:");
    println!(
        "  - Create your first checkpoint: {}",
        "snapback checkpoint -m \"Initial state\"".yellow()
    );
    println!("  - View checkpoints: {}", "snapback list".yellow());

    Ok(())
}

/// Create a new checkpoint
///
/// Only code files that changed since the newest checkpoint are copied;
/// media is recorded by name and size.
fn cmd_checkpoint(
    store: &CheckpointStore,
    message: Option<String>,
    conversation: Option<String>,
    message_index: Option<u64>,
    show_progress: bool,
) -> Result<()> {
    println!("{}", "Creating checkpoint...".blue().bold());

    let start = Instant::now();
    let progress = show_progress.then(|| spinner("Scanning files..."));

    let mut request = CheckpointRequest::new(message.unwrap_or_else(|| "Manual checkpoint".to_string()));
    if let Some(conversation) = conversation {
        request = request.conversation(conversation, message_index.unwrap_or(0));
    }
    let checkpoint = store.create_checkpoint(request)?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    println!(
        "{} Created checkpoint {}",
        "✓".green().bold(),
        checkpoint.short_id().yellow().bold()
    );
    println!("  Message: {}", checkpoint.message.cyan());
    println!("  Type: {}", checkpoint.checkpoint_type.to_string().cyan());
    println!("  Files: {}", checkpoint.files.len().to_string().cyan());
    println!("  Media: {}", checkpoint.media_files.len().to_string().cyan());
    println!("  Copied: {}", format_bytes(checkpoint.bytes_copied).cyan());
    println!("  Time: {}", format_duration(round_millis(start.elapsed())).to_string().cyan());

    if !checkpoint.changed_files.is_empty() {
        println!("  Changed: {} files", checkpoint.changed_files.len().to_string().yellow());
    }
    if !checkpoint.deleted_files.is_empty() {
        println!("  Deleted: {} files", checkpoint.deleted_files.len().to_string().yellow());
    }

    Ok(())
}

/// List checkpoints, oldest first
fn cmd_list(store: &CheckpointStore, detailed: bool, limit: Option<usize>) -> Result<()> {
    let checkpoints = store.get_checkpoints()?;
    if checkpoints.is_empty() {
        println!("{}", "No checkpoints found.".yellow());
        return Ok(());
    }

    let undo_slot = store.get_last_restore_backup()?.map(|c| c.id);
    let display_count = limit.unwrap_or(checkpoints.len()).min(checkpoints.len());
    let shown = &checkpoints[checkpoints.len() - display_count..];

    println!("{}", "Checkpoints:".blue().bold());
    for checkpoint in shown {
        let marker = if undo_slot.as_deref() == Some(checkpoint.id.as_str()) {
            "↺".green().bold()
        } else {
            " ".normal()
        };
        print!("{} {} ", marker, checkpoint.short_id().yellow().bold());
        print!(
            "{} ",
            checkpoint
                .timestamp
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
        print!("{}", checkpoint.message);
        if checkpoint.checkpoint_type == CheckpointType::AutoBackup {
            print!(" {}", "(auto-backup)".magenta());
        }
        println!();

        if detailed {
            println!(
                "    Files: {}, Media: {}, Copied: {}, Changed: {}",
                checkpoint.files.len().to_string().dimmed(),
                checkpoint.media_files.len().to_string().dimmed(),
                format_bytes(checkpoint.bytes_copied).dimmed(),
                checkpoint.changed_files.len().to_string().dimmed()
            );
            if let Some(parent) = &checkpoint.parent_checkpoint_id {
                println!("    Parent: {}", short(parent).dimmed());
            }
        }
    }

    if display_count < checkpoints.len() {
        println!(
            "\n{}",
            format!("Showing {} of {} checkpoints", display_count, checkpoints.len()).dimmed()
        );
    }

    Ok(())
}

/// Show details of one checkpoint
fn cmd_show(store: &CheckpointStore, id: &str, list_files: bool) -> Result<()> {
    let checkpoint = find_checkpoint(store, id)?;

    println!(
        "{} {}",
        "Checkpoint".blue().bold(),
        checkpoint.short_id().yellow().bold()
    );
    println!();
    println!("{}", "Basic Information:".bold());
    println!("  Full ID: {}", checkpoint.id.dimmed());
    println!("  Created: {}", checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Message: {}", checkpoint.message);
    println!("  Type: {}", checkpoint.checkpoint_type);
    if let Some(conversation) = &checkpoint.conversation_id {
        let index = checkpoint
            .message_index
            .map(|i| format!(" #{}", i))
            .unwrap_or_default();
        println!("  Conversation: {}{}", conversation, index);
    }

    println!("\n{}", "Relationships:".bold());
    match &checkpoint.parent_checkpoint_id {
        Some(parent) => println!("  Parent: {}", short(parent).yellow()),
        None => println!("  Parent: {}", "None (first checkpoint)".dimmed()),
    }
    if let Some(from) = &checkpoint.restored_from_checkpoint_id {
        println!("  Taken before restoring: {}", short(from).yellow());
    }

    println!("\n{}", "Statistics:".bold());
    println!("  Code files: {}", checkpoint.files.len());
    println!("  Media files: {}", checkpoint.media_files.len());
    println!("  Total size: {}", format_bytes(checkpoint.total_size()));
    println!("  Copied: {}", format_bytes(checkpoint.bytes_copied));
    println!("  Changed: {}", checkpoint.changed_files.len());
    println!("  Deleted since parent: {}", checkpoint.deleted_files.len());

    if list_files {
        println!("\n{}", "Files:".bold());
        for file in &checkpoint.files {
            println!(
                "  {} {} {}",
                &file.hash[..8.min(file.hash.len())].dimmed(),
                file.relative_path,
                format_bytes(file.size).dimmed()
            );
        }
        for media in &checkpoint.media_files {
            println!(
                "  {} {} {}",
                "media   ".magenta(),
                media.relative_path,
                format_bytes(media.size).dimmed()
            );
        }
    }

    Ok(())
}

/// Show what a restore would change
fn cmd_preview(store: &CheckpointStore, id: &str) -> Result<()> {
    let preview = store.preview_restore(id)?;

    println!(
        "{} {} {}",
        "Restoring to".blue().bold(),
        short(&preview.checkpoint_id).yellow(),
        format!("({})", preview.message).dimmed()
    );

    if preview.is_noop() {
        println!("{}", "Working tree already matches this checkpoint.".green());
    }
    if !preview.files_to_restore.is_empty() {
        println!("\n{}", "Would restore:".yellow().bold());
        for path in &preview.files_to_restore {
            println!("  ~ {}", path.yellow());
        }
    }
    if !preview.files_to_delete.is_empty() {
        println!("\n{}", "Would delete:".red().bold());
        for path in &preview.files_to_delete {
            println!("  - {}", path.red());
        }
    }
    if !preview.media_preserved.is_empty() || !preview.protected_preserved.is_empty() {
        println!("\n{}", "Kept:".green().bold());
        for path in &preview.media_preserved {
            println!("  = {} {}", path, "(media)".dimmed());
        }
        for path in &preview.protected_preserved {
            println!("  = {} {}", path, "(protected)".dimmed());
        }
    }

    println!(
        "\n{} to restore, {} to delete",
        preview.restore_count.to_string().yellow(),
        preview.delete_count.to_string().red()
    );
    Ok(())
}

/// Restore to a checkpoint
fn cmd_restore(
    store: &CheckpointStore,
    id: &str,
    options: RestoreOptions,
    show_progress: bool,
) -> Result<()> {
    let target = find_checkpoint(store, id)?;
    println!(
        "{} {}",
        "Restoring to checkpoint".blue().bold(),
        target.short_id().yellow()
    );

    let progress = show_progress.then(|| spinner("Restoring files..."));
    let result = store.restore_to_checkpoint(&target.id, options)?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    print_restore_result(&result, "Restoration complete");
    if let Some(backup) = &result.backup_checkpoint_id {
        println!(
            "  Undo with {} (backup {})",
            "snapback undo".yellow(),
            short(backup).dimmed()
        );
    }
    Ok(())
}

/// Undo the last restore
fn cmd_undo(store: &CheckpointStore) -> Result<()> {
    let backup = store
        .get_last_restore_backup()?
        .ok_or(SnapbackError::NoRestoreBackup)?;
    println!(
        "{} {}",
        "Undoing restore from backup".blue().bold(),
        backup.short_id().yellow()
    );

    let result = store.restore_from_backup()?;
    print_restore_result(&result, "Undo complete");
    Ok(())
}

/// Compare two checkpoints
fn cmd_diff(store: &CheckpointStore, from: &str, to: &str) -> Result<()> {
    let diff = store.diff(from, to)?;
    println!(
        "{} {} → {}",
        "Comparing".blue().bold(),
        short(&diff.from_id).yellow(),
        diff.to_id.as_deref().map(short).unwrap_or("working tree").yellow()
    );
    print_diff(&diff);
    Ok(())
}

/// Compare the newest checkpoint with the live tree
fn cmd_status(store: &CheckpointStore) -> Result<()> {
    let diff = store.status()?;
    println!("{}", "Snapback Status:".blue().bold());
    if diff.from_id.is_empty() {
        println!("{}", "No checkpoints yet; every file is new.".yellow());
    } else {
        println!("  Newest checkpoint: {}", short(&diff.from_id).yellow());
    }
    if diff.is_empty() {
        println!("{}", "Working tree matches the newest checkpoint.".green());
        return Ok(());
    }
    print_diff(&diff);
    Ok(())
}

/// Show storage statistics
fn cmd_stats(store: &CheckpointStore) -> Result<()> {
    let stats = store.get_stats()?;

    println!("{}", "Snapback Statistics:".blue().bold());
    println!(
        "  Checkpoints: {} of {} kept",
        stats.total_checkpoints.to_string().cyan(),
        stats.max_checkpoints
    );
    println!("  Restore backups: {}", stats.restore_backups);
    println!("  Tracked code files: {}", stats.tracked_files);
    println!("  Media files: {}", stats.media_files);
    println!("  Backup storage: {}", format_bytes(stats.backup_bytes).cyan());
    println!("  Hash cache entries: {}", stats.hash_cache_entries);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!(
            "  Span: {} → {}",
            oldest.format("%Y-%m-%d %H:%M"),
            newest.format("%Y-%m-%d %H:%M")
        );
    }
    match &stats.last_restore_backup_id {
        Some(id) => println!("  Undo available: {}", short(id).green()),
        None => println!("  Undo available: {}", "no".dimmed()),
    }

    println!("\n{}", "Last scan:".bold());
    println!(
        "  {} files, {} cache hits, {} hashed, {} media in {}",
        stats.last_scan.files,
        stats.last_scan.cache_hits.to_string().green(),
        stats.last_scan.cache_misses.to_string().yellow(),
        stats.last_scan.media_files,
        format_duration(Duration::from_millis(stats.last_scan.duration_ms))
    );
    for error in &stats.last_scan.errors {
        println!("  {} {}", "⚠".yellow().bold(), error);
    }
    Ok(())
}

/// Delete every checkpoint
fn cmd_clear(store: &CheckpointStore, confirmed: bool) -> Result<()> {
    if !confirmed {
        return Err(SnapbackError::internal(
            "Refusing to delete all checkpoints without --yes",
        ));
    }
    let removed = store.clear_all_checkpoints()?;
    println!(
        "{} Deleted {} checkpoints and all backups",
        "✓".green().bold(),
        removed.to_string().yellow()
    );
    Ok(())
}

// Helper functions

/// Open an already initialized workspace
fn open_store(root_path: PathBuf, storage_dir: String) -> Result<CheckpointStore> {
    if !root_path.join(&storage_dir).is_dir() {
        return Err(SnapbackError::NotInitialized);
    }
    let store = StoreBuilder::new().storage_dir_name(storage_dir).build();
    store.initialize(root_path)?;
    Ok(store)
}

fn find_checkpoint(store: &CheckpointStore, id: &str) -> Result<CheckpointRecord> {
    store
        .get_checkpoint(id)?
        .ok_or_else(|| SnapbackError::CheckpointNotFound(id.to_string()))
}

fn print_restore_result(result: &RestoreResult, done: &str) {
    if result.success {
        println!("{} {}", "✓".green().bold(), done);
    } else {
        println!("{} {}", "✗".red().bold(), result.message);
    }
    println!("  Files restored: {}", result.restored_files.len().to_string().green());
    println!("  Files deleted: {}", result.deleted_files.len().to_string().yellow());
    println!("  Written: {}", format_bytes(result.bytes_written).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );

    if !result.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &result.warnings {
            println!("  - {}", warning.yellow());
        }
    }
    if !result.errors.is_empty() {
        println!("\n{}", "Errors:".red().bold());
        for error in &result.errors {
            println!("  - {}", error.red());
        }
    }
}

fn print_diff(diff: &snapback::CheckpointDiff) {
    if !diff.added.is_empty() {
        println!("\n{}", "Added files:".green().bold());
        for path in &diff.added {
            println!("  + {}", path.green());
        }
    }
    if !diff.modified.is_empty() {
        println!("\n{}", "Modified files:".yellow().bold());
        for path in &diff.modified {
            println!("  ~ {}", path.yellow());
        }
    }
    if !diff.deleted.is_empty() {
        println!("\n{}", "Deleted files:".red().bold());
        for path in &diff.deleted {
            println!("  - {}", path.red());
        }
    }
    println!(
        "\n{} added, {} modified, {} deleted",
        diff.added.len().to_string().green(),
        diff.modified.len().to_string().yellow(),
        diff.deleted.len().to_string().red()
    );
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn short(id: &str) -> &str {
    &id[..18.min(id.len())]
}

fn round_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}
