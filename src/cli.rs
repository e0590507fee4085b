//! Command-line interface for tidyfold.
//!
//! Parses arguments with `clap`, builds the configured classifier, journal
//! and filters, and dispatches each subcommand to the library. Errors are
//! reported through `anyhow` at this boundary only.

use crate::config::{ClassifierMode, CompiledFilters, Settings};
use crate::disk_usage::analyze_disk_usage;
use crate::duplicates::{compare_directories, find_duplicates};
use crate::file_category::CategoryClassifier;
use crate::file_ops::{FileOps, preview_file, view_metadata};
use crate::file_organizer::{Deorganizer, Reorganizer};
use crate::journal::{DiscardedTail, Journal};
use crate::output::OutputFormatter;
use crate::training::{load_samples, train};
use crate::undo::UndoManager;
use crate::watcher::{DirectoryWatcher, WatchSubscription};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "tidyfold")]
#[command(about = "Sort files into category folders, with a reversible operation log")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./.tidyfoldrc.toml, then ~/.config/tidyfold/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Operation log to append to and undo from
    #[arg(long, global = true)]
    pub journal: Option<PathBuf>,

    /// Classify with this trained model instead of the extension rules
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Do not ask before destructive operations
    #[arg(short, long, global = true)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sort the files in a directory into category folders
    Organize {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        target: PathBuf,
        /// Show what would be moved without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Move files out of subfolders back into the directory root
    Deorganize {
        #[arg(short, long)]
        source: PathBuf,
    },
    /// Sort new files as they appear, until Ctrl-C
    Watch {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        target: PathBuf,
    },
    /// Undo the most recent operation
    Undo {
        /// Drop the most recent record without reversing it
        #[arg(long)]
        discard: bool,
    },
    /// Show the operation log
    Log,
    /// List files whose content duplicates another file
    FindDuplicates {
        #[arg(short, long)]
        directory: PathBuf,
    },
    /// Compare two directories by path and content
    Compare {
        #[arg(long)]
        dir1: PathBuf,
        #[arg(long)]
        dir2: PathBuf,
    },
    /// Show how much space each subdirectory uses
    DiskUsage {
        #[arg(short, long)]
        directory: PathBuf,
    },
    /// Train a classifier model from labeled samples (JSON lines, or CSV for `.csv` files)
    Train {
        #[arg(long)]
        data: PathBuf,
        /// Where to write the model (defaults to the configured model path)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Move a file or directory
    Move { source: PathBuf, destination: PathBuf },
    /// Copy a file or directory
    Copy { source: PathBuf, destination: PathBuf },
    /// Delete a file or directory (cannot be undone)
    Delete { path: PathBuf },
    /// Create a directory
    CreateDirectory { parent: PathBuf, name: String },
    /// Delete a directory and everything in it (cannot be undone)
    DeleteDirectory { path: PathBuf },
    /// Rename a directory
    RenameDirectory {
        parent: PathBuf,
        old_name: String,
        new_name: String,
    },
    /// Rename files in a directory with a regex replacement
    BatchRename {
        #[arg(short, long)]
        directory: PathBuf,
        #[arg(long)]
        pattern: String,
        #[arg(long, default_value = "")]
        replacement: String,
    },
    /// Move files into YYYY-MM-DD folders by modification date
    SortByDate {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        target: PathBuf,
    },
    /// Encrypt a file in place (a key file is generated on first use)
    Encrypt {
        path: PathBuf,
        /// Key file (defaults to the configured key path)
        #[arg(long)]
        key: Option<PathBuf>,
    },
    /// Decrypt a file encrypted with `encrypt`
    Decrypt {
        path: PathBuf,
        #[arg(long)]
        key: Option<PathBuf>,
    },
    /// Show a file's size, modification time and media type
    Metadata { path: PathBuf },
    /// Print the first lines of a text file
    Preview {
        path: PathBuf,
        #[arg(short = 'n', long, default_value_t = 10)]
        lines: usize,
    },
}

/// Everything a command needs, resolved from flags and settings.
struct App {
    settings: Settings,
    journal: Journal,
    model: Option<PathBuf>,
    assume_yes: bool,
}

impl App {
    fn classifier(&self) -> Result<CategoryClassifier> {
        let model_path = match (&self.model, self.settings.classifier.mode) {
            (Some(path), _) => Some(path.clone()),
            (None, ClassifierMode::Model) => Some(self.settings.classifier.model_path.clone()),
            (None, ClassifierMode::Rules) => None,
        };
        match model_path {
            Some(path) => CategoryClassifier::load_model(&path)
                .with_context(|| format!("failed to load classifier model {}", path.display())),
            None => Ok(CategoryClassifier::Rules(self.settings.rule_classifier())),
        }
    }

    fn filters(&self) -> Result<CompiledFilters> {
        self.settings
            .compile_filters()
            .context("invalid filter rules in configuration")
    }

    fn key_path(&self, key: Option<PathBuf>) -> PathBuf {
        key.unwrap_or_else(|| self.settings.encryption.key_path.clone())
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        print!("{} [y/N] ", prompt);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}

/// Runs a parsed command line with already loaded settings.
pub fn run(cli: Cli, settings: Settings) -> Result<()> {
    let journal_path = cli
        .journal
        .clone()
        .unwrap_or_else(|| settings.journal.path.clone());
    let app = App {
        journal: Journal::open(journal_path),
        settings,
        model: cli.model.clone(),
        assume_yes: cli.yes,
    };

    match cli.command {
        Command::Organize {
            source,
            target,
            dry_run,
        } => organize(&app, &source, &target, dry_run),
        Command::Deorganize { source } => {
            let report = Deorganizer::new(app.journal.clone())
                .run(&source)
                .with_context(|| format!("failed to deorganize {}", source.display()))?;
            OutputFormatter::deorganize_report(&report);
            Ok(())
        }
        Command::Watch { source, target } => watch(&app, source, target),
        Command::Undo { discard } => undo(&app, discard),
        Command::Log => {
            let records = app.journal.records().context("failed to read the operation log")?;
            OutputFormatter::journal(&records);
            Ok(())
        }
        Command::FindDuplicates { directory } => {
            let spinner = OutputFormatter::spinner("Hashing files");
            let report = find_duplicates(&directory);
            spinner.finish_and_clear();
            OutputFormatter::duplicates(&report?);
            Ok(())
        }
        Command::Compare { dir1, dir2 } => {
            let spinner = OutputFormatter::spinner("Comparing directories");
            let diff = compare_directories(&dir1, &dir2);
            spinner.finish_and_clear();
            OutputFormatter::diff(&dir1.display().to_string(), &dir2.display().to_string(), &diff?);
            Ok(())
        }
        Command::DiskUsage { directory } => {
            OutputFormatter::disk_usage(&analyze_disk_usage(&directory)?);
            Ok(())
        }
        Command::Train { data, out } => train_model(&app, &data, out),
        Command::Move {
            source,
            destination,
        } => {
            let target = FileOps::new(app.journal.clone()).move_path(&source, &destination)?;
            OutputFormatter::success(&format!("Moved {} → {}", source.display(), target.display()));
            Ok(())
        }
        Command::Copy {
            source,
            destination,
        } => {
            let target = FileOps::new(app.journal.clone()).copy_path(&source, &destination)?;
            OutputFormatter::success(&format!("Copied {} → {}", source.display(), target.display()));
            Ok(())
        }
        Command::Delete { path } => {
            if !app.confirm(&format!("Permanently delete {}?", path.display()))? {
                OutputFormatter::info("Cancelled.");
                return Ok(());
            }
            FileOps::new(app.journal.clone()).delete_path(&path)?;
            OutputFormatter::success(&format!("Deleted {}", path.display()));
            Ok(())
        }
        Command::CreateDirectory { parent, name } => {
            let dir = FileOps::new(app.journal.clone()).create_directory(&parent, &name)?;
            OutputFormatter::success(&format!("Created {}", dir.display()));
            Ok(())
        }
        Command::DeleteDirectory { path } => {
            if !app.confirm(&format!("Permanently delete {} and everything in it?", path.display()))? {
                OutputFormatter::info("Cancelled.");
                return Ok(());
            }
            FileOps::new(app.journal.clone()).delete_directory(&path)?;
            OutputFormatter::success(&format!("Deleted {}", path.display()));
            Ok(())
        }
        Command::RenameDirectory {
            parent,
            old_name,
            new_name,
        } => {
            let dir = FileOps::new(app.journal.clone()).rename_directory(&parent, &old_name, &new_name)?;
            OutputFormatter::success(&format!("Renamed to {}", dir.display()));
            Ok(())
        }
        Command::BatchRename {
            directory,
            pattern,
            replacement,
        } => {
            let report = FileOps::new(app.journal.clone()).batch_rename(&directory, &pattern, &replacement)?;
            for (from, to) in &report.renamed {
                OutputFormatter::success(&format!("{} → {}", from.display(), to.display()));
            }
            for (path, reason) in &report.skipped {
                OutputFormatter::warning(&format!("{}: {}", path.display(), reason));
            }
            OutputFormatter::info(&format!("Renamed {} files", report.renamed.len()));
            Ok(())
        }
        Command::SortByDate { source, target } => {
            let report = FileOps::new(app.journal.clone()).sort_by_date(&source, &target)?;
            OutputFormatter::organize_report(&report);
            Ok(())
        }
        Command::Encrypt { path, key } => {
            let key = app.key_path(key);
            FileOps::new(app.journal.clone()).encrypt_file(&path, &key)?;
            OutputFormatter::success(&format!("Encrypted {} with {}", path.display(), key.display()));
            Ok(())
        }
        Command::Decrypt { path, key } => {
            let key = app.key_path(key);
            FileOps::new(app.journal.clone()).decrypt_file(&path, &key)?;
            OutputFormatter::success(&format!("Decrypted {}", path.display()));
            Ok(())
        }
        Command::Metadata { path } => {
            OutputFormatter::file_details(&view_metadata(&path)?);
            Ok(())
        }
        Command::Preview { path, lines } => {
            let text = preview_file(&path, lines)
                .with_context(|| format!("failed to preview {}", path.display()))?;
            OutputFormatter::header(&path.display().to_string());
            print!("{}", text);
            Ok(())
        }
    }
}

fn organize(app: &App, source: &Path, target: &Path, dry_run: bool) -> Result<()> {
    let organizer = Reorganizer::new(app.classifier()?, app.journal.clone()).with_filters(app.filters()?);
    OutputFormatter::info(&format!(
        "Organizing {} into {} ({} classifier)",
        source.display(),
        target.display(),
        organizer.classifier().kind()
    ));

    if dry_run {
        let plan = organizer.plan(source, target)?;
        OutputFormatter::plan(&plan);
        return Ok(());
    }

    let report = organizer.run(source, target)?;
    OutputFormatter::organize_report(&report);
    if !report.is_clean() {
        bail!("{} files could not be organized", report.failed.len());
    }
    if !report.moved.is_empty() {
        OutputFormatter::plain("Use 'tidyfold undo' to revert moves one at a time.");
    }
    Ok(())
}

fn watch(app: &App, source: PathBuf, target: PathBuf) -> Result<()> {
    let subscription = WatchSubscription {
        source_directory: source,
        target_directory: target,
        classifier: app.classifier()?,
    };
    let mut watcher = DirectoryWatcher::new(subscription, app.journal.clone())
        .with_filters(app.filters()?)
        .with_retry(app.settings.watch.retry_policy());

    let stop = watcher.stop_handle();
    ctrlc::set_handler(move || stop.stop()).context("failed to install the Ctrl-C handler")?;
    OutputFormatter::info("Watching for new files. Press Ctrl-C to stop.");

    let summary = watcher.run()?;
    OutputFormatter::success(&format!(
        "Stopped watching: {} moved, {} skipped, {} failed",
        summary.moved, summary.skipped, summary.failed
    ));
    Ok(())
}

fn undo(app: &App, discard: bool) -> Result<()> {
    if discard {
        match app.journal.discard_last()? {
            Some(DiscardedTail::Record(record)) => OutputFormatter::warning(&format!(
                "Dropped the last '{}' record without reversing it",
                record.operation
            )),
            Some(DiscardedTail::Unreadable(text)) => {
                OutputFormatter::warning(&format!("Dropped an unreadable log line: {}", text))
            }
            None => OutputFormatter::info("The operation log is empty."),
        }
        return Ok(());
    }

    let report = UndoManager::undo_last(&app.journal)?;
    OutputFormatter::undo_report(&report);
    Ok(())
}

fn train_model(app: &App, data: &Path, out: Option<PathBuf>) -> Result<()> {
    let samples = load_samples(data)?;
    OutputFormatter::info(&format!("Training on {} samples from {}", samples.len(), data.display()));

    let outcome = train(&samples, &app.settings.training.train_config())?;
    if !outcome.stratified {
        OutputFormatter::warning("Some labels have too few samples for a stratified split");
    }
    OutputFormatter::evaluation(&outcome.report);

    let out = out.unwrap_or_else(|| app.settings.classifier.model_path.clone());
    outcome.model.save(&out)?;
    OutputFormatter::success(&format!("Model written to {}", out.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_organize() {
        let cli = Cli::try_parse_from([
            "tidyfold", "organize", "-s", "inbox", "-t", "sorted", "--dry-run", "--journal", "ops.log",
        ])
        .unwrap();
        assert_eq!(cli.journal, Some(PathBuf::from("ops.log")));
        match cli.command {
            Command::Organize {
                source,
                target,
                dry_run,
            } => {
                assert_eq!(source, PathBuf::from("inbox"));
                assert_eq!(target, PathBuf::from("sorted"));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_utility_commands() {
        let cli = Cli::try_parse_from(["tidyfold", "rename-directory", "/tmp", "old", "new"]).unwrap();
        assert!(matches!(cli.command, Command::RenameDirectory { .. }));

        let cli = Cli::try_parse_from(["tidyfold", "undo", "--discard", "-y"]).unwrap();
        assert!(cli.yes);
        assert!(matches!(cli.command, Command::Undo { discard: true }));

        assert!(Cli::try_parse_from(["tidyfold", "compare", "--dir1", "a"]).is_err());
    }

    #[test]
    fn test_parse_encrypt_and_preview() {
        let cli = Cli::try_parse_from(["tidyfold", "encrypt", "tax.pdf", "--key", "my.key"]).unwrap();
        match cli.command {
            Command::Encrypt { path, key } => {
                assert_eq!(path, PathBuf::from("tax.pdf"));
                assert_eq!(key, Some(PathBuf::from("my.key")));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from(["tidyfold", "preview", "notes.txt"]).unwrap();
        assert!(matches!(cli.command, Command::Preview { lines: 10, .. }));
        let cli = Cli::try_parse_from(["tidyfold", "preview", "notes.txt", "-n", "3"]).unwrap();
        assert!(matches!(cli.command, Command::Preview { lines: 3, .. }));
    }
}
