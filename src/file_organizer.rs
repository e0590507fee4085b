//! Moving files into category folders and back out again.
//!
//! [`Reorganizer`] sorts the immediate files of a source directory into
//! `target/<label>/` folders, journaling every move. [`Deorganizer`] is its
//! inverse: it pulls nested files back up to the root and prunes the folders
//! that end up empty.
use crate::cipher::CipherError;
use crate::config::{CompiledFilters, ConfigError};
use crate::file_category::{CategoryClassifier, CategoryLabel, FileMetadata};
use crate::journal::{Journal, JournalError, OperationRecord};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

/// Files operating systems drop into folders on their own.
pub const MARKER_FILES: [&str; 3] = ["desktop.ini", ".DS_Store", "Thumbs.db"];

pub fn is_marker_file(name: &str) -> bool {
    MARKER_FILES.iter().any(|m| m.eq_ignore_ascii_case(name))
}

/// Errors that can occur during file organization operations.
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied for {}: {source}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("destination {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{} kept changing after {attempts} reads", path.display())]
    TransientRead { path: PathBuf, attempts: u32 },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid rename pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

impl OrganizeError {
    /// Classifies an I/O failure on `path`.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => OrganizeError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => OrganizeError::PermissionDenied {
                path: path.to_path_buf(),
                source,
            },
            io::ErrorKind::AlreadyExists => OrganizeError::AlreadyExists(path.to_path_buf()),
            _ => OrganizeError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Result type for file organization operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Bounded retry for reading a file that may still be being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(200),
        }
    }
}

/// One file routed into a category folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub source: PathBuf,
    pub target: PathBuf,
    pub label: CategoryLabel,
}

#[derive(Debug, Default)]
pub struct OrganizeReport {
    pub moved: Vec<Relocation>,
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl OrganizeReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Moves `source` to `target`, copying across filesystems when a rename is
/// not possible. Never overwrites `target`.
pub fn move_file(source: &Path, target: &Path) -> OrganizeResult<()> {
    if target.exists() {
        return Err(OrganizeError::AlreadyExists(target.to_path_buf()));
    }
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                source = %source.display(),
                target = %target.display(),
                "rename crosses devices, copying instead"
            );
            fs::copy(source, target).map_err(|e| OrganizeError::from_io(target, e))?;
            fs::remove_file(source).map_err(|e| OrganizeError::from_io(source, e))
        }
        Err(e) => Err(OrganizeError::from_io(source, e)),
    }
}

fn ensure_dir(dir: &Path) -> OrganizeResult<()> {
    fs::create_dir_all(dir).map_err(|e| OrganizeError::from_io(dir, e))
}

/// Routes files into `target/<label>/` folders using a classifier.
///
/// # Examples
///
/// ```no_run
/// use tidyfold::file_category::CategoryClassifier;
/// use tidyfold::file_organizer::Reorganizer;
/// use tidyfold::journal::Journal;
/// use std::path::Path;
///
/// let organizer = Reorganizer::new(CategoryClassifier::default(), Journal::open("operations.log"));
/// let report = organizer.run(Path::new("Downloads"), Path::new("Sorted")).unwrap();
/// println!("moved {} files", report.moved.len());
/// ```
#[derive(Debug, Clone)]
pub struct Reorganizer {
    classifier: CategoryClassifier,
    journal: Journal,
    filters: CompiledFilters,
    retry: RetryPolicy,
}

impl Reorganizer {
    pub fn new(classifier: CategoryClassifier, journal: Journal) -> Self {
        Self {
            classifier,
            journal,
            filters: CompiledFilters::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_filters(mut self, filters: CompiledFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn classifier(&self) -> &CategoryClassifier {
        &self.classifier
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Whether a file directly inside the watched or scanned folder is ours to move.
    pub fn is_eligible(&self, file: &Path) -> bool {
        let Some(name) = file.file_name() else {
            return false;
        };
        !is_marker_file(&name.to_string_lossy()) && self.filters.should_include(Path::new(name))
    }

    /// Lists the eligible files directly inside `source`, sorted by name.
    fn eligible_files(&self, source: &Path) -> OrganizeResult<Vec<PathBuf>> {
        if !source.is_dir() {
            return Err(OrganizeError::NotFound(source.to_path_buf()));
        }
        let entries = fs::read_dir(source).map_err(|e| OrganizeError::from_io(source, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| OrganizeError::from_io(source, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && self.is_eligible(&entry.path()) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn destination(target_dir: &Path, file: &Path, label: &CategoryLabel) -> OrganizeResult<PathBuf> {
        let name = file
            .file_name()
            .ok_or_else(|| OrganizeError::NotFound(file.to_path_buf()))?;
        Ok(target_dir.join(label.as_str()).join(name))
    }

    /// Computes where each eligible file would go without touching anything.
    pub fn plan(&self, source: &Path, target_dir: &Path) -> OrganizeResult<Vec<Relocation>> {
        self.eligible_files(source)?
            .into_iter()
            .map(|file| {
                let metadata =
                    FileMetadata::from_path(&file).map_err(|e| OrganizeError::from_io(&file, e))?;
                let label = self.classifier.predict(&metadata);
                Ok(Relocation {
                    target: Self::destination(target_dir, &file, &label)?,
                    source: file,
                    label,
                })
            })
            .collect()
    }

    /// Sorts every eligible file directly inside `source` into `target_dir`.
    ///
    /// Per-file failures are logged and reported; the batch carries on. A
    /// failed journal append aborts the run, since later undo would no longer
    /// match the filesystem.
    pub fn run(&self, source: &Path, target_dir: &Path) -> OrganizeResult<OrganizeReport> {
        let files = self.eligible_files(source)?;
        ensure_dir(target_dir)?;
        tracing::info!(
            source = %source.display(),
            target = %target_dir.display(),
            files = files.len(),
            classifier = self.classifier.kind(),
            "organizing directory"
        );

        let mut report = OrganizeReport::default();
        for file in files {
            match self.relocate_file(&file, target_dir) {
                Ok(relocation) => report.moved.push(relocation),
                Err(OrganizeError::AlreadyExists(dest)) => {
                    tracing::warn!(
                        path = %file.display(),
                        destination = %dest.display(),
                        "destination exists, skipping"
                    );
                    report
                        .skipped
                        .push((file, format!("{} already exists", dest.display())));
                }
                Err(e @ OrganizeError::Journal(_)) => return Err(e),
                Err(e) => {
                    tracing::error!(operation = "move", path = %file.display(), error = %e, "failed to organize file");
                    report.failed.push((file, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Classifies and moves a single file, then journals the move.
    pub fn relocate_file(&self, file: &Path, target_dir: &Path) -> OrganizeResult<Relocation> {
        let metadata = FileMetadata::from_path(file).map_err(|e| OrganizeError::from_io(file, e))?;
        self.relocate_with(file, target_dir, &metadata)
    }

    /// Like [`Reorganizer::relocate_file`], but first waits for the file's
    /// size to settle. Used for files that have only just appeared.
    pub fn relocate_arrival(&self, file: &Path, target_dir: &Path) -> OrganizeResult<Relocation> {
        let metadata = self.read_settled_metadata(file)?;
        self.relocate_with(file, target_dir, &metadata)
    }

    fn relocate_with(
        &self,
        file: &Path,
        target_dir: &Path,
        metadata: &FileMetadata,
    ) -> OrganizeResult<Relocation> {
        let label = self.classifier.predict(metadata);
        let destination = Self::destination(target_dir, file, &label)?;
        if let Some(folder) = destination.parent() {
            ensure_dir(folder)?;
        }

        move_file(file, &destination)?;
        self.journal
            .append(&OperationRecord::moved(file, &destination))?;
        tracing::info!(
            source = %file.display(),
            target = %destination.display(),
            label = %label,
            "moved file"
        );

        Ok(Relocation {
            source: file.to_path_buf(),
            target: destination,
            label,
        })
    }

    /// Reads metadata once the file size is the same on two consecutive reads.
    fn read_settled_metadata(&self, file: &Path) -> OrganizeResult<FileMetadata> {
        let mut previous: Option<u64> = None;
        for attempt in 1..=self.retry.attempts {
            match fs::metadata(file) {
                Ok(meta) if previous == Some(meta.len()) => {
                    return FileMetadata::from_path(file)
                        .map_err(|e| OrganizeError::from_io(file, e));
                }
                Ok(meta) => previous = Some(meta.len()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(OrganizeError::NotFound(file.to_path_buf()));
                }
                Err(e) => {
                    tracing::debug!(path = %file.display(), attempt, error = %e, "metadata read failed, retrying");
                }
            }
            if attempt < self.retry.attempts {
                thread::sleep(self.retry.delay);
            }
        }
        Err(OrganizeError::TransientRead {
            path: file.to_path_buf(),
            attempts: self.retry.attempts,
        })
    }
}

#[derive(Debug, Default)]
pub struct DeorganizeReport {
    /// `(from, to)` pairs of files pulled back to the root.
    pub moved: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
    pub removed_dirs: Vec<PathBuf>,
}

/// Flattens a directory tree back into its root.
#[derive(Debug, Clone)]
pub struct Deorganizer {
    journal: Journal,
}

impl Deorganizer {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }

    pub fn run(&self, source: &Path) -> OrganizeResult<DeorganizeReport> {
        if !source.is_dir() {
            return Err(OrganizeError::NotFound(source.to_path_buf()));
        }

        let mut nested: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(source).min_depth(2).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => nested.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping unreadable entry"),
            }
        }

        let mut report = DeorganizeReport::default();
        for file in nested {
            let Some(name) = file.file_name() else {
                continue;
            };
            if is_marker_file(&name.to_string_lossy()) {
                report.skipped.push((file, "platform marker file".to_string()));
                continue;
            }

            let destination = source.join(name);
            match move_file(&file, &destination) {
                Ok(()) => {
                    self.journal
                        .append(&OperationRecord::moved(&file, &destination))?;
                    tracing::info!(source = %file.display(), target = %destination.display(), "moved file to root");
                    report.moved.push((file, destination));
                }
                Err(OrganizeError::AlreadyExists(_)) => {
                    tracing::warn!(path = %file.display(), "a file with this name already exists in the root, skipping");
                    report
                        .skipped
                        .push((file, "name already exists in root".to_string()));
                }
                Err(e) => {
                    tracing::error!(operation = "move", path = %file.display(), error = %e, "failed to move file to root");
                    report.failed.push((file, e.to_string()));
                }
            }
        }

        report.removed_dirs = remove_empty_dirs(source);
        Ok(report)
    }
}

/// Removes every empty directory below `root`, deepest first.
fn remove_empty_dirs(root: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        let dir = entry.path();
        let is_empty = fs::read_dir(dir)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if is_empty {
            match fs::remove_dir(dir) {
                Ok(()) => {
                    tracing::debug!(path = %dir.display(), "removed empty directory");
                    removed.push(dir.to_path_buf());
                }
                Err(e) => tracing::warn!(path = %dir.display(), error = %e, "could not remove directory"),
            }
        }
    }
    removed
}
