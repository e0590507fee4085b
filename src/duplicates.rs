//! Content-addressed duplicate detection and directory comparison.
//!
//! Both operations are read-only and never touch the journal. Files are
//! considered equal when their [`Digest`]s are equal.

use crate::hasher::{Digest, hash_file};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{} is not a directory", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ScanResult<T> = Result<T, ScanError>;

/// A file's path relative to a scanned root, with `/` separators, and its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntryHash {
    pub relative_path: String,
    pub digest: Digest,
}

/// A later occurrence of content already seen in `original`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicatePair {
    pub duplicate: PathBuf,
    pub original: PathBuf,
}

#[derive(Debug, Default)]
pub struct DuplicateReport {
    pub pairs: Vec<DuplicatePair>,
    /// Files that could not be read, with the reason.
    pub failures: Vec<(PathBuf, String)>,
    pub files_scanned: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirectoryDiff {
    pub only_in_first: Vec<String>,
    pub only_in_second: Vec<String>,
    pub different_files: Vec<String>,
}

impl DirectoryDiff {
    pub fn is_identical(&self) -> bool {
        self.only_in_first.is_empty()
            && self.only_in_second.is_empty()
            && self.different_files.is_empty()
    }
}

fn require_dir(root: &Path) -> ScanResult<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(ScanError::NotFound(root.to_path_buf()))
    }
}

/// Lists regular files under `root` in file-name order. Unreadable entries
/// are logged and appended to `failures`.
fn walk_files(root: &Path, failures: &mut Vec<(PathBuf, String)>) -> Vec<(PathBuf, u64)> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                failures.push((path, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => files.push((entry.into_path(), meta.len())),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable file");
                failures.push((entry.into_path(), e.to_string()));
            }
        }
    }
    files
}

/// Finds files under `root` whose content duplicates an earlier file.
///
/// Files are visited in file-name order; each later occurrence is paired with
/// the first file seen with the same digest, so three identical files yield
/// two pairs. Only files sharing a size with another file are hashed.
///
/// # Examples
///
/// ```no_run
/// use tidyfold::duplicates::find_duplicates;
/// use std::path::Path;
///
/// let report = find_duplicates(Path::new("Downloads")).unwrap();
/// for pair in &report.pairs {
///     println!("{} duplicates {}", pair.duplicate.display(), pair.original.display());
/// }
/// ```
pub fn find_duplicates(root: &Path) -> ScanResult<DuplicateReport> {
    require_dir(root)?;

    let mut report = DuplicateReport::default();
    let files = walk_files(root, &mut report.failures);
    report.files_scanned = files.len();

    let mut size_counts: HashMap<u64, usize> = HashMap::new();
    for (_, size) in &files {
        *size_counts.entry(*size).or_default() += 1;
    }
    let candidates: Vec<&PathBuf> = files
        .iter()
        .filter(|(_, size)| size_counts[size] > 1)
        .map(|(path, _)| path)
        .collect();

    let digests: Vec<_> = candidates.par_iter().map(|path| hash_file(path)).collect();

    let mut first_seen: HashMap<Digest, &PathBuf> = HashMap::new();
    for (path, digest) in candidates.into_iter().zip(digests) {
        match digest {
            Ok(digest) => match first_seen.get(&digest) {
                Some(original) => report.pairs.push(DuplicatePair {
                    duplicate: path.clone(),
                    original: (*original).clone(),
                }),
                None => {
                    first_seen.insert(digest, path);
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to hash file");
                report.failures.push((path.clone(), e.to_string()));
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        files = report.files_scanned,
        duplicates = report.pairs.len(),
        "duplicate scan complete"
    );
    Ok(report)
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

fn index_tree(root: &Path) -> BTreeMap<String, (PathBuf, u64)> {
    let mut failures = Vec::new();
    walk_files(root, &mut failures)
        .into_iter()
        .filter_map(|(path, size)| relative_key(root, &path).map(|key| (key, (path, size))))
        .collect()
}

fn entry_hash(relative_path: &str, path: &Path) -> Option<DirectoryEntryHash> {
    match hash_file(path) {
        Ok(digest) => Some(DirectoryEntryHash {
            relative_path: relative_path.to_string(),
            digest,
        }),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to hash file");
            None
        }
    }
}

/// Compares two trees by relative path and content.
///
/// A file present on both sides that cannot be read on either side is
/// reported as different.
pub fn compare_directories(first: &Path, second: &Path) -> ScanResult<DirectoryDiff> {
    require_dir(first)?;
    require_dir(second)?;

    let left = index_tree(first);
    let right = index_tree(second);

    let mut diff = DirectoryDiff {
        only_in_first: left
            .keys()
            .filter(|k| !right.contains_key(*k))
            .cloned()
            .collect(),
        only_in_second: right
            .keys()
            .filter(|k| !left.contains_key(*k))
            .cloned()
            .collect(),
        different_files: Vec::new(),
    };

    let common: Vec<(&String, &(PathBuf, u64), &(PathBuf, u64))> = left
        .iter()
        .filter_map(|(key, l)| right.get(key).map(|r| (key, l, r)))
        .collect();

    let changed: Vec<bool> = common
        .par_iter()
        .map(|(key, (lpath, lsize), (rpath, rsize))| {
            if lsize != rsize {
                return true;
            }
            match (entry_hash(key, lpath), entry_hash(key, rpath)) {
                (Some(l), Some(r)) => l.digest != r.digest,
                _ => true,
            }
        })
        .collect();

    diff.different_files = common
        .iter()
        .zip(changed)
        .filter(|(_, changed)| *changed)
        .map(|((key, _, _), _)| (*key).clone())
        .collect();

    tracing::info!(
        first = %first.display(),
        second = %second.display(),
        only_in_first = diff.only_in_first.len(),
        only_in_second = diff.only_in_second.len(),
        different = diff.different_files.len(),
        "directory comparison complete"
    );
    Ok(diff)
}

/// Hashes every file under `root`, keyed by relative path.
pub fn hash_tree(root: &Path) -> ScanResult<Vec<DirectoryEntryHash>> {
    require_dir(root)?;
    index_tree(root)
        .into_par_iter()
        .map(|(key, (path, _))| {
            hash_file(&path)
                .map(|digest| DirectoryEntryHash {
                    relative_path: key,
                    digest,
                })
                .map_err(|source| ScanError::Io { path, source })
        })
        .collect()
}

/// Total size of the regular files under `root`.
pub(crate) fn tree_size(root: &Path) -> u64 {
    if root.is_file() {
        return fs::metadata(root).map(|m| m.len()).unwrap_or(0);
    }
    let mut failures = Vec::new();
    walk_files(root, &mut failures).iter().map(|(_, size)| size).sum()
}
