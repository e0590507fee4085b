//! Per-directory disk usage.

use crate::duplicates::{ScanError, ScanResult, tree_size};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the entry that aggregates files sitting directly in the root.
pub const ROOT_FILES: &str = ".";

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryUsage {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// Share of the analyzed total, `0.0..=100.0`.
    pub percentage: f64,
}

/// Sizes every immediate subdirectory of `root`, plus one [`ROOT_FILES`]
/// entry for the files directly inside it, largest first.
pub fn analyze_disk_usage(root: &Path) -> ScanResult<Vec<DirectoryUsage>> {
    if !root.is_dir() {
        return Err(ScanError::NotFound(root.to_path_buf()));
    }
    let entries = fs::read_dir(root).map_err(|source| ScanError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut usage = Vec::new();
    let mut loose_bytes = 0u64;
    for entry in entries.filter_map(Result::ok) {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            usage.push(DirectoryUsage {
                name: entry.file_name().to_string_lossy().into_owned(),
                bytes: tree_size(&entry.path()),
                path: entry.path(),
                percentage: 0.0,
            });
        } else if file_type.is_file() {
            loose_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    if loose_bytes > 0 {
        usage.push(DirectoryUsage {
            name: ROOT_FILES.to_string(),
            path: root.to_path_buf(),
            bytes: loose_bytes,
            percentage: 0.0,
        });
    }

    let total: u64 = usage.iter().map(|u| u.bytes).sum();
    for u in &mut usage {
        u.percentage = if total == 0 {
            0.0
        } else {
            u.bytes as f64 * 100.0 / total as f64
        };
    }
    usage.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.name.cmp(&b.name)));

    tracing::debug!(root = %root.display(), total, entries = usage.len(), "disk usage analyzed");
    Ok(usage)
}
