//! Terminal output for the CLI.
//!
//! All user-facing rendering goes through [`OutputFormatter`] so that library
//! code only ever logs through `tracing`.

use crate::disk_usage::DirectoryUsage;
use crate::duplicates::{DirectoryDiff, DuplicateReport};
use crate::file_ops::FileDetails;
use crate::file_organizer::{DeorganizeReport, OrganizeReport, Relocation};
use crate::journal::OperationRecord;
use crate::training::EvaluationReport;
use crate::undo::UndoReport;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

/// Consistent styling for CLI output.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use tidyfold::output::OutputFormatter;
    /// OutputFormatter::success("Directory organized");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// A ticking spinner for scans whose length is not known up front.
    pub fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Prints a per-label count table.
    pub fn summary_table(label_counts: &BTreeMap<String, usize>) {
        Self::header("SUMMARY");
        let width = label_counts
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(8);
        let total: usize = label_counts.values().sum();

        println!("{:<width$} | {}", "Category".bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));
        for (label, count) in label_counts {
            println!(
                "{:<width$} | {} {}",
                label,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total.to_string().green().bold(),
            plural(total),
            width = width
        );
    }

    fn label_counts(relocations: &[Relocation]) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in relocations {
            *counts.entry(r.label.to_string()).or_insert(0) += 1;
        }
        counts
    }

    fn problems(title: &str, items: &[(PathBuf, String)]) {
        if items.is_empty() {
            return;
        }
        Self::header(title);
        for (path, reason) in items {
            println!("  {} {}", path.display(), format!("({})", reason).dimmed());
        }
    }

    pub fn organize_report(report: &OrganizeReport) {
        for r in &report.moved {
            Self::success(&format!("{} → {}", r.source.display(), r.target.display()));
        }
        Self::problems("SKIPPED", &report.skipped);
        Self::problems("FAILED", &report.failed);
        if report.moved.is_empty() {
            Self::info("Nothing to move.");
        } else {
            Self::summary_table(&Self::label_counts(&report.moved));
        }
    }

    pub fn plan(relocations: &[Relocation]) {
        Self::dry_run_notice(&format!("{} {} would be moved", relocations.len(), plural(relocations.len())));
        for r in relocations {
            println!(
                "  {} → {} {}",
                r.source.display(),
                r.target.display(),
                format!("[{}]", r.label).dimmed()
            );
        }
    }

    pub fn deorganize_report(report: &DeorganizeReport) {
        for (from, to) in &report.moved {
            Self::success(&format!("{} → {}", from.display(), to.display()));
        }
        Self::problems("SKIPPED", &report.skipped);
        Self::problems("FAILED", &report.failed);
        Self::info(&format!(
            "Moved {} {} back, removed {} empty folders",
            report.moved.len(),
            plural(report.moved.len()),
            report.removed_dirs.len()
        ));
    }

    pub fn undo_report(report: &UndoReport) {
        Self::success(&format!("Undid '{}': {}", report.record.operation, report.action));
    }

    pub fn journal(records: &[OperationRecord]) {
        if records.is_empty() {
            Self::info("The operation log is empty.");
            return;
        }
        Self::header("OPERATION LOG");
        for (idx, record) in records.iter().enumerate() {
            let details: Vec<String> = record
                .details
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!(
                "{:>4}  {:<16} {} {}",
                idx + 1,
                record.operation.to_string().cyan(),
                record.timestamp.as_deref().unwrap_or("-").dimmed(),
                details.join(" ")
            );
        }
    }

    pub fn duplicates(report: &DuplicateReport) {
        if report.pairs.is_empty() {
            Self::success(&format!("No duplicates among {} files", report.files_scanned));
        } else {
            Self::header("DUPLICATES");
            for pair in &report.pairs {
                println!(
                    "  {} {} {}",
                    pair.duplicate.display(),
                    "duplicates".dimmed(),
                    pair.original.display()
                );
            }
            Self::warning(&format!("{} duplicate {} found", report.pairs.len(), plural(report.pairs.len())));
        }
        Self::problems("UNREADABLE", &report.failures);
    }

    pub fn diff(first: &str, second: &str, diff: &DirectoryDiff) {
        if diff.is_identical() {
            Self::success("Directories are identical");
            return;
        }
        let sections = [
            (format!("Files only in {}", first), &diff.only_in_first),
            (format!("Files only in {}", second), &diff.only_in_second),
            ("Files with different content".to_string(), &diff.different_files),
        ];
        for (title, files) in sections {
            Self::header(&title);
            if files.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for file in files {
                println!("  {}", file);
            }
        }
    }

    pub fn disk_usage(usage: &[DirectoryUsage]) {
        Self::header("DISK USAGE");
        for u in usage {
            println!(
                "{:<32} {:>10.2} MB {:>7.2}%",
                u.name,
                u.bytes as f64 / MIB,
                u.percentage
            );
        }
    }

    pub fn file_details(details: &FileDetails) {
        let field = |name: &str| format!("{:<10}", name).bold();
        Self::header(&details.path.display().to_string());
        println!("  {} {} bytes", field("Size"), details.size_bytes);
        println!("  {} {}", field("Modified"), details.modified.format("%Y-%m-%d %H:%M:%S"));
        println!("  {} {}", field("Type"), details.media_type);
        if details.encrypted {
            println!("  {} {}", field("Encrypted"), "yes".yellow());
        }
    }

    pub fn evaluation(report: &EvaluationReport) {
        Self::header("EVALUATION");
        println!("{}", report);
    }
}
