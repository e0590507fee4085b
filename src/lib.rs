//! tidyfold - sort incoming files into category folders
//!
//! This library classifies files by name, size and media type (with a fixed
//! rule table or a trained forest model), moves them into per-category
//! folders, watches directories for new arrivals, and records every mutation
//! in an append-only journal so the most recent operation can be undone.
//! It also finds duplicate files by content hash and compares directories.

pub mod cipher;
pub mod cli;
pub mod config;
pub mod disk_usage;
pub mod duplicates;
pub mod file_category;
pub mod file_ops;
pub mod file_organizer;
pub mod forest;
pub mod hasher;
pub mod journal;
pub mod output;
pub mod training;
pub mod undo;
pub mod watcher;

pub use config::{CompiledFilters, ConfigError, Settings};
pub use duplicates::{DirectoryDiff, DuplicatePair, compare_directories, find_duplicates};
pub use file_category::{CategoryClassifier, CategoryLabel, FileMetadata, RuleClassifier};
pub use file_organizer::{Deorganizer, OrganizeError, OrganizeReport, Reorganizer};
pub use forest::{ForestModel, LabeledSample};
pub use journal::{Journal, OperationKind, OperationRecord};
pub use undo::{UndoError, UndoManager, UndoReport};
pub use watcher::{DirectoryWatcher, StopHandle, WatchState, WatchSubscription};
