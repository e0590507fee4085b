//! Reversing the most recent journaled operation.
//!
//! Undo is strictly single-step and last-in first-out: [`UndoManager::undo_last`]
//! takes the journal tail, reverses it on disk and only then removes it. If
//! the reversal fails the journal is left exactly as it was.

use crate::cipher::{self, CipherError, FileKey};
use crate::hasher::{Digest, hash_file};
use crate::journal::{Journal, JournalError, OperationKind, OperationRecord};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("nothing to undo: the journal is empty")]
    EmptyJournal,

    #[error("undo is not supported for '{0}' records; drop it with `undo --discard`")]
    Unsupported(OperationKind),

    #[error("'{0}' cannot be reversed; drop the record with `undo --discard`")]
    NotReversible(OperationKind),

    #[error("{} was modified after it was copied, refusing to delete it", .0.display())]
    TargetModified(PathBuf),

    #[error("'{kind}' record has no '{key}' detail")]
    MissingDetail {
        kind: OperationKind,
        key: &'static str,
    },

    #[error("{} already exists, refusing to overwrite it", .0.display())]
    AlreadyExists(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> UndoError + '_ {
    move |source| UndoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What an undo did on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// A file or directory was moved from `from` back to `to`.
    Restored { from: PathBuf, to: PathBuf },
    /// A copy or a created directory was removed.
    Removed(PathBuf),
    /// An encrypted file was decrypted in place.
    Decrypted(PathBuf),
    /// A decrypted file was encrypted again.
    Encrypted(PathBuf),
}

impl fmt::Display for UndoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoAction::Restored { from, to } => {
                write!(f, "restored {} -> {}", from.display(), to.display())
            }
            UndoAction::Removed(path) => write!(f, "removed {}", path.display()),
            UndoAction::Decrypted(path) => write!(f, "decrypted {}", path.display()),
            UndoAction::Encrypted(path) => write!(f, "encrypted {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UndoReport {
    pub record: OperationRecord,
    pub action: UndoAction,
}

/// Manages undo operations.
pub struct UndoManager;

impl UndoManager {
    /// Reverses and removes the newest journal record.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tidyfold::journal::Journal;
    /// use tidyfold::undo::UndoManager;
    ///
    /// let journal = Journal::open("operations.log");
    /// match UndoManager::undo_last(&journal) {
    ///     Ok(report) => println!("{}", report.action),
    ///     Err(e) => eprintln!("Undo failed: {}", e),
    /// }
    /// ```
    pub fn undo_last(journal: &Journal) -> Result<UndoReport, UndoError> {
        let report = journal
            .pop_last_with(|record| {
                Self::reverse(record).map(|action| UndoReport {
                    record: record.clone(),
                    action,
                })
            })
            .inspect_err(|e| tracing::warn!(error = %e, "undo failed, journal left unchanged"))?
            .ok_or(UndoError::EmptyJournal)?;

        tracing::info!(operation = %report.record.operation, action = %report.action, "undo complete");
        Ok(report)
    }

    fn reverse(record: &OperationRecord) -> Result<UndoAction, UndoError> {
        let detail = |key: &'static str| {
            record.detail(key).ok_or(UndoError::MissingDetail {
                kind: record.operation,
                key,
            })
        };
        let path = |key: &'static str| detail(key).map(PathBuf::from);

        match record.operation {
            OperationKind::Move => {
                let (source, target) = (path("source")?, path("target")?);
                move_back(&target, &source)
            }
            OperationKind::Copy => {
                let target = path("target")?;
                remove_copy(&target, record.detail("digest"))
            }
            OperationKind::RenameDirectory => {
                let parent = path("parent_path")?;
                let (old, new) = (parent.join(detail("old_name")?), parent.join(detail("new_name")?));
                move_back(&new, &old)
            }
            OperationKind::CreateDirectory => {
                let dir = path("path")?.join(detail("name")?);
                fs::remove_dir(&dir).map_err(io_err(&dir))?;
                Ok(UndoAction::Removed(dir))
            }
            OperationKind::Encrypt => {
                let (file, key) = (path("file")?, FileKey::load(&path("key_file")?)?);
                cipher::decrypt_file(&key, &file)?;
                Ok(UndoAction::Decrypted(file))
            }
            OperationKind::Decrypt => {
                let (file, key) = (path("file")?, FileKey::load(&path("key_file")?)?);
                cipher::encrypt_file(&key, &file)?;
                Ok(UndoAction::Encrypted(file))
            }
            kind @ (OperationKind::Delete | OperationKind::DeleteDirectory) => {
                Err(UndoError::NotReversible(kind))
            }
            kind => Err(UndoError::Unsupported(kind)),
        }
    }
}

fn move_back(from: &Path, to: &Path) -> Result<UndoAction, UndoError> {
    if to.exists() {
        return Err(UndoError::AlreadyExists(to.to_path_buf()));
    }
    if !from.exists() {
        return Err(UndoError::Io {
            path: from.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no longer at its recorded location"),
        });
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    match fs::rename(from, to) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices && from.is_file() => {
            fs::copy(from, to).map_err(io_err(to))?;
            fs::remove_file(from).map_err(io_err(from))?;
        }
        Err(e) => return Err(io_err(from)(e)),
    }
    Ok(UndoAction::Restored {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
    })
}

fn remove_copy(target: &Path, digest: Option<&str>) -> Result<UndoAction, UndoError> {
    let meta = fs::symlink_metadata(target).map_err(io_err(target))?;
    if meta.is_dir() {
        fs::remove_dir_all(target).map_err(io_err(target))?;
        return Ok(UndoAction::Removed(target.to_path_buf()));
    }

    if let Some(expected) = digest {
        let current = hash_file(target).map_err(io_err(target))?;
        if Digest::from_hex(expected) != Some(current) {
            return Err(UndoError::TargetModified(target.to_path_buf()));
        }
    }
    fs::remove_file(target).map_err(io_err(target))?;
    Ok(UndoAction::Removed(target.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::DiscardedTail;
    use tempfile::TempDir;

    struct Setup {
        temp_dir: TempDir,
        journal: Journal,
    }

    impl Setup {
        fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let journal = Journal::open(temp_dir.path().join("operations.log"));
            Self { temp_dir, journal }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.temp_dir.path().join(rel)
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let path = self.path(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
            path
        }
    }

    #[test]
    fn test_empty_journal() {
        let s = Setup::new();
        assert!(matches!(
            UndoManager::undo_last(&s.journal),
            Err(UndoError::EmptyJournal)
        ));
    }

    #[test]
    fn test_move_round_trip() {
        let s = Setup::new();
        let original = s.path("inbox/report.pdf");
        let moved = s.write("sorted/Documents/report.pdf", "pdf");
        s.journal
            .append(&OperationRecord::moved(&original, &moved))
            .unwrap();

        let report = UndoManager::undo_last(&s.journal).unwrap();

        assert_eq!(report.record.operation, OperationKind::Move);
        assert_eq!(fs::read_to_string(&original).unwrap(), "pdf");
        assert!(!moved.exists());
        assert!(s.journal.is_empty().unwrap());
    }

    #[test]
    fn test_undo_is_lifo_until_exhausted() {
        let s = Setup::new();
        for name in ["a.txt", "b.txt"] {
            let moved = s.write(&format!("sorted/{name}"), name);
            s.journal
                .append(&OperationRecord::moved(&s.path(name), &moved))
                .unwrap();
        }

        let first = UndoManager::undo_last(&s.journal).unwrap();
        assert_eq!(
            first.action,
            UndoAction::Restored {
                from: s.path("sorted/b.txt"),
                to: s.path("b.txt"),
            }
        );
        UndoManager::undo_last(&s.journal).unwrap();
        assert!(s.path("a.txt").exists());
        assert!(matches!(
            UndoManager::undo_last(&s.journal),
            Err(UndoError::EmptyJournal)
        ));
    }

    #[test]
    fn test_move_refuses_occupied_source() {
        let s = Setup::new();
        let original = s.write("report.pdf", "newer");
        let moved = s.write("Documents/report.pdf", "older");
        s.journal
            .append(&OperationRecord::moved(&original, &moved))
            .unwrap();

        let result = UndoManager::undo_last(&s.journal);

        assert!(matches!(result, Err(UndoError::AlreadyExists(_))));
        assert_eq!(fs::read_to_string(&original).unwrap(), "newer");
        assert!(moved.exists());
        assert_eq!(s.journal.records().unwrap().len(), 1);
    }

    #[test]
    fn test_copy_undo_checks_digest() {
        let s = Setup::new();
        let copy = s.write("backup/notes.txt", "v1");
        let digest = hash_file(&copy).unwrap();
        let record = OperationRecord::new(OperationKind::Copy)
            .with_path("source", &s.path("notes.txt"))
            .with_path("target", &copy)
            .with_detail("digest", digest.to_hex());
        s.journal.append(&record).unwrap();

        fs::write(&copy, "v2, edited after the copy").unwrap();
        assert!(matches!(
            UndoManager::undo_last(&s.journal),
            Err(UndoError::TargetModified(_))
        ));
        assert!(copy.exists());
        assert_eq!(s.journal.records().unwrap().len(), 1);

        fs::write(&copy, "v1").unwrap();
        let report = UndoManager::undo_last(&s.journal).unwrap();
        assert_eq!(report.action, UndoAction::Removed(copy.clone()));
        assert!(!copy.exists());
    }

    #[test]
    fn test_copy_undo_removes_directory_tree() {
        let s = Setup::new();
        s.write("copied/nested/file.txt", "x");
        let record = OperationRecord::new(OperationKind::Copy)
            .with_path("source", &s.path("orig"))
            .with_path("target", &s.path("copied"));
        s.journal.append(&record).unwrap();

        UndoManager::undo_last(&s.journal).unwrap();
        assert!(!s.path("copied").exists());
    }

    #[test]
    fn test_rename_and_create_directory() {
        let s = Setup::new();
        fs::create_dir(s.path("empty")).unwrap();
        s.journal
            .append(
                &OperationRecord::new(OperationKind::CreateDirectory)
                    .with_path("path", s.temp_dir.path())
                    .with_detail("name", "empty"),
            )
            .unwrap();
        s.write("renamed/file.txt", "x");
        s.journal
            .append(
                &OperationRecord::new(OperationKind::RenameDirectory)
                    .with_path("parent_path", s.temp_dir.path())
                    .with_detail("old_name", "original")
                    .with_detail("new_name", "renamed"),
            )
            .unwrap();

        UndoManager::undo_last(&s.journal).unwrap();
        assert!(s.path("original/file.txt").exists());
        assert!(!s.path("renamed").exists());

        UndoManager::undo_last(&s.journal).unwrap();
        assert!(!s.path("empty").exists());
    }

    #[test]
    fn test_irreversible_and_unsupported_kinds_keep_journal() {
        let s = Setup::new();
        s.journal
            .append(&OperationRecord::new(OperationKind::Compress).with_path("path", &s.path("x")))
            .unwrap();
        assert!(matches!(
            UndoManager::undo_last(&s.journal),
            Err(UndoError::Unsupported(OperationKind::Compress))
        ));

        s.journal
            .append(&OperationRecord::new(OperationKind::Delete).with_path("path", &s.path("x")))
            .unwrap();
        assert!(matches!(
            UndoManager::undo_last(&s.journal),
            Err(UndoError::NotReversible(OperationKind::Delete))
        ));
        assert_eq!(s.journal.records().unwrap().len(), 2);

        let dropped = s.journal.discard_last().unwrap();
        assert!(matches!(
            dropped,
            Some(DiscardedTail::Record(ref r)) if r.operation == OperationKind::Delete
        ));
        assert_eq!(s.journal.records().unwrap().len(), 1);
    }

    #[test]
    fn test_encrypt_and_decrypt_records_reverse_each_other() {
        let s = Setup::new();
        let file = s.write("notes.txt", "plain text");
        let key_path = s.path("encryption.key");
        let key = FileKey::load_or_create(&key_path).unwrap();
        let record = |kind| {
            OperationRecord::new(kind)
                .with_path("file", &file)
                .with_path("key_file", &key_path)
        };

        cipher::encrypt_file(&key, &file).unwrap();
        s.journal.append(&record(OperationKind::Encrypt)).unwrap();
        cipher::decrypt_file(&key, &file).unwrap();
        s.journal.append(&record(OperationKind::Decrypt)).unwrap();

        let report = UndoManager::undo_last(&s.journal).unwrap();
        assert_eq!(report.action, UndoAction::Encrypted(file.clone()));
        assert_ne!(fs::read(&file).unwrap(), b"plain text");

        let report = UndoManager::undo_last(&s.journal).unwrap();
        assert_eq!(report.action, UndoAction::Decrypted(file.clone()));
        assert_eq!(fs::read_to_string(&file).unwrap(), "plain text");
        assert!(s.journal.is_empty().unwrap());
    }

    #[test]
    fn test_encrypt_undo_without_key_keeps_journal() {
        let s = Setup::new();
        let file = s.write("notes.txt", "plain text");
        cipher::encrypt_file(&FileKey::generate(), &file).unwrap();
        s.journal
            .append(
                &OperationRecord::new(OperationKind::Encrypt)
                    .with_path("file", &file)
                    .with_path("key_file", &s.path("gone.key")),
            )
            .unwrap();

        assert!(matches!(
            UndoManager::undo_last(&s.journal),
            Err(UndoError::Cipher(CipherError::MissingKey(_)))
        ));
        assert_eq!(s.journal.records().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_detail() {
        let s = Setup::new();
        s.journal
            .append(&OperationRecord::new(OperationKind::Move).with_detail("source", "/a"))
            .unwrap();
        assert!(matches!(
            UndoManager::undo_last(&s.journal),
            Err(UndoError::MissingDetail { key: "target", .. })
        ));
    }
}
