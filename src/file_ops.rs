//! Simple journaled file operations behind the CLI's utility commands.
//!
//! Every operation that changes the filesystem appends one record to the
//! journal after it succeeds, and none of them overwrite an existing path.

use crate::cipher::{self, FileKey};
use crate::file_category::{CategoryLabel, FileMetadata};
use crate::file_organizer::{OrganizeError, OrganizeReport, OrganizeResult, Relocation, move_file};
use crate::hasher::hash_file;
use crate::journal::{Journal, OperationKind, OperationRecord};
use chrono::{DateTime, Local};
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of a [`FileOps::batch_rename`] run.
#[derive(Debug, Default)]
pub struct RenameReport {
    pub renamed: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<(PathBuf, String)>,
}

/// What [`view_metadata`] reports about a single file.
#[derive(Debug, Clone)]
pub struct FileDetails {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Local>,
    pub media_type: String,
    pub encrypted: bool,
}

pub struct FileOps {
    journal: Journal,
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> OrganizeError + '_ {
    move |e| OrganizeError::from_io(path, e)
}

/// Resolves `dest` the way `mv` and `cp` do: into it when it is a directory.
fn resolve_destination(source: &Path, dest: &Path) -> OrganizeResult<PathBuf> {
    if !source.exists() {
        return Err(OrganizeError::NotFound(source.to_path_buf()));
    }
    let resolved = match source.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest.to_path_buf(),
    };
    if resolved.exists() {
        return Err(OrganizeError::AlreadyExists(resolved));
    }
    Ok(resolved)
}

fn copy_tree(source: &Path, target: &Path) -> OrganizeResult<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| OrganizeError::Io {
            path: e.path().unwrap_or(source).to_path_buf(),
            source: e.into(),
        })?;
        let rel = entry.path().strip_prefix(source).unwrap_or(Path::new(""));
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(io(&dest))?;
        } else {
            fs::copy(entry.path(), &dest).map_err(io(&dest))?;
        }
    }
    Ok(())
}

impl FileOps {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }

    fn record(&self, record: OperationRecord) -> OrganizeResult<()> {
        tracing::info!(operation = %record.operation, details = ?record.details, "operation complete");
        self.journal.append(&record)?;
        Ok(())
    }

    /// Moves a file or directory. Returns the final path.
    pub fn move_path(&self, source: &Path, dest: &Path) -> OrganizeResult<PathBuf> {
        let target = resolve_destination(source, dest)?;
        move_file(source, &target)?;
        self.record(OperationRecord::moved(source, &target))?;
        Ok(target)
    }

    /// Copies a file or directory tree. File copies record the content
    /// digest so undo can tell whether the copy was edited since.
    pub fn copy_path(&self, source: &Path, dest: &Path) -> OrganizeResult<PathBuf> {
        let target = resolve_destination(source, dest)?;
        let mut record = OperationRecord::new(OperationKind::Copy)
            .with_path("source", source)
            .with_path("target", &target);

        if source.is_dir() {
            if let Err(e) = copy_tree(source, &target) {
                tracing::warn!(target = %target.display(), error = %e, "directory copy failed, removing partial copy");
                if let Err(cleanup) = fs::remove_dir_all(&target) {
                    tracing::error!(target = %target.display(), error = %cleanup, "failed to remove partial copy");
                }
                return Err(e);
            }
        } else {
            fs::copy(source, &target).map_err(io(&target))?;
            let digest = hash_file(&target).map_err(io(&target))?;
            record = record.with_detail("digest", digest.to_hex());
        }
        self.record(record)?;
        Ok(target)
    }

    /// Deletes a file or directory tree. This cannot be undone.
    pub fn delete_path(&self, path: &Path) -> OrganizeResult<()> {
        let meta = fs::symlink_metadata(path).map_err(io(path))?;
        if meta.is_dir() {
            fs::remove_dir_all(path).map_err(io(path))?;
        } else {
            fs::remove_file(path).map_err(io(path))?;
        }
        self.record(OperationRecord::new(OperationKind::Delete).with_path("path", path))
    }

    pub fn create_directory(&self, parent: &Path, name: &str) -> OrganizeResult<PathBuf> {
        let dir = parent.join(name);
        if dir.exists() {
            return Err(OrganizeError::AlreadyExists(dir));
        }
        fs::create_dir_all(&dir).map_err(io(&dir))?;
        self.record(
            OperationRecord::new(OperationKind::CreateDirectory)
                .with_path("path", parent)
                .with_detail("name", name),
        )?;
        Ok(dir)
    }

    pub fn delete_directory(&self, dir: &Path) -> OrganizeResult<()> {
        if !dir.is_dir() {
            return Err(OrganizeError::NotFound(dir.to_path_buf()));
        }
        fs::remove_dir_all(dir).map_err(io(dir))?;
        self.record(OperationRecord::new(OperationKind::DeleteDirectory).with_path("path", dir))
    }

    pub fn rename_directory(&self, parent: &Path, old_name: &str, new_name: &str) -> OrganizeResult<PathBuf> {
        let old = parent.join(old_name);
        let new = parent.join(new_name);
        if !old.is_dir() {
            return Err(OrganizeError::NotFound(old));
        }
        if new.exists() {
            return Err(OrganizeError::AlreadyExists(new));
        }
        fs::rename(&old, &new).map_err(io(&old))?;
        self.record(
            OperationRecord::new(OperationKind::RenameDirectory)
                .with_path("parent_path", parent)
                .with_detail("old_name", old_name)
                .with_detail("new_name", new_name),
        )?;
        Ok(new)
    }

    /// Encrypts `path` in place with the key at `key_path`, creating the key
    /// on first use. Undo decrypts it again with the same key file.
    pub fn encrypt_file(&self, path: &Path, key_path: &Path) -> OrganizeResult<()> {
        if !path.is_file() {
            return Err(OrganizeError::NotFound(path.to_path_buf()));
        }
        let key = FileKey::load_or_create(key_path)?;
        cipher::encrypt_file(&key, path)?;
        self.record(
            OperationRecord::new(OperationKind::Encrypt)
                .with_path("file", path)
                .with_path("key_file", key_path),
        )
    }

    pub fn decrypt_file(&self, path: &Path, key_path: &Path) -> OrganizeResult<()> {
        if !path.is_file() {
            return Err(OrganizeError::NotFound(path.to_path_buf()));
        }
        let key = FileKey::load(key_path)?;
        cipher::decrypt_file(&key, path)?;
        self.record(
            OperationRecord::new(OperationKind::Decrypt)
                .with_path("file", path)
                .with_path("key_file", key_path),
        )
    }

    /// Renames the files directly inside `dir` by replacing every match of
    /// `pattern` in their names with `replacement`.
    ///
    /// One `batch_rename` summary record is written first, followed by a
    /// `move` record per renamed file so each rename undoes on its own.
    pub fn batch_rename(&self, dir: &Path, pattern: &str, replacement: &str) -> OrganizeResult<RenameReport> {
        let regex = Regex::new(pattern)?;
        if !dir.is_dir() {
            return Err(OrganizeError::NotFound(dir.to_path_buf()));
        }

        let mut planned = Vec::new();
        for entry in fs::read_dir(dir).map_err(io(dir))? {
            let entry = entry.map_err(io(dir))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let renamed = regex.replace_all(&name, replacement);
            if renamed != name && !renamed.is_empty() {
                planned.push((entry.path(), dir.join(&*renamed)));
            }
        }
        planned.sort();

        let mut report = RenameReport::default();
        if planned.is_empty() {
            return Ok(report);
        }
        self.record(
            OperationRecord::new(OperationKind::BatchRename)
                .with_path("directory", dir)
                .with_detail("pattern", pattern)
                .with_detail("replacement", replacement)
                .with_detail("files", planned.len().to_string()),
        )?;

        for (from, to) in planned {
            match move_file(&from, &to) {
                Ok(()) => {
                    self.record(OperationRecord::moved(&from, &to))?;
                    report.renamed.push((from, to));
                }
                Err(e) => {
                    tracing::warn!(path = %from.display(), error = %e, "rename skipped");
                    report.skipped.push((from, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Moves the files directly inside `source` into `target/YYYY-MM-DD/`
    /// folders named after each file's local modification date.
    pub fn sort_by_date(&self, source: &Path, target: &Path) -> OrganizeResult<OrganizeReport> {
        if !source.is_dir() {
            return Err(OrganizeError::NotFound(source.to_path_buf()));
        }
        let mut files: Vec<PathBuf> = fs::read_dir(source)
            .map_err(io(source))?
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        files.sort();

        let mut report = OrganizeReport::default();
        for file in files {
            match self.move_by_date(&file, target) {
                Ok(relocation) => report.moved.push(relocation),
                Err(OrganizeError::AlreadyExists(dest)) => {
                    report
                        .skipped
                        .push((file, format!("{} already exists", dest.display())));
                }
                Err(e @ OrganizeError::Journal(_)) => return Err(e),
                Err(e) => {
                    tracing::error!(operation = "move", path = %file.display(), error = %e, "failed to sort file by date");
                    report.failed.push((file, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn move_by_date(&self, file: &Path, target: &Path) -> OrganizeResult<Relocation> {
        let modified = fs::metadata(file)
            .and_then(|m| m.modified())
            .map_err(io(file))?;
        let day = DateTime::<Local>::from(modified).format("%Y-%m-%d").to_string();
        let folder = target.join(&day);
        fs::create_dir_all(&folder).map_err(io(&folder))?;

        let name = file
            .file_name()
            .ok_or_else(|| OrganizeError::NotFound(file.to_path_buf()))?;
        let destination = folder.join(name);
        move_file(file, &destination)?;
        self.record(OperationRecord::moved(file, &destination))?;

        Ok(Relocation {
            source: file.to_path_buf(),
            target: destination,
            label: CategoryLabel::new(day),
        })
    }
}

/// Size, modification time and sniffed media type of a file. Read-only, so
/// nothing is journaled.
pub fn view_metadata(path: &Path) -> OrganizeResult<FileDetails> {
    let meta = fs::metadata(path).map_err(io(path))?;
    if !meta.is_file() {
        return Err(OrganizeError::NotFound(path.to_path_buf()));
    }
    let modified = meta.modified().map_err(io(path))?;
    let sniffed = FileMetadata::from_path(path).map_err(io(path))?;

    let mut header = Vec::new();
    File::open(path)
        .and_then(|f| f.take(cipher::HEADER_LEN as u64).read_to_end(&mut header))
        .map_err(io(path))?;

    Ok(FileDetails {
        path: path.to_path_buf(),
        size_bytes: meta.len(),
        modified: DateTime::<Local>::from(modified),
        media_type: sniffed.media_type,
        encrypted: cipher::is_encrypted(&header),
    })
}

/// Returns the first `lines` lines of a text file, newlines included.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn preview_file(path: &Path, lines: usize) -> OrganizeResult<String> {
    let mut reader = BufReader::new(File::open(path).map_err(io(path))?);
    let mut preview = Vec::new();
    for _ in 0..lines {
        if reader.read_until(b'\n', &mut preview).map_err(io(path))? == 0 {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&preview).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::undo::{UndoError, UndoManager};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileOps, Journal) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let journal = Journal::open(temp_dir.path().join("operations.log"));
        (temp_dir, FileOps::new(journal.clone()), journal)
    }

    #[test]
    fn test_move_into_directory_and_undo() {
        let (temp_dir, ops, journal) = setup();
        let file = temp_dir.path().join("a.txt");
        let dest = temp_dir.path().join("archive");
        fs::write(&file, "a").unwrap();
        fs::create_dir(&dest).unwrap();

        let moved = ops.move_path(&file, &dest).unwrap();
        assert_eq!(moved, dest.join("a.txt"));
        assert!(!file.exists());

        UndoManager::undo_last(&journal).unwrap();
        assert!(file.exists());
    }

    #[test]
    fn test_copy_records_digest() {
        let (temp_dir, ops, journal) = setup();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, "content").unwrap();

        let copy = ops.copy_path(&file, &temp_dir.path().join("b.txt")).unwrap();
        let record = journal.last().unwrap().unwrap();
        assert_eq!(record.operation, OperationKind::Copy);
        assert_eq!(
            record.detail("digest"),
            Some(hash_file(&file).unwrap().to_hex().as_str())
        );

        assert!(matches!(
            ops.copy_path(&file, &copy),
            Err(OrganizeError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_copy_directory_tree() {
        let (temp_dir, ops, _) = setup();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("deep")).unwrap();
        fs::write(src.join("deep/x.txt"), "x").unwrap();

        let copy = ops.copy_path(&src, &temp_dir.path().join("dst")).unwrap();
        assert_eq!(fs::read_to_string(copy.join("deep/x.txt")).unwrap(), "x");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_directory_copy_leaves_nothing_behind() {
        let (temp_dir, ops, journal) = setup();
        let tree = temp_dir.path().join("tree");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("sub/a.txt"), "a").unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("gone"), tree.join("dangling")).unwrap();

        let target = temp_dir.path().join("tree-copy");
        assert!(ops.copy_path(&tree, &target).is_err());

        assert!(!target.exists());
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn test_delete_is_journaled_but_not_undoable() {
        let (temp_dir, ops, journal) = setup();
        let file = temp_dir.path().join("gone.txt");
        fs::write(&file, "bye").unwrap();

        ops.delete_path(&file).unwrap();
        assert!(!file.exists());
        assert!(matches!(
            UndoManager::undo_last(&journal),
            Err(UndoError::NotReversible(OperationKind::Delete))
        ));
    }

    #[test]
    fn test_directory_lifecycle() {
        let (temp_dir, ops, journal) = setup();
        let root = temp_dir.path();

        let created = ops.create_directory(root, "projects").unwrap();
        assert!(created.is_dir());
        assert!(matches!(
            ops.create_directory(root, "projects"),
            Err(OrganizeError::AlreadyExists(_))
        ));

        let renamed = ops.rename_directory(root, "projects", "work").unwrap();
        assert!(renamed.is_dir());
        assert!(!created.exists());

        UndoManager::undo_last(&journal).unwrap();
        assert!(created.is_dir());
        UndoManager::undo_last(&journal).unwrap();
        assert!(!created.exists());

        fs::create_dir(root.join("old")).unwrap();
        ops.delete_directory(&root.join("old")).unwrap();
        assert!(!root.join("old").exists());
        assert_eq!(
            journal.last().unwrap().unwrap().operation,
            OperationKind::DeleteDirectory
        );
    }

    #[test]
    fn test_batch_rename() {
        let (temp_dir, ops, journal) = setup();
        let dir = temp_dir.path().join("photos");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("IMG_001.jpg"), "1").unwrap();
        fs::write(dir.join("IMG_002.jpg"), "2").unwrap();
        fs::write(dir.join("notes.txt"), "n").unwrap();

        let report = ops.batch_rename(&dir, "^IMG_", "holiday_").unwrap();

        assert_eq!(report.renamed.len(), 2);
        assert!(dir.join("holiday_001.jpg").exists());
        assert!(dir.join("notes.txt").exists());

        let records = journal.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].operation, OperationKind::BatchRename);
        assert_eq!(records[0].detail("files"), Some("2"));
        assert_eq!(records[2].operation, OperationKind::Move);

        UndoManager::undo_last(&journal).unwrap();
        assert!(dir.join("IMG_002.jpg").exists());
        assert!(dir.join("holiday_001.jpg").exists());
    }

    #[test]
    fn test_batch_rename_rejects_bad_pattern() {
        let (temp_dir, ops, journal) = setup();
        assert!(matches!(
            ops.batch_rename(temp_dir.path(), "(", "x"),
            Err(OrganizeError::InvalidPattern(_))
        ));
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn test_sort_by_date() {
        let (temp_dir, ops, journal) = setup();
        let source = temp_dir.path().join("camera");
        let target = temp_dir.path().join("by-date");
        fs::create_dir(&source).unwrap();
        let file = source.join("clip.mov");
        fs::write(&file, "frames").unwrap();

        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(when)
            .unwrap();
        let day = DateTime::<Local>::from(when).format("%Y-%m-%d").to_string();

        let report = ops.sort_by_date(&source, &target).unwrap();

        assert_eq!(report.moved.len(), 1);
        assert_eq!(report.moved[0].label.as_str(), day);
        assert!(target.join(&day).join("clip.mov").exists());
        assert_eq!(journal.records().unwrap().len(), 1);
    }

    #[test]
    fn test_encrypt_is_journaled_and_undone() {
        let (temp_dir, ops, journal) = setup();
        let file = temp_dir.path().join("tax.pdf");
        let key_path = temp_dir.path().join("encryption.key");
        fs::write(&file, "%PDF-1.4 return").unwrap();

        ops.encrypt_file(&file, &key_path).unwrap();

        assert!(key_path.exists());
        assert!(view_metadata(&file).unwrap().encrypted);
        let record = journal.last().unwrap().unwrap();
        assert_eq!(record.operation, OperationKind::Encrypt);
        assert_eq!(record.detail("file"), file.to_str());

        UndoManager::undo_last(&journal).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "%PDF-1.4 return");
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn test_decrypt_needs_an_existing_key() {
        let (temp_dir, ops, journal) = setup();
        let file = temp_dir.path().join("tax.pdf");
        fs::write(&file, "secret").unwrap();

        let result = ops.decrypt_file(&file, &temp_dir.path().join("missing.key"));

        assert!(matches!(
            result,
            Err(OrganizeError::Cipher(cipher::CipherError::MissingKey(_)))
        ));
        assert_eq!(fs::read_to_string(&file).unwrap(), "secret");
        assert!(journal.is_empty().unwrap());
        assert!(matches!(
            ops.encrypt_file(&temp_dir.path().join("nope"), &temp_dir.path().join("k")),
            Err(OrganizeError::NotFound(_))
        ));
    }

    #[test]
    fn test_view_metadata() {
        let (temp_dir, _, journal) = setup();
        let file = temp_dir.path().join("image.png");
        fs::write(&file, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();

        let details = view_metadata(&file).unwrap();

        assert_eq!(details.size_bytes, 10);
        assert_eq!(details.media_type, "image/png");
        assert!(!details.encrypted);
        assert!(journal.is_empty().unwrap());
        assert!(matches!(
            view_metadata(temp_dir.path()),
            Err(OrganizeError::NotFound(_))
        ));
    }

    #[test]
    fn test_preview_file() {
        let (temp_dir, _, _) = setup();
        let file = temp_dir.path().join("log.txt");
        fs::write(&file, b"one\ntwo\nthr\xffee\nfour\n").unwrap();

        assert_eq!(preview_file(&file, 2).unwrap(), "one\ntwo\n");
        assert_eq!(preview_file(&file, 3).unwrap(), "one\ntwo\nthr\u{fffd}ee\n");
        assert_eq!(preview_file(&file, 10).unwrap().lines().count(), 4);
        assert_eq!(preview_file(&file, 0).unwrap(), "");
    }
}
