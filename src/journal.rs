//! Append-only operation journal.
//!
//! Every mutating operation appends one JSON record per line to a flat log
//! file. The physical last line is always the most recently completed
//! operation, which is what single-step undo consumes.
//!
//! A [`Journal`] is a cheap, cloneable handle. All clones share one in-process
//! mutex, and each write additionally takes an exclusive advisory lock on the
//! file itself, so a watcher thread and a foreground command can append
//! concurrently without producing a torn line.
//!
//! # Record format
//!
//! ```text
//! {"operation":"move","details":{"source":"/in/a.pdf","target":"/out/Documents/a.pdf"},"timestamp":"2025-01-01T10:00:00+00:00"}
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// The kind of a recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Move,
    Copy,
    Delete,
    CreateDirectory,
    DeleteDirectory,
    RenameDirectory,
    CreateTextFile,
    CreateVideoFile,
    CreateWordFile,
    Compress,
    Decompress,
    Encrypt,
    Decrypt,
    BatchRename,
}

impl OperationKind {
    /// Returns the name used for this kind in the journal file.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Move => "move",
            OperationKind::Copy => "copy",
            OperationKind::Delete => "delete",
            OperationKind::CreateDirectory => "create_directory",
            OperationKind::DeleteDirectory => "delete_directory",
            OperationKind::RenameDirectory => "rename_directory",
            OperationKind::CreateTextFile => "create_text_file",
            OperationKind::CreateVideoFile => "create_video_file",
            OperationKind::CreateWordFile => "create_word_file",
            OperationKind::Compress => "compress",
            OperationKind::Decompress => "decompress",
            OperationKind::Encrypt => "encrypt",
            OperationKind::Decrypt => "decrypt",
            OperationKind::BatchRename => "batch_rename",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journaled operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: OperationKind,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    /// RFC 3339 time the operation completed. Older journals omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl OperationRecord {
    /// Creates a record of the given kind stamped with the current time.
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            details: BTreeMap::new(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Adds a detail entry.
    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Adds a path-valued detail entry. Relative paths are made absolute
    /// against the current directory so undo works from anywhere.
    pub fn with_path(self, key: &str, path: &Path) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.with_detail(key, path.to_string_lossy().into_owned())
    }

    /// Builds the record for a relocation from `source` to `target`.
    pub fn moved(source: &Path, target: &Path) -> Self {
        Self::new(OperationKind::Move)
            .with_path("source", source)
            .with_path("target", target)
    }

    /// Looks up a detail entry.
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

/// Errors raised while reading or writing the journal file.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed journal record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("failed to serialize journal record: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type JournalResult<T> = Result<T, JournalError>;

/// Handle to the journal file.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl Journal {
    /// Creates a handle for the journal at `path`. The file itself is created
    /// lazily on the first append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self) -> impl Fn(io::Error) -> JournalError + '_ {
        move |source| JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Appends `record` as the new last line of the journal.
    pub fn append(&self, record: &OperationRecord) -> JournalResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(self.io_error())?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(self.io_error())?;
        let mut file_lock = fd_lock::RwLock::new(file);
        let mut handle = file_lock.write().map_err(self.io_error())?;
        if !ends_with_newline(&mut *handle).map_err(self.io_error())? {
            tracing::warn!(journal = %self.path.display(), "journal ends in a partial line, starting a new one");
            line.insert(0, '\n');
        }
        handle.write_all(line.as_bytes()).map_err(self.io_error())?;
        handle.flush().map_err(self.io_error())?;

        tracing::debug!(operation = %record.operation, journal = %self.path.display(), "journal append");
        Ok(())
    }

    /// Reads every record in append order.
    pub fn records(&self) -> JournalResult<Vec<OperationRecord>> {
        let _guard = self.lock.lock();
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error()(e)),
        };
        parse_lines(&content)
            .into_iter()
            .map(|(line, text)| parse_record(line, text))
            .collect()
    }

    /// Returns the most recent record, if any.
    pub fn last(&self) -> JournalResult<Option<OperationRecord>> {
        Ok(self.records()?.pop())
    }

    pub fn is_empty(&self) -> JournalResult<bool> {
        Ok(self.records()?.is_empty())
    }

    /// Runs `f` on the last record while holding the journal exclusively and
    /// removes that record only if `f` succeeds.
    ///
    /// Returns `Ok(None)` without calling `f` when the journal is empty. The
    /// rewrite is not atomic across a process crash.
    pub fn pop_last_with<T, E, F>(&self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&OperationRecord) -> Result<T, E>,
        E: From<JournalError>,
    {
        self.take_tail(|line, text| {
            let record = parse_record(line, text)?;
            let value = f(&record)?;
            tracing::debug!(operation = %record.operation, journal = %self.path.display(), "journal tail removed");
            Ok(value)
        })
    }

    /// Drops the last line without reversing it. A tail that does not parse,
    /// such as a line cut short by a crash, is dropped too.
    pub fn discard_last(&self) -> JournalResult<Option<DiscardedTail>> {
        self.take_tail(|line, text| {
            Ok(match parse_record(line, text) {
                Ok(record) => DiscardedTail::Record(record),
                Err(e) => {
                    tracing::warn!(journal = %self.path.display(), error = %e, "discarding unreadable journal tail");
                    DiscardedTail::Unreadable(text.to_string())
                }
            })
        })
    }

    /// Locks the journal, hands the last non-blank line to `f`, and rewrites
    /// the file without it if `f` succeeds.
    fn take_tail<T, E, F>(&self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(usize, &str) -> Result<T, E>,
        E: From<JournalError>,
    {
        let _guard = self.lock.lock();

        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error()(e).into()),
        };
        let mut file_lock = fd_lock::RwLock::new(file);
        let mut handle = file_lock.write().map_err(self.io_error())?;

        let mut content = String::new();
        handle
            .read_to_string(&mut content)
            .map_err(self.io_error())?;

        let lines = parse_lines(&content);
        let Some(&(line_no, text)) = lines.last() else {
            return Ok(None);
        };

        let value = f(line_no, text)?;

        let mut remaining = String::new();
        for (_, text) in &lines[..lines.len() - 1] {
            remaining.push_str(text);
            remaining.push('\n');
        }
        rewrite(&mut *handle, &remaining).map_err(self.io_error())?;
        Ok(Some(value))
    }
}

/// What [`Journal::discard_last`] removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardedTail {
    Record(OperationRecord),
    /// Raw text of a tail line that could not be parsed.
    Unreadable(String),
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn rewrite(file: &mut File, content: &str) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(content.as_bytes())?;
    file.flush()
}

/// Splits the journal into `(1-based line number, text)` pairs, skipping blank lines.
fn parse_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(idx, text)| (idx + 1, text))
        .collect()
}

fn parse_record(line: usize, text: &str) -> JournalResult<OperationRecord> {
    serde_json::from_str(text).map_err(|e| JournalError::Malformed {
        line,
        reason: e.to_string(),
    })
}
