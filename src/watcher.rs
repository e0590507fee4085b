//! Watching a directory and sorting files as they arrive.
//!
//! A [`DirectoryWatcher`] moves through `Idle -> Watching -> Stopped`. While
//! watching, the `notify` backend thread and any [`StopHandle`] feed one
//! channel, and the thread that called [`DirectoryWatcher::run`] handles the
//! messages one at a time: each arrival is fully moved and journaled before
//! the next message is received.

use crate::config::CompiledFilters;
use crate::file_category::CategoryClassifier;
use crate::file_organizer::{OrganizeError, Reorganizer, RetryPolicy};
use crate::journal::Journal;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch source {} is not a directory", .0.display())]
    SourceNotFound(PathBuf),

    #[error("watcher cannot start from the {0:?} state")]
    InvalidState(WatchState),

    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("filesystem notification error: {0}")]
    Notify(#[from] notify::Error),
}

/// What to watch and how to sort it.
#[derive(Debug, Clone)]
pub struct WatchSubscription {
    pub source_directory: PathBuf,
    pub target_directory: PathBuf,
    pub classifier: CategoryClassifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    Stopped,
}

enum WatchMessage {
    Fs(notify::Result<Event>),
    Stop,
}

/// Cancels a running watcher from another thread or a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    tx: Sender<WatchMessage>,
    state: Arc<Mutex<WatchState>>,
}

impl StopHandle {
    pub fn stop(&self) {
        // The loop may already be gone.
        let _ = self.tx.send(WatchMessage::Stop);
    }

    pub fn state(&self) -> WatchState {
        *self.state.lock()
    }
}

/// Counts for one watch session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    pub moved: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct DirectoryWatcher {
    source: PathBuf,
    target: PathBuf,
    organizer: Reorganizer,
    state: Arc<Mutex<WatchState>>,
    tx: Sender<WatchMessage>,
    rx: Receiver<WatchMessage>,
}

impl DirectoryWatcher {
    pub fn new(subscription: WatchSubscription, journal: Journal) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            source: subscription.source_directory,
            target: subscription.target_directory,
            organizer: Reorganizer::new(subscription.classifier, journal),
            state: Arc::new(Mutex::new(WatchState::Idle)),
            tx,
            rx,
        }
    }

    pub fn with_filters(mut self, filters: CompiledFilters) -> Self {
        self.organizer = self.organizer.with_filters(filters);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.organizer = self.organizer.with_retry(retry);
        self
    }

    pub fn state(&self) -> WatchState {
        *self.state.lock()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    fn set_state(&self, state: WatchState) {
        *self.state.lock() = state;
    }

    /// Watches until a [`StopHandle`] fires, then deregisters and returns.
    pub fn run(&mut self) -> Result<WatchSummary, WatchError> {
        let current = self.state();
        if current != WatchState::Idle {
            return Err(WatchError::InvalidState(current));
        }
        if !self.source.is_dir() {
            return Err(WatchError::SourceNotFound(self.source.clone()));
        }
        fs::create_dir_all(&self.target).map_err(|source| WatchError::Io {
            path: self.target.clone(),
            source,
        })?;

        let tx = self.tx.clone();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(WatchMessage::Fs(res));
        })?;
        watcher.watch(&self.source, RecursiveMode::NonRecursive)?;
        self.set_state(WatchState::Watching);
        tracing::info!(
            source = %self.source.display(),
            target = %self.target.display(),
            classifier = self.organizer.classifier().kind(),
            "watching for new files"
        );

        let mut summary = WatchSummary::default();
        while let Ok(message) = self.rx.recv() {
            match message {
                WatchMessage::Stop => break,
                WatchMessage::Fs(Ok(event)) => {
                    for path in arrivals(&event) {
                        self.handle_arrival(path, &mut summary);
                    }
                }
                WatchMessage::Fs(Err(e)) => tracing::warn!(error = %e, "watch backend error"),
            }
        }

        if let Err(e) = watcher.unwatch(&self.source) {
            tracing::warn!(error = %e, "failed to deregister watch");
        }
        self.set_state(WatchState::Stopped);
        tracing::info!(
            moved = summary.moved,
            skipped = summary.skipped,
            failed = summary.failed,
            "watch stopped"
        );
        Ok(summary)
    }

    fn handle_arrival(&self, path: &Path, summary: &mut WatchSummary) {
        if !path.is_file() || !self.organizer.is_eligible(path) {
            tracing::debug!(path = %path.display(), "ignoring event");
            return;
        }

        match self.organizer.relocate_arrival(path, &self.target) {
            Ok(_) => summary.moved += 1,
            Err(OrganizeError::NotFound(_)) => {
                tracing::debug!(path = %path.display(), "file vanished before it could be moved");
            }
            Err(OrganizeError::AlreadyExists(dest)) => {
                tracing::warn!(path = %path.display(), destination = %dest.display(), "destination exists, skipping");
                summary.skipped += 1;
            }
            Err(e) => {
                tracing::error!(operation = "move", path = %path.display(), error = %e, "failed to organize new file");
                summary.failed += 1;
            }
        }
    }
}

/// Paths that newly appeared in the watched directory.
fn arrivals(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => &event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1..).unwrap_or_default()
        }
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::OperationKind;
    use notify::event::{AccessKind, CreateKind};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    fn subscription(temp_dir: &TempDir) -> WatchSubscription {
        let source = temp_dir.path().join("inbox");
        fs::create_dir(&source).unwrap();
        WatchSubscription {
            source_directory: source,
            target_directory: temp_dir.path().join("sorted"),
            classifier: CategoryClassifier::default(),
        }
    }

    #[test]
    fn test_new_file_is_sorted_and_journaled() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let sub = subscription(&temp_dir);
        let source = sub.source_directory.clone();
        let expected = sub.target_directory.join("Documents").join("report.pdf");
        let journal = Journal::open(temp_dir.path().join("operations.log"));

        let mut watcher = DirectoryWatcher::new(sub, journal.clone()).with_retry(RetryPolicy {
            attempts: 5,
            delay: Duration::from_millis(50),
        });
        let stop = watcher.stop_handle();
        let worker = thread::spawn(move || watcher.run());

        assert!(wait_for(
            || stop.state() == WatchState::Watching,
            Duration::from_secs(5)
        ));
        fs::write(source.join("report.pdf"), "%PDF-1.4 test").unwrap();
        assert!(wait_for(|| expected.exists(), Duration::from_secs(10)));

        stop.stop();
        let summary = worker.join().unwrap().unwrap();
        assert_eq!(summary.moved, 1);
        assert_eq!(stop.state(), WatchState::Stopped);

        let records = journal.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, OperationKind::Move);
        assert_eq!(
            records[0].detail("target"),
            Some(expected.to_string_lossy().as_ref())
        );
    }

    #[test]
    fn test_stop_before_any_event() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let journal = Journal::open(temp_dir.path().join("operations.log"));
        let mut watcher = DirectoryWatcher::new(subscription(&temp_dir), journal.clone());

        watcher.stop_handle().stop();
        let summary = watcher.run().unwrap();

        assert_eq!(summary, WatchSummary::default());
        assert_eq!(watcher.state(), WatchState::Stopped);
        assert!(matches!(
            watcher.run(),
            Err(WatchError::InvalidState(WatchState::Stopped))
        ));
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn test_missing_source() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let sub = WatchSubscription {
            source_directory: temp_dir.path().join("missing"),
            target_directory: temp_dir.path().join("sorted"),
            classifier: CategoryClassifier::default(),
        };
        let mut watcher = DirectoryWatcher::new(sub, Journal::open(temp_dir.path().join("j.log")));

        assert!(matches!(watcher.run(), Err(WatchError::SourceNotFound(_))));
        assert_eq!(watcher.state(), WatchState::Idle);
    }

    #[test]
    fn test_arrival_event_kinds() {
        let a = PathBuf::from("/in/a.pdf");
        let b = PathBuf::from("/in/b.pdf");

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(a.clone());
        assert_eq!(arrivals(&created), &[a.clone()]);

        let renamed_in =
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path(a.clone());
        assert_eq!(arrivals(&renamed_in), &[a.clone()]);

        let renamed_within = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(a.clone())
            .add_path(b.clone());
        assert_eq!(arrivals(&renamed_within), &[b]);

        let accessed = Event::new(EventKind::Access(AccessKind::Any)).add_path(a);
        assert!(arrivals(&accessed).is_empty());
    }
}
