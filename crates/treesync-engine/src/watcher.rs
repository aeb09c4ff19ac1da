//! Native file system watcher transport.
//!
//! Uses FSEvents on macOS and inotify on Linux through `notify`, debounced
//! by `notify-debouncer-full`, which also stitches rename pairs. Each call to
//! [`WatchSource::start_watch`] returns its own subscription channel;
//! dropping the subscription stops the OS watch.

use crate::entry::is_within;
use crate::SyncError;
use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// File change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Entry was created
    Created,
    /// Entry was modified
    Modified,
    /// Entry was deleted
    Deleted,
    /// Entry was renamed (old path kept on the change)
    Renamed,
}

/// One raw notification as delivered by the native watcher.
///
/// For everything except renames, `from` and `to` name the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    /// Kind of change
    pub kind: ChangeKind,
    /// Directory of the source path
    pub from_dir: PathBuf,
    /// File name of the source path
    pub from_file: OsString,
    /// Directory of the destination path
    pub to_dir: PathBuf,
    /// File name of the destination path
    pub to_file: OsString,
}

impl RawChange {
    /// A change affecting a single path.
    pub fn new(kind: ChangeKind, path: &Path) -> Self {
        let (dir, file) = split_path(path);
        Self {
            kind,
            from_dir: dir.clone(),
            from_file: file.clone(),
            to_dir: dir,
            to_file: file,
        }
    }

    /// A rename from `from` to `to`.
    pub fn renamed(from: &Path, to: &Path) -> Self {
        let (from_dir, from_file) = split_path(from);
        let (to_dir, to_file) = split_path(to);
        Self {
            kind: ChangeKind::Renamed,
            from_dir,
            from_file,
            to_dir,
            to_file,
        }
    }

    /// Full source path.
    pub fn from_path(&self) -> PathBuf {
        join_path(&self.from_dir, &self.from_file)
    }

    /// Full destination path.
    pub fn to_path(&self) -> PathBuf {
        join_path(&self.to_dir, &self.to_file)
    }
}

fn split_path(path: &Path) -> (PathBuf, OsString) {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_os_string()),
        _ => (path.to_path_buf(), OsString::new()),
    }
}

fn join_path(dir: &Path, file: &OsString) -> PathBuf {
    if file.is_empty() {
        dir.to_path_buf()
    } else {
        dir.join(file)
    }
}

/// Message delivered on a watch subscription.
#[derive(Debug, Clone)]
pub enum WatchMessage {
    /// A batch of raw changes, in arrival order
    Batch(Vec<RawChange>),
    /// The watcher reported a failure
    Error(String),
}

/// A private channel of watcher messages for one watched root.
pub struct WatchSubscription {
    rx: mpsc::Receiver<WatchMessage>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl WatchSubscription {
    /// Wrap a channel fed by something other than the native watcher.
    pub fn from_channel(rx: mpsc::Receiver<WatchMessage>) -> Self {
        Self { rx, _guard: None }
    }

    /// Receive the next message. `None` once the watcher is gone.
    pub async fn recv(&mut self) -> Option<WatchMessage> {
        self.rx.recv().await
    }

    /// Stop watching.
    pub fn stop(self) {
        drop(self);
    }
}

/// Starts watches on behalf of a tree mapping.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Watch `path` recursively. Changes under `ignored` may be filtered early.
    async fn start_watch(
        &self,
        path: &Path,
        ignored: &[PathBuf],
    ) -> Result<WatchSubscription, SyncError>;
}

/// Options for the native watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Debounce duration
    pub debounce_duration: Duration,
    /// Capacity of the subscription channel, in batches
    pub channel_capacity: usize,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(200),
            channel_capacity: 1000,
        }
    }
}

/// [`WatchSource`] backed by `notify-debouncer-full`.
#[derive(Debug, Clone, Default)]
pub struct NotifyWatchSource {
    options: WatcherOptions,
}

impl NotifyWatchSource {
    /// Create a watch source.
    pub fn new(options: WatcherOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl WatchSource for NotifyWatchSource {
    async fn start_watch(
        &self,
        path: &Path,
        ignored: &[PathBuf],
    ) -> Result<WatchSubscription, SyncError> {
        let path = path
            .canonicalize()
            .map_err(|_| SyncError::NotFound(path.to_path_buf()))?;

        let (tx, rx) = mpsc::channel(self.options.channel_capacity.max(1));
        let ignored = ignored.to_vec();

        let mut debouncer = new_debouncer(
            self.options.debounce_duration,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    let batch: Vec<_> = events
                        .iter()
                        .filter_map(|event| convert_event(&event.event))
                        .filter(|change| !is_ignored_change(change, &ignored))
                        .collect();

                    if batch.is_empty() {
                        return;
                    }
                    if tx.blocking_send(WatchMessage::Batch(batch)).is_err() {
                        debug!("Watch subscription dropped, discarding batch");
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Watcher error");
                        let _ = tx.blocking_send(WatchMessage::Error(e.to_string()));
                    }
                }
            },
        )?;

        debouncer
            .watch(&path, RecursiveMode::Recursive)
            .map_err(|e: notify::Error| SyncError::Watcher(e.to_string()))?;

        info!(path = ?path, "Started watching");

        Ok(WatchSubscription {
            rx,
            _guard: Some(Box::new(debouncer)),
        })
    }
}

/// Renames always pass through so the coalescer can degrade them.
fn is_ignored_change(change: &RawChange, ignored: &[PathBuf]) -> bool {
    change.kind != ChangeKind::Renamed
        && ignored
            .iter()
            .any(|prefix| is_within(&change.from_path(), prefix))
}

/// Convert a notify Event to a raw change.
fn convert_event(event: &Event) -> Option<RawChange> {
    let first = event.paths.first()?;

    let change = match &event.kind {
        EventKind::Create(_) => RawChange::new(ChangeKind::Created, first),
        EventKind::Remove(_) => RawChange::new(ChangeKind::Deleted, first),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let to = event.paths.get(1)?;
            RawChange::renamed(first, to)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            RawChange::new(ChangeKind::Deleted, first)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            RawChange::new(ChangeKind::Created, first)
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Unpaired rename: the path's presence tells which side we saw.
            let kind = if first.symlink_metadata().is_ok() {
                ChangeKind::Created
            } else {
                ChangeKind::Deleted
            };
            RawChange::new(kind, first)
        }
        EventKind::Modify(_) => RawChange::new(ChangeKind::Modified, first),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
    };

    debug!(path = ?first, kind = ?change.kind, "Raw change detected");

    Some(change)
}
