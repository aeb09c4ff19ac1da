//! Reduces raw watcher batches to canonical, safely ordered events.
//!
//! A native batch can name one path several times and can contradict itself
//! (a file created and removed before the batch was delivered). The
//! coalescer folds a batch into at most one event per path and orders the
//! result so parents are applied before their children.

use crate::entry::{is_vcs_path, is_within};
use crate::watcher::{ChangeKind, RawChange};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One deduplicated change, ready to be applied to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    /// Kind of change
    pub kind: ChangeKind,
    /// Affected path (the new path for renames)
    pub path: PathBuf,
    /// Previous path, for renames
    pub old_path: Option<PathBuf>,
}

impl CanonicalEvent {
    /// An event for a single path.
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
        }
    }

    /// A rename event.
    pub fn renamed(path: impl Into<PathBuf>, old_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Renamed,
            path: path.into(),
            old_path: Some(old_path.into()),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Suppressed,
    Pending(CanonicalEvent),
}

/// Folds raw batches into canonical events.
#[derive(Debug, Clone, Default)]
pub struct EventCoalescer {
    ignored: Vec<PathBuf>,
}

impl EventCoalescer {
    /// Create a coalescer dropping changes under the given prefixes.
    pub fn new(ignored: Vec<PathBuf>) -> Self {
        Self { ignored }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        is_vcs_path(path) || self.ignored.iter().any(|prefix| is_within(path, prefix))
    }

    /// Coalesce one batch. The result is sorted shallowest path first.
    pub fn coalesce(&self, batch: &[RawChange]) -> Vec<CanonicalEvent> {
        let mut table = Table::default();

        for change in batch {
            let from = change.from_path();

            match change.kind {
                ChangeKind::Renamed => {
                    let to = change.to_path();
                    match (self.is_ignored(&from), self.is_ignored(&to)) {
                        (true, true) => {}
                        (true, false) => table.record(CanonicalEvent::new(ChangeKind::Created, to)),
                        (false, true) => {
                            table.record(CanonicalEvent::new(ChangeKind::Deleted, from))
                        }
                        (false, false) => {
                            // A chained rename moves the original source along.
                            let origin = table.rename_origin(&from).unwrap_or_else(|| from.clone());
                            table.suppress(from);
                            if origin == to {
                                table.record(CanonicalEvent::new(ChangeKind::Created, to));
                            } else {
                                table.record(CanonicalEvent::renamed(to, origin));
                            }
                        }
                    }
                }
                kind if !self.is_ignored(&from) => {
                    table.record(CanonicalEvent::new(kind, from));
                }
                _ => {}
            }
        }

        let events = table.into_sorted();
        debug!(raw = batch.len(), canonical = events.len(), "Coalesced batch");
        events
    }
}

/// Per-path latest-event table, remembering first-seen order.
#[derive(Default)]
struct Table {
    order: Vec<PathBuf>,
    slots: HashMap<PathBuf, Slot>,
}

impl Table {
    fn suppress(&mut self, path: PathBuf) {
        if self.slots.insert(path.clone(), Slot::Suppressed).is_none() {
            self.order.push(path);
        }
    }

    /// Old path of a rename still pending at `path`.
    fn rename_origin(&self, path: &Path) -> Option<PathBuf> {
        match self.slots.get(path) {
            Some(Slot::Pending(CanonicalEvent {
                kind: ChangeKind::Renamed,
                old_path: Some(old_path),
                ..
            })) => Some(old_path.clone()),
            _ => None,
        }
    }

    fn record(&mut self, event: CanonicalEvent) {
        let Some(slot) = self.slots.get_mut(&event.path) else {
            self.order.push(event.path.clone());
            self.slots.insert(event.path.clone(), Slot::Pending(event));
            return;
        };

        let merged = match slot {
            // The path exists again after a cancel or after being renamed away.
            Slot::Suppressed => match event.kind {
                ChangeKind::Created | ChangeKind::Renamed => Slot::Pending(event),
                _ => return,
            },
            Slot::Pending(existing) => match (existing.kind, event.kind) {
                (ChangeKind::Created, ChangeKind::Deleted) => Slot::Suppressed,
                (ChangeKind::Modified, ChangeKind::Deleted)
                | (ChangeKind::Deleted, ChangeKind::Created)
                | (_, ChangeKind::Renamed) => Slot::Pending(event),
                _ => return,
            },
        };
        *slot = merged;
    }

    fn into_sorted(mut self) -> Vec<CanonicalEvent> {
        let mut events: Vec<_> = self
            .order
            .iter()
            .filter_map(|path| match self.slots.remove(path) {
                Some(Slot::Pending(event)) => Some(event),
                _ => None,
            })
            .collect();

        events.sort_by_key(|event| event.path.as_os_str().len());
        events
    }
}
