//! Consumer hooks into a tree mapping.

use crate::entry::Entry;
use crate::watcher::ChangeKind;
use std::path::Path;

/// Receives notifications from a [`TreeMapping`](super::TreeMapping).
///
/// Supplied once, when the mapping is built. Every method has a no-op
/// default. Callbacks run on the update worker, after the tree lock has
/// been released, so they may call back into the mapping's read API.
pub trait TreeObserver: Send + Sync {
    /// Return `false` to skip an event, e.g. for a file the consumer is
    /// about to write itself.
    fn should_process_update(&self, _path: &Path) -> bool {
        true
    }

    /// Called for every entry discovered by a scan.
    fn process_entry(&self, _entry: &Entry) {}

    /// An entry was added.
    fn on_created(&self, _entry: &Entry) {}

    /// An entry was removed.
    fn on_deleted(&self, _path: &Path) {}

    /// An entry was refreshed.
    fn on_modified(&self, _entry: &Entry) {}

    /// An entry moved from `old_path`.
    fn on_renamed(&self, _entry: &Entry, _old_path: &Path) {}

    /// Called after every processed event, including abandoned ones.
    fn after_update(&self, _kind: ChangeKind, _path: &Path, _entry: Option<&Entry>) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TreeObserver for NoopObserver {}
