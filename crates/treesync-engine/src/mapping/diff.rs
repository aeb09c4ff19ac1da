//! Accumulated net changes between flushes.

use crate::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Net changes to the tree since the last flush.
///
/// A path is never both deleted and replaced: recording one removes the
/// other. `replace` is keyed by directory and `delete` is a set, so the diff
/// never grows past the size of the tree it describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingDiff {
    /// Directory keys that no longer exist
    pub delete: BTreeSet<PathBuf>,
    /// Directory keys whose child list changed, with the new list
    pub replace: BTreeMap<PathBuf, Vec<Entry>>,
}

impl PendingDiff {
    /// Whether nothing has changed.
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.replace.is_empty()
    }

    /// Number of paths mentioned by the diff.
    pub fn len(&self) -> usize {
        self.delete.len() + self.replace.len()
    }

    pub(crate) fn record_delete(&mut self, path: PathBuf) {
        self.replace.remove(&path);
        self.delete.insert(path);
    }

    pub(crate) fn record_replace(&mut self, path: PathBuf, entries: Vec<Entry>) {
        self.delete.remove(&path);
        self.replace.insert(path, entries);
    }
}
