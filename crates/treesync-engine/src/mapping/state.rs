//! Tree and pending diff, mutated together under one lock.

use super::PendingDiff;
use crate::entry::{sort_entries, Entry, TreeMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub(crate) struct TreeState {
    pub(crate) tree: TreeMap,
    pub(crate) pending: PendingDiff,
}

impl TreeState {
    pub(crate) fn new(tree: TreeMap) -> Self {
        Self {
            tree,
            pending: PendingDiff::default(),
        }
    }

    /// Whether the directory that would contain `path` is tracked.
    pub(crate) fn has_parent(&self, path: &Path) -> bool {
        path.parent()
            .map(|parent| self.tree.contains_key(parent))
            .unwrap_or(false)
    }

    /// Insert or replace `entry` in its parent's list. `false` if the parent is untracked.
    pub(crate) fn upsert_child(&mut self, entry: Entry) -> bool {
        self.write_child(entry, true)
    }

    /// Replace `entry` in its parent's list only if it is already listed.
    pub(crate) fn replace_child(&mut self, entry: Entry) -> bool {
        self.write_child(entry, false)
    }

    fn write_child(&mut self, entry: Entry, insert: bool) -> bool {
        let Some(parent) = entry.path.parent().map(Path::to_path_buf) else {
            return false;
        };
        let Some(children) = self.tree.get_mut(&parent) else {
            return false;
        };

        match children.iter_mut().find(|child| child.path == entry.path) {
            Some(child) => *child = entry,
            None if insert => children.push(entry),
            None => return false,
        }

        sort_entries(children);
        let children = children.clone();
        self.pending.record_replace(parent, children);
        true
    }

    /// Drop `path` from its parent's list. `false` if it was not listed.
    pub(crate) fn remove_child(&mut self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        let Some(children) = self.tree.get_mut(parent) else {
            return false;
        };

        let before = children.len();
        children.retain(|child| child.path != path);
        if children.len() == before {
            return false;
        }

        let children = children.clone();
        self.pending.record_replace(parent.to_path_buf(), children);
        true
    }

    /// Remove the key for `path` and every key beneath it.
    pub(crate) fn remove_subtree(&mut self, path: &Path) -> usize {
        // Path ordering is per component, so descendants follow `path` contiguously.
        let doomed: Vec<PathBuf> = self
            .tree
            .range(path.to_path_buf()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(path))
            .cloned()
            .collect();

        for key in &doomed {
            self.tree.remove(key);
            self.pending.record_delete(key.clone());
        }

        doomed.len()
    }

    /// Insert every key of a freshly scanned subtree.
    pub(crate) fn merge_subtree(&mut self, subtree: TreeMap) {
        for (dir, entries) in subtree {
            self.pending.record_replace(dir.clone(), entries.clone());
            self.tree.insert(dir, entries);
        }
    }
}
