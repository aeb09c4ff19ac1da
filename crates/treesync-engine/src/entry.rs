//! Entry records and the tree map they are stored in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

/// Version-control metadata directories that are never mirrored.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Mirror of a project: directory path to its sorted immediate children.
pub type TreeMap = BTreeMap<PathBuf, Vec<Entry>>;

/// A normalized snapshot of one filesystem object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Absolute path
    pub path: PathBuf,
    /// Base name
    pub name: String,
    /// Regular file
    pub is_file: bool,
    /// Directory
    pub is_directory: bool,
    /// Symbolic link (never followed)
    pub is_symbolic_link: bool,
    /// Extractor results, keyed by extractor name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Entry {
    /// Build an entry from `lstat` metadata.
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();

        Self {
            path: path.to_path_buf(),
            name: entry_name(path),
            is_file: file_type.is_file(),
            is_directory: file_type.is_dir(),
            is_symbolic_link: file_type.is_symlink(),
            meta: BTreeMap::new(),
        }
    }

    /// Directory containing this entry.
    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Sort a child list: directories first, then by name.
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Whether `path` is `prefix` itself or lies beneath it.
pub fn is_within(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}

/// Whether any component of `path` is a version-control metadata directory.
pub fn is_vcs_path(path: &Path) -> bool {
    path.components()
        .any(|c| VCS_DIRS.iter().any(|dir| c.as_os_str() == OsStr::new(dir)))
}
