//! Entry probing and directory listing.
//!
//! Every stat and readdir goes through `tokio::fs`, so probes suspend
//! without blocking other work. Probe failures are never errors: a path
//! that cannot be stat'ed is simply absent.

mod extract;

pub use extract::{extractor_fn, Extractors, FnExtractor, MetaExtractor};

use crate::entry::{is_vcs_path, is_within, sort_entries, Entry, TreeMap};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Callback invoked for every entry discovered by a listing.
pub type EntryHook = Arc<dyn Fn(&Entry) + Send + Sync>;

/// Options for probing and scanning.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Path prefixes that are never listed
    pub ignored: Vec<PathBuf>,
    /// Maximum number of directories listed at once
    pub max_scan_concurrency: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            ignored: Vec::new(),
            max_scan_concurrency: 16,
        }
    }
}

/// Stats paths into [`Entry`] records and lists directories.
#[derive(Clone)]
pub struct EntryProber {
    inner: Arc<ProberInner>,
}

struct ProberInner {
    ignored: Vec<PathBuf>,
    extractors: Extractors,
    permits: Semaphore,
}

impl EntryProber {
    /// Create a prober with default options and no extractors.
    pub fn new() -> Self {
        Self::with_options(ProbeOptions::default(), Extractors::new())
    }

    /// Create a prober with custom options and extractors.
    pub fn with_options(options: ProbeOptions, extractors: Extractors) -> Self {
        Self {
            inner: Arc::new(ProberInner {
                ignored: options.ignored,
                extractors,
                permits: Semaphore::new(options.max_scan_concurrency.max(1)),
            }),
        }
    }

    /// Whether `path` falls under a configured ignore prefix.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.inner.ignored.iter().any(|prefix| is_within(path, prefix))
    }

    /// Whether `path` is ignored or inside a version-control directory.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.is_ignored(path) || is_vcs_path(path)
    }

    /// Stat a single path. Returns `None` when the path cannot be stat'ed.
    pub async fn probe(&self, path: &Path) -> Option<Entry> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = ?path, error = %e, "Probe failed");
                return None;
            }
        };

        let mut entry = Entry::from_metadata(path, &metadata);
        if entry.is_directory && !self.inner.extractors.is_empty() {
            entry.meta = self.extract_meta(path).await;
        }

        Some(entry)
    }

    /// Run every extractor concurrently. A failing extractor only loses its own key.
    async fn extract_meta(&self, path: &Path) -> BTreeMap<String, serde_json::Value> {
        let mut tasks = JoinSet::new();
        for (name, extractor) in &self.inner.extractors {
            let name = name.clone();
            let extractor = extractor.clone();
            let path = path.to_path_buf();
            tasks.spawn(async move {
                let result = extractor.extract(&path).await;
                (name, result)
            });
        }

        let mut meta = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(value))) => {
                    meta.insert(name, value);
                }
                Ok((name, Err(e))) => {
                    warn!(path = ?path, extractor = %name, error = %e, "Metadata extractor failed");
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "Metadata extractor aborted");
                }
            }
        }

        meta
    }

    /// List and probe the immediate children of `path`, directories first.
    ///
    /// A directory that cannot be read yields an empty list.
    pub async fn list_directory(&self, path: &Path, on_entry: Option<&EntryHook>) -> Vec<Entry> {
        let _permit = self.inner.permits.acquire().await.ok();

        let mut dir = match tokio::fs::read_dir(path).await {
            Ok(dir) => dir,
            Err(e) => {
                debug!(path = ?path, error = %e, "Failed to read directory");
                return Vec::new();
            }
        };

        let mut tasks = JoinSet::new();
        loop {
            match dir.next_entry().await {
                Ok(Some(child)) => {
                    let child_path = child.path();
                    if self.is_excluded(&child_path) {
                        continue;
                    }
                    let prober = self.clone();
                    tasks.spawn(async move { prober.probe(&child_path).await });
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(path = ?path, error = %e, "Directory listing interrupted");
                    break;
                }
            }
        }

        let mut entries = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(entry)) = joined {
                if let Some(hook) = on_entry {
                    hook(&entry);
                }
                entries.push(entry);
            }
        }

        sort_entries(&mut entries);
        entries
    }

    /// List `path` and every directory beneath it into one flat map.
    ///
    /// Subdirectories are listed concurrently, bounded by
    /// [`ProbeOptions::max_scan_concurrency`]. Symlinks are not followed.
    pub async fn list_recursively(&self, path: &Path, on_entry: Option<EntryHook>) -> TreeMap {
        let mut map = TreeMap::new();
        let mut tasks = JoinSet::new();
        self.spawn_listing(&mut tasks, path.to_path_buf(), on_entry.clone());

        while let Some(joined) = tasks.join_next().await {
            let (dir, entries) = match joined {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(root = ?path, error = %e, "Directory listing task failed");
                    continue;
                }
            };

            for entry in entries.iter().filter(|e| e.is_directory) {
                self.spawn_listing(&mut tasks, entry.path.clone(), on_entry.clone());
            }
            map.insert(dir, entries);
        }

        map
    }

    fn spawn_listing(
        &self,
        tasks: &mut JoinSet<(PathBuf, Vec<Entry>)>,
        dir: PathBuf,
        on_entry: Option<EntryHook>,
    ) {
        let prober = self.clone();
        tasks.spawn(async move {
            let entries = prober.list_directory(&dir, on_entry.as_ref()).await;
            (dir, entries)
        });
    }
}

impl Default for EntryProber {
    fn default() -> Self {
        Self::new()
    }
}
