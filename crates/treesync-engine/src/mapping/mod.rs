//! The authoritative in-memory mirror of a project directory.
//!
//! A [`TreeMapping`] is populated by one recursive scan and then mutated
//! only by canonical events, applied one at a time on an [`UpdateQueue`].
//! Every mutation also lands in a [`PendingDiff`] that consumers drain with
//! [`TreeMapping::flush_updates`] on their own cadence.

mod diff;
mod observer;
mod state;

pub use diff::PendingDiff;
pub use observer::{NoopObserver, TreeObserver};

use crate::coalescer::{CanonicalEvent, EventCoalescer};
use crate::entry::{Entry, TreeMap};
use crate::probe::{EntryHook, EntryProber, Extractors, MetaExtractor, ProbeOptions};
use crate::queue::{Apply, UpdateQueue};
use crate::watcher::{ChangeKind, RawChange, WatchMessage, WatchSource, WatchSubscription};
use crate::SyncError;
use async_trait::async_trait;
use parking_lot::Mutex;
use state::TreeState;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Options for a tree mapping.
#[derive(Debug, Clone)]
pub struct MappingOptions {
    /// Path prefixes excluded from scans and events
    pub ignored: Vec<PathBuf>,
    /// Maximum number of directories listed at once during scans
    pub max_scan_concurrency: usize,
    /// Pending diff size at which an early flush is requested
    pub max_pending: usize,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            ignored: Vec::new(),
            max_scan_concurrency: 16,
            max_pending: 4096,
        }
    }
}

/// Configures and starts a [`TreeMapping`].
pub struct TreeMappingBuilder {
    options: MappingOptions,
    observer: Arc<dyn TreeObserver>,
    extractors: Extractors,
}

impl TreeMappingBuilder {
    /// Start from default options and a no-op observer.
    pub fn new() -> Self {
        Self {
            options: MappingOptions::default(),
            observer: Arc::new(NoopObserver),
            extractors: Extractors::new(),
        }
    }

    /// Replace all options.
    pub fn options(mut self, options: MappingOptions) -> Self {
        self.options = options;
        self
    }

    /// Exclude a path prefix. Relative paths are resolved against the root.
    pub fn ignore(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.ignored.push(path.into());
        self
    }

    /// Set the observer receiving callbacks.
    pub fn observer(mut self, observer: Arc<dyn TreeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register a metadata extractor for directory entries.
    pub fn extractor(mut self, name: impl Into<String>, extractor: Arc<dyn MetaExtractor>) -> Self {
        self.extractors.insert(name.into(), extractor);
        self
    }

    /// Scan `root` and return a mapping ready for events.
    pub async fn init(self, root: impl AsRef<Path>) -> Result<TreeMapping, SyncError> {
        let root = canonical_root(root.as_ref())?;
        TreeMapping::start(root, self).await
    }

    /// Subscribe to `source`, scan `root`, then start applying watcher batches.
    ///
    /// The subscription is taken before the scan so no change is lost; its
    /// batches are only consumed once the scan is complete.
    pub async fn watch(
        self,
        root: impl AsRef<Path>,
        source: &dyn WatchSource,
    ) -> Result<TreeMapping, SyncError> {
        let root = canonical_root(root.as_ref())?;
        let ignored = resolve_ignored(&root, &self.options.ignored);
        let subscription = source.start_watch(&root, &ignored).await?;

        let mapping = TreeMapping::start(root, self).await?;
        mapping.attach(subscription);
        Ok(mapping)
    }
}

impl Default for TreeMappingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf, SyncError> {
    root.canonicalize()
        .map_err(|_| SyncError::NotFound(root.to_path_buf()))
}

fn resolve_ignored(root: &Path, ignored: &[PathBuf]) -> Vec<PathBuf> {
    ignored
        .iter()
        .map(|path| {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            path.canonicalize().unwrap_or(path)
        })
        .collect()
}

/// Work items for the update queue.
enum Job {
    Event(CanonicalEvent),
    Rescan(PathBuf, oneshot::Sender<()>),
}

/// Coalescer and queue, shared with the watcher pump.
struct EventFeed {
    coalescer: EventCoalescer,
    queue: UpdateQueue<Job>,
}

impl EventFeed {
    fn push_batch(&self, batch: &[RawChange]) -> Result<usize, SyncError> {
        let events = self.coalescer.coalesce(batch);
        let count = events.len();
        for event in events {
            self.queue.append(Job::Event(event))?;
        }
        Ok(count)
    }
}

/// A live mirror of one directory tree.
pub struct TreeMapping {
    core: Arc<MappingCore>,
    feed: Arc<EventFeed>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TreeMapping {
    async fn start(root: PathBuf, builder: TreeMappingBuilder) -> Result<Self, SyncError> {
        let started = Instant::now();
        let ignored = resolve_ignored(&root, &builder.options.ignored);

        info!(path = ?root, ignored = ?ignored, "Starting initial scan");

        let prober = EntryProber::with_options(
            ProbeOptions {
                ignored: ignored.clone(),
                max_scan_concurrency: builder.options.max_scan_concurrency,
            },
            builder.extractors,
        );

        let core = Arc::new(MappingCore {
            root,
            prober,
            observer: builder.observer,
            state: Mutex::new(TreeState::default()),
            disposed: AtomicBool::new(false),
            max_pending: builder.options.max_pending.max(1),
            flush_requested: Notify::new(),
        });

        let tree = core
            .prober
            .list_recursively(&core.root, Some(core.entry_hook()))
            .await;
        let directories = tree.len();
        let entries: usize = tree.values().map(Vec::len).sum();
        *core.state.lock() = TreeState::new(tree);

        info!(
            path = ?core.root,
            directories,
            entries,
            duration_ms = started.elapsed().as_millis() as u64,
            "Initial scan complete"
        );

        let applier: Arc<dyn Apply<Job>> = core.clone();
        let feed = Arc::new(EventFeed {
            coalescer: EventCoalescer::new(ignored),
            queue: UpdateQueue::new(applier),
        });

        Ok(Self {
            core,
            feed,
            pump: Mutex::new(None),
        })
    }

    /// Canonical root path.
    pub fn root(&self) -> &Path {
        &self.core.root
    }

    /// The prober used by this mapping, for one-off fresh stats.
    pub fn prober(&self) -> &EntryProber {
        &self.core.prober
    }

    /// Snapshot of the whole tree.
    pub fn get(&self) -> TreeMap {
        self.core.state.lock().tree.clone()
    }

    /// Snapshot of one directory's children, if tracked.
    pub fn children(&self, dir: impl AsRef<Path>) -> Option<Vec<Entry>> {
        self.core.state.lock().tree.get(dir.as_ref()).cloned()
    }

    /// Whether there is anything to flush.
    pub fn has_updates(&self) -> bool {
        !self.core.state.lock().pending.is_empty()
    }

    /// Whether the pending diff has reached the pressure threshold.
    pub fn needs_flush(&self) -> bool {
        self.core.state.lock().pending.len() >= self.core.max_pending
    }

    /// Resolves when the pending diff crosses the pressure threshold.
    pub async fn flush_requested(&self) {
        self.core.flush_requested.notified().await;
    }

    /// Take the pending diff, leaving an empty one in its place.
    pub fn flush_updates(&self) -> PendingDiff {
        std::mem::take(&mut self.core.state.lock().pending)
    }

    /// Coalesce a raw batch and queue the resulting events.
    ///
    /// Returns the number of canonical events queued.
    pub fn apply_batch(&self, batch: &[RawChange]) -> Result<usize, SyncError> {
        self.feed.push_batch(batch)
    }

    /// Queue one canonical event.
    pub fn apply_event(&self, event: CanonicalEvent) -> Result<(), SyncError> {
        self.feed.queue.append(Job::Event(event))
    }

    /// Wait until every queued event has been applied.
    pub async fn settle(&self) {
        self.feed.queue.wait_idle().await;
    }

    /// Re-probe `path` outside of the watcher and refresh it in place.
    ///
    /// Runs on the update queue behind any queued events. Does nothing when
    /// the path's parent is untracked or the path cannot be probed.
    pub async fn force_entry_scan(&self, path: impl AsRef<Path>) -> Result<(), SyncError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.feed
            .queue
            .append(Job::Rescan(path.as_ref().to_path_buf(), done_tx))?;
        done_rx.await.map_err(|_| SyncError::Disposed)
    }

    /// Feed batches from `subscription` into this mapping until it closes.
    ///
    /// Replaces any subscription attached earlier.
    pub fn attach(&self, mut subscription: WatchSubscription) {
        let feed = self.feed.clone();
        let root = self.core.root.clone();

        let pump = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                match message {
                    WatchMessage::Batch(batch) => match feed.push_batch(&batch) {
                        Ok(count) => debug!(raw = batch.len(), queued = count, "Watcher batch queued"),
                        Err(e) => {
                            debug!(error = %e, "Mapping gone, dropping watcher batch");
                            break;
                        }
                    },
                    WatchMessage::Error(message) => {
                        warn!(path = ?root, error = %message, "Watcher reported an error");
                    }
                }
            }
            debug!(path = ?root, "Watch subscription closed");
        });

        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }
    }

    /// Whether [`TreeMapping::dispose`] was called.
    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Stop the queue and the watcher. Idempotent; the tree is frozen afterwards.
    pub fn dispose(&self) {
        if !self.core.dispose() {
            return;
        }

        self.feed.queue.dispose();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        info!(path = ?self.core.root, "Tree mapping disposed");
    }
}

impl Drop for TreeMapping {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// State and event application shared with the queue worker.
struct MappingCore {
    root: PathBuf,
    prober: EntryProber,
    observer: Arc<dyn TreeObserver>,
    state: Mutex<TreeState>,
    disposed: AtomicBool,
    max_pending: usize,
    flush_requested: Notify,
}

#[async_trait]
impl Apply<Job> for MappingCore {
    async fn apply(&self, job: Job) {
        match job {
            Job::Event(event) => self.apply_event(event).await,
            Job::Rescan(path, done) => {
                self.rescan(&path).await;
                let _ = done.send(());
            }
        }
    }
}

impl MappingCore {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns `true` for the call that actually disposed.
    fn dispose(&self) -> bool {
        let _state = self.state.lock();
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    fn entry_hook(&self) -> EntryHook {
        let observer = self.observer.clone();
        Arc::new(move |entry: &Entry| observer.process_entry(entry))
    }

    /// Run `f` against the state unless disposed. Never held across an await.
    fn mutate<R>(&self, f: impl FnOnce(&mut TreeState) -> R) -> Option<R> {
        let mut state = self.state.lock();
        if self.is_disposed() {
            return None;
        }

        let result = f(&mut state);
        let pressure = state.pending.len() >= self.max_pending;
        drop(state);

        if pressure {
            self.flush_requested.notify_one();
        }
        Some(result)
    }

    async fn scan_subtree(&self, path: &Path) -> TreeMap {
        self.prober
            .list_recursively(path, Some(self.entry_hook()))
            .await
    }

    async fn apply_event(&self, event: CanonicalEvent) {
        if self.is_disposed() {
            return;
        }
        if event.path == self.root || !event.path.starts_with(&self.root) {
            debug!(path = ?event.path, kind = ?event.kind, "Event outside of the mirrored tree");
            return;
        }
        if self.prober.is_excluded(&event.path) {
            debug!(path = ?event.path, kind = ?event.kind, "Event on an ignored path");
            return;
        }
        if !self.observer.should_process_update(&event.path) {
            debug!(path = ?event.path, kind = ?event.kind, "Update suppressed by observer");
            return;
        }

        debug!(path = ?event.path, kind = ?event.kind, "Applying event");

        let entry = match (event.kind, &event.old_path) {
            (ChangeKind::Created, _) | (ChangeKind::Renamed, None) => {
                self.apply_created(&event.path).await
            }
            (ChangeKind::Deleted, _) => {
                self.apply_deleted(&event.path);
                None
            }
            (ChangeKind::Modified, _) => self.apply_modified(&event.path).await,
            (ChangeKind::Renamed, Some(old_path)) => {
                self.apply_renamed(&event.path, old_path).await
            }
        };

        if !self.is_disposed() {
            self.observer
                .after_update(event.kind, &event.path, entry.as_ref());
        }
    }

    async fn apply_created(&self, path: &Path) -> Option<Entry> {
        let Some(entry) = self.prober.probe(path).await else {
            warn!(path = ?path, "Created entry vanished before it could be probed");
            return None;
        };

        let subtree = if entry.is_directory {
            Some(self.scan_subtree(path).await)
        } else {
            None
        };

        let applied = self.mutate(|state| {
            if !state.has_parent(path) {
                return false;
            }
            state.remove_subtree(path);
            if let Some(subtree) = subtree {
                state.merge_subtree(subtree);
            }
            state.upsert_child(entry.clone())
        })?;

        if !applied {
            warn!(path = ?path, "Created entry has no tracked parent");
            return None;
        }

        self.observer.on_created(&entry);
        Some(entry)
    }

    fn apply_deleted(&self, path: &Path) {
        let removed = self.mutate(|state| {
            let keys = state.remove_subtree(path);
            let listed = state.remove_child(path);
            keys > 0 || listed
        });

        match removed {
            Some(tracked) => {
                if !tracked {
                    debug!(path = ?path, "Deleted entry was not tracked");
                }
                self.observer.on_deleted(path);
            }
            None => {}
        }
    }

    async fn apply_modified(&self, path: &Path) -> Option<Entry> {
        let Some(entry) = self.prober.probe(path).await else {
            warn!(path = ?path, "Modified entry vanished, missed a delete");
            return None;
        };

        // A file replaced by a directory needs its key populated.
        let untracked_dir =
            entry.is_directory && !self.state.lock().tree.contains_key(path);
        let subtree = if untracked_dir {
            Some(self.scan_subtree(path).await)
        } else {
            None
        };

        let applied = self.mutate(|state| {
            if !state.has_parent(path) {
                return false;
            }
            if !entry.is_directory {
                state.remove_subtree(path);
            }
            if let Some(subtree) = subtree {
                state.merge_subtree(subtree);
            }
            state.upsert_child(entry.clone())
        })?;

        if !applied {
            warn!(path = ?path, "Modified entry has no tracked parent");
            return None;
        }

        self.observer.on_modified(&entry);
        Some(entry)
    }

    async fn apply_renamed(&self, path: &Path, old_path: &Path) -> Option<Entry> {
        // A source that exists again was re-created and carries its own event.
        let source_gone = tokio::fs::symlink_metadata(old_path).await.is_err();
        if !source_gone {
            debug!(old_path = ?old_path, "Rename source was re-created, keeping it");
        }

        let Some(entry) = self.prober.probe(path).await else {
            warn!(path = ?path, old_path = ?old_path, "Renamed entry vanished before it could be probed");
            if source_gone {
                self.apply_deleted(old_path);
            }
            return None;
        };

        let subtree = if entry.is_directory {
            Some(self.scan_subtree(path).await)
        } else {
            None
        };

        let applied = self.mutate(|state| {
            if source_gone {
                state.remove_subtree(old_path);
                state.remove_child(old_path);
            }

            if !state.has_parent(path) {
                return false;
            }
            state.remove_subtree(path);
            if let Some(subtree) = subtree {
                state.merge_subtree(subtree);
            }
            state.upsert_child(entry.clone())
        })?;

        if !applied {
            warn!(path = ?path, old_path = ?old_path, "Renamed entry has no tracked parent");
            if source_gone {
                self.observer.on_deleted(old_path);
            }
            return None;
        }

        self.observer.on_renamed(&entry, old_path);
        Some(entry)
    }

    async fn rescan(&self, path: &Path) {
        let Some(entry) = self.prober.probe(path).await else {
            debug!(path = ?path, "Forced scan found nothing");
            return;
        };

        if let Some(true) = self.mutate(|state| state.replace_child(entry.clone())) {
            self.observer.on_modified(&entry);
        }
    }
}
