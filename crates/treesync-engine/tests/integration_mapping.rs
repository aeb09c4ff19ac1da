//! Integration tests for the tree mapping against a real filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;

use async_trait::async_trait;
use treesync_engine::{
    extractor_fn, CanonicalEvent, ChangeKind, Entry, EntryProber, MappingOptions, RawChange,
    SyncError, TreeMap, TreeMapping, TreeMappingBuilder, TreeObserver, WatchMessage, WatchSource,
    WatchSubscription,
};

/// Helper to create a small project and return its canonical path
fn create_test_project(base: &Path) -> PathBuf {
    let project = base.join("project");
    fs::create_dir_all(project.join("src/nested")).unwrap();
    fs::create_dir_all(project.join("docs")).unwrap();
    fs::write(project.join("readme.txt"), "hello").unwrap();
    fs::write(project.join("src/main.rs"), "fn main() {}").unwrap();
    fs::write(project.join("src/nested/mod.rs"), "").unwrap();
    fs::write(project.join("docs/guide.md"), "# Guide").unwrap();
    project.canonicalize().unwrap()
}

async fn fresh_scan(root: &Path) -> TreeMap {
    EntryProber::new().list_recursively(root, None).await
}

fn names(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

/// Readme scenario from a single-file project
#[tokio::test]
async fn test_created_file_appears_in_tree_and_diff() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("readme.txt"), "hello").unwrap();

    let mapping = TreeMappingBuilder::new().init(temp_dir.path()).await.unwrap();
    let root = mapping.root().to_path_buf();

    let tree = mapping.get();
    assert_eq!(tree.len(), 1);
    assert_eq!(names(&tree[&root]), vec!["readme.txt"]);
    assert!(tree[&root][0].is_file);
    assert!(!mapping.has_updates());

    fs::write(root.join("notes.txt"), "").unwrap();
    let queued = mapping
        .apply_batch(&[RawChange::new(ChangeKind::Created, &root.join("notes.txt"))])
        .unwrap();
    assert_eq!(queued, 1);
    mapping.settle().await;

    assert_eq!(names(&mapping.children(&root).unwrap()), vec!["notes.txt", "readme.txt"]);

    let diff = mapping.flush_updates();
    assert!(diff.delete.is_empty());
    assert_eq!(diff.replace.len(), 1);
    assert_eq!(names(&diff.replace[&root]), vec!["notes.txt", "readme.txt"]);
}

/// Tree matches a fresh scan after a mix of real changes
#[tokio::test]
async fn test_tree_matches_fresh_scan_after_changes() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();
    assert_eq!(mapping.get(), fresh_scan(&root).await);

    fs::create_dir_all(root.join("assets/icons")).unwrap();
    fs::write(root.join("assets/icons/logo.svg"), "<svg/>").unwrap();
    fs::remove_file(root.join("readme.txt")).unwrap();
    fs::rename(root.join("docs"), root.join("manual")).unwrap();
    fs::write(root.join("src/main.rs"), "fn main() { run(); }").unwrap();

    mapping
        .apply_batch(&[
            RawChange::new(ChangeKind::Created, &root.join("assets/icons/logo.svg")),
            RawChange::new(ChangeKind::Created, &root.join("assets")),
            RawChange::new(ChangeKind::Deleted, &root.join("readme.txt")),
            RawChange::renamed(&root.join("docs"), &root.join("manual")),
            RawChange::new(ChangeKind::Modified, &root.join("src/main.rs")),
        ])
        .unwrap();
    mapping.settle().await;

    assert_eq!(mapping.get(), fresh_scan(&root).await);
}

/// Created then deleted in one batch leaves no trace
#[tokio::test]
async fn test_transient_file_is_cancelled() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();
    let before = mapping.get();

    let tmp = root.join("src/.main.rs.swp");
    let queued = mapping
        .apply_batch(&[
            RawChange::new(ChangeKind::Created, &tmp),
            RawChange::new(ChangeKind::Modified, &tmp),
            RawChange::new(ChangeKind::Deleted, &tmp),
        ])
        .unwrap();
    mapping.settle().await;

    assert_eq!(queued, 0);
    assert_eq!(mapping.get(), before);
    assert!(!mapping.has_updates());
}

/// Children reported before their parent directory still land
#[tokio::test]
async fn test_parent_applied_before_child() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();

    fs::create_dir_all(root.join("res/client")).unwrap();
    fs::write(root.join("res/client/main.lua"), "").unwrap();
    fs::write(root.join("res/fxmanifest.lua"), "").unwrap();

    mapping
        .apply_batch(&[
            RawChange::new(ChangeKind::Created, &root.join("res/client/main.lua")),
            RawChange::new(ChangeKind::Created, &root.join("res/fxmanifest.lua")),
            RawChange::new(ChangeKind::Created, &root.join("res/client")),
            RawChange::new(ChangeKind::Created, &root.join("res")),
        ])
        .unwrap();
    mapping.settle().await;

    assert_eq!(
        names(&mapping.children(root.join("res")).unwrap()),
        vec!["client", "fxmanifest.lua"]
    );
    assert_eq!(
        names(&mapping.children(root.join("res/client")).unwrap()),
        vec!["main.lua"]
    );
    assert_eq!(mapping.get(), fresh_scan(&root).await);
}

/// Renaming a directory moves its whole subtree
#[tokio::test]
async fn test_rename_relocates_subtree() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();

    fs::rename(root.join("src"), root.join("lib")).unwrap();
    mapping
        .apply_batch(&[RawChange::renamed(&root.join("src"), &root.join("lib"))])
        .unwrap();
    mapping.settle().await;

    let tree = mapping.get();
    assert!(!tree.keys().any(|key| key.starts_with(root.join("src"))));
    assert!(tree.contains_key(&root.join("lib")));
    assert!(tree.contains_key(&root.join("lib/nested")));

    let diff = mapping.flush_updates();
    assert!(diff.delete.contains(&root.join("src")));
    assert!(diff.delete.contains(&root.join("src/nested")));
    assert!(diff.replace.contains_key(&root.join("lib")));
    assert!(diff.replace.contains_key(&root.join("lib/nested")));
    assert!(diff.replace.contains_key(&root));
    assert!(diff.delete.is_disjoint(&diff.replace.keys().cloned().collect()));
}

/// A file renamed twice in one batch leaves only its final name
#[tokio::test]
async fn test_chained_rename_in_one_batch() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    fs::write(root.join("a.txt"), "a").unwrap();
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();

    fs::rename(root.join("a.txt"), root.join("b.txt")).unwrap();
    fs::rename(root.join("b.txt"), root.join("c.txt")).unwrap();
    mapping
        .apply_batch(&[
            RawChange::renamed(&root.join("a.txt"), &root.join("b.txt")),
            RawChange::renamed(&root.join("b.txt"), &root.join("c.txt")),
        ])
        .unwrap();
    mapping.settle().await;

    let children = mapping.children(&root).unwrap();
    assert!(!names(&children).contains(&"a.txt"));
    assert!(names(&children).contains(&"c.txt"));
    assert_eq!(mapping.get(), fresh_scan(&root).await);
}

/// Editors save by moving the old file aside and writing a new one
#[tokio::test]
async fn test_atomic_save_keeps_both_files() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();

    let original = root.join("src/main.rs");
    let backup = root.join("src/main.rs~");
    fs::rename(&original, &backup).unwrap();
    fs::write(&original, "fn main() { saved(); }").unwrap();

    mapping
        .apply_batch(&[
            RawChange::renamed(&original, &backup),
            RawChange::new(ChangeKind::Created, &original),
            RawChange::new(ChangeKind::Modified, &original),
        ])
        .unwrap();
    mapping.settle().await;

    assert_eq!(
        names(&mapping.children(root.join("src")).unwrap()),
        vec!["nested", "main.rs", "main.rs~"]
    );
    assert_eq!(mapping.get(), fresh_scan(&root).await);
}

/// A path created, deleted and created again in one batch is present
#[tokio::test]
async fn test_recreated_path_after_cancel() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();

    let lock = root.join("build.lock");
    fs::write(&lock, "").unwrap();
    mapping
        .apply_batch(&[
            RawChange::new(ChangeKind::Created, &lock),
            RawChange::new(ChangeKind::Deleted, &lock),
            RawChange::new(ChangeKind::Created, &lock),
        ])
        .unwrap();
    mapping.settle().await;

    assert!(names(&mapping.children(&root).unwrap()).contains(&"build.lock"));
    assert_eq!(mapping.get(), fresh_scan(&root).await);
}

/// A second flush with no changes in between is empty
#[tokio::test]
async fn test_flush_is_idempotent() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();

    fs::remove_file(root.join("docs/guide.md")).unwrap();
    mapping
        .apply_batch(&[RawChange::new(ChangeKind::Deleted, &root.join("docs/guide.md"))])
        .unwrap();
    mapping.settle().await;

    assert!(mapping.has_updates());
    assert!(!mapping.flush_updates().is_empty());
    assert!(!mapping.has_updates());
    assert!(mapping.flush_updates().is_empty());
}

/// Deleting a directory drops all of its keys
#[tokio::test]
async fn test_deleted_directory_removes_descendants() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();

    fs::remove_dir_all(root.join("src")).unwrap();
    mapping
        .apply_batch(&[
            RawChange::new(ChangeKind::Deleted, &root.join("src/nested/mod.rs")),
            RawChange::new(ChangeKind::Deleted, &root.join("src")),
        ])
        .unwrap();
    mapping.settle().await;

    let tree = mapping.get();
    assert!(!tree.contains_key(&root.join("src")));
    assert!(!tree.contains_key(&root.join("src/nested")));
    assert_eq!(names(&tree[&root]), vec!["docs", "readme.txt"]);
}

/// Ignored and version-control paths never reach the tree
#[tokio::test]
async fn test_ignored_paths_are_immune() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    fs::create_dir_all(root.join("cache")).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();

    let mapping = TreeMappingBuilder::new()
        .ignore("cache")
        .init(&root)
        .await
        .unwrap();
    assert!(!mapping.get().contains_key(&root.join("cache")));
    assert!(!names(&mapping.children(&root).unwrap()).contains(&".git"));

    fs::write(root.join("cache/blob"), "").unwrap();
    fs::write(root.join(".git/index"), "").unwrap();
    let queued = mapping
        .apply_batch(&[
            RawChange::new(ChangeKind::Created, &root.join("cache/blob")),
            RawChange::new(ChangeKind::Modified, &root.join(".git/index")),
        ])
        .unwrap();
    mapping
        .apply_event(CanonicalEvent::new(ChangeKind::Created, root.join("cache/blob")))
        .unwrap();
    mapping.settle().await;

    assert_eq!(queued, 0);
    assert!(!mapping.has_updates());
    assert!(!mapping.get().contains_key(&root.join("cache")));
}

/// Rename into an ignored directory reads as a delete
#[tokio::test]
async fn test_rename_into_ignored_is_delete() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    fs::create_dir_all(root.join("trash")).unwrap();

    let mapping = TreeMappingBuilder::new()
        .ignore("trash")
        .init(&root)
        .await
        .unwrap();

    fs::rename(root.join("readme.txt"), root.join("trash/readme.txt")).unwrap();
    mapping
        .apply_batch(&[RawChange::renamed(
            &root.join("readme.txt"),
            &root.join("trash/readme.txt"),
        )])
        .unwrap();
    mapping.settle().await;

    assert_eq!(names(&mapping.children(&root).unwrap()), vec!["docs", "src"]);
    assert_eq!(mapping.get(), {
        let mut expected = fresh_scan(&root).await;
        expected.remove(&root.join("trash"));
        if let Some(children) = expected.get_mut(&root) {
            children.retain(|e| e.name != "trash");
        }
        expected
    });
}

#[derive(Default)]
struct RecordingObserver {
    calls: Mutex<Vec<String>>,
    discovered: Mutex<usize>,
}

impl RecordingObserver {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl TreeObserver for RecordingObserver {
    fn should_process_update(&self, path: &Path) -> bool {
        path.file_name().map_or(true, |name| name != "skip.txt")
    }

    fn process_entry(&self, _entry: &Entry) {
        *self.discovered.lock().unwrap() += 1;
    }

    fn on_created(&self, entry: &Entry) {
        self.calls.lock().unwrap().push(format!("created {}", entry.name));
    }

    fn on_deleted(&self, path: &Path) {
        let name = path.file_name().unwrap().to_string_lossy();
        self.calls.lock().unwrap().push(format!("deleted {name}"));
    }

    fn on_modified(&self, entry: &Entry) {
        self.calls.lock().unwrap().push(format!("modified {}", entry.name));
    }

    fn on_renamed(&self, entry: &Entry, old_path: &Path) {
        let old = old_path.file_name().unwrap().to_string_lossy();
        self.calls
            .lock()
            .unwrap()
            .push(format!("renamed {old} -> {}", entry.name));
    }

    fn after_update(&self, kind: ChangeKind, path: &Path, _entry: Option<&Entry>) {
        let name = path.file_name().unwrap().to_string_lossy();
        self.calls.lock().unwrap().push(format!("after {kind:?} {name}"));
    }
}

/// Observer callbacks fire in order and can veto updates
#[tokio::test]
async fn test_observer_callbacks() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let observer = Arc::new(RecordingObserver::default());

    let mapping = TreeMappingBuilder::new()
        .observer(observer.clone())
        .init(&root)
        .await
        .unwrap();
    assert_eq!(*observer.discovered.lock().unwrap(), 7);

    fs::write(root.join("skip.txt"), "").unwrap();
    fs::write(root.join("new.txt"), "").unwrap();
    fs::rename(root.join("readme.txt"), root.join("about.txt")).unwrap();
    mapping
        .apply_batch(&[
            RawChange::new(ChangeKind::Created, &root.join("skip.txt")),
            RawChange::new(ChangeKind::Created, &root.join("new.txt")),
            RawChange::renamed(&root.join("readme.txt"), &root.join("about.txt")),
        ])
        .unwrap();
    mapping.settle().await;

    assert_eq!(
        observer.calls(),
        vec![
            "created new.txt",
            "after Created new.txt",
            "renamed readme.txt -> about.txt",
            "after Renamed about.txt",
        ]
    );
    assert!(!names(&mapping.children(&root).unwrap()).contains(&"skip.txt"));
}

/// A forced scan refreshes metadata the watcher never reported
#[tokio::test]
async fn test_force_entry_scan_refreshes_meta() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());

    let mapping = TreeMappingBuilder::new()
        .extractor(
            "children",
            extractor_fn(|path: PathBuf| async move {
                Ok::<_, anyhow::Error>(serde_json::json!(fs::read_dir(path)?.count()))
            }),
        )
        .init(&root)
        .await
        .unwrap();

    let docs = |mapping: &TreeMapping| {
        mapping
            .children(mapping.root())
            .unwrap()
            .into_iter()
            .find(|e| e.name == "docs")
            .unwrap()
    };
    assert_eq!(docs(&mapping).meta["children"], serde_json::json!(1));

    fs::write(root.join("docs/faq.md"), "").unwrap();
    mapping.force_entry_scan(root.join("docs")).await.unwrap();

    assert_eq!(docs(&mapping).meta["children"], serde_json::json!(2));
    assert!(mapping.flush_updates().replace.contains_key(&root));

    // Untracked paths are left alone
    mapping.force_entry_scan(root.join("nowhere/x")).await.unwrap();
    assert!(!mapping.has_updates());
}

/// Dispose freezes the tree and rejects further work
#[tokio::test]
async fn test_dispose_stops_mutation() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new().init(&root).await.unwrap();
    let before = mapping.get();

    mapping.dispose();
    mapping.dispose();
    assert!(mapping.is_disposed());

    fs::write(root.join("late.txt"), "").unwrap();
    let result = mapping.apply_batch(&[RawChange::new(ChangeKind::Created, &root.join("late.txt"))]);
    assert!(matches!(result, Err(SyncError::Disposed)));
    assert!(matches!(
        mapping.force_entry_scan(root.join("docs")).await,
        Err(SyncError::Disposed)
    ));

    mapping.settle().await;
    assert_eq!(mapping.get(), before);
}

/// A scan still running at dispose time never lands
#[tokio::test]
async fn test_dispose_discards_in_flight_scan() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());

    let mapping = TreeMappingBuilder::new()
        .extractor(
            "slow",
            extractor_fn(|path: PathBuf| async move {
                if path.file_name().map_or(false, |name| name == "slow") {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                Ok::<_, anyhow::Error>(serde_json::json!(true))
            }),
        )
        .init(&root)
        .await
        .unwrap();
    let before = mapping.get();

    fs::create_dir(root.join("slow")).unwrap();
    mapping
        .apply_batch(&[RawChange::new(ChangeKind::Created, &root.join("slow"))])
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    mapping.dispose();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(mapping.get(), before);
    assert!(!mapping.has_updates());
}

/// Many changes between flushes raise the flush request
#[tokio::test]
async fn test_pending_pressure_requests_flush() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let mapping = TreeMappingBuilder::new()
        .options(MappingOptions {
            max_pending: 3,
            ..Default::default()
        })
        .init(&root)
        .await
        .unwrap();

    let mut batch = Vec::new();
    for dir in ["a", "b", "c", "d"] {
        fs::create_dir(root.join(dir)).unwrap();
        batch.push(RawChange::new(ChangeKind::Created, &root.join(dir)));
    }
    mapping.apply_batch(&batch).unwrap();

    tokio::time::timeout(Duration::from_secs(5), mapping.flush_requested())
        .await
        .expect("pressure should request a flush");
    mapping.settle().await;
    assert!(mapping.needs_flush());
}

/// Watch source backed by a channel the test feeds by hand
#[derive(Default)]
struct ManualWatchSource {
    tx: Mutex<Option<mpsc::Sender<WatchMessage>>>,
}

#[async_trait]
impl WatchSource for ManualWatchSource {
    async fn start_watch(
        &self,
        _path: &Path,
        _ignored: &[PathBuf],
    ) -> Result<WatchSubscription, SyncError> {
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(WatchSubscription::from_channel(rx))
    }
}

/// Batches from a watch source flow into the mapping
#[tokio::test]
async fn test_watch_source_batches_are_applied() {
    let temp_dir = tempdir().unwrap();
    let root = create_test_project(temp_dir.path());
    let source = ManualWatchSource::default();

    let mapping = TreeMappingBuilder::new().watch(&root, &source).await.unwrap();
    let tx = source.tx.lock().unwrap().clone().unwrap();

    fs::write(root.join("watched.txt"), "").unwrap();
    tx.send(WatchMessage::Error("transient".to_string())).await.unwrap();
    tx.send(WatchMessage::Batch(vec![RawChange::new(
        ChangeKind::Created,
        &root.join("watched.txt"),
    )]))
    .await
    .unwrap();

    let landed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            mapping.settle().await;
            if names(&mapping.children(&root).unwrap()).contains(&"watched.txt") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(landed.is_ok(), "batch should be applied");

    mapping.dispose();
}
