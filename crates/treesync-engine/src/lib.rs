//! Treesync Engine
//!
//! This crate keeps an in-memory mirror of a directory tree in sync with
//! the filesystem, including:
//! - Entry probing and bounded-concurrency recursive listing
//! - Coalescing of raw watcher batches into canonical events
//! - A strictly serial update queue
//! - The tree mapping itself, with a flushable diff of net changes
//! - Native watching with debounced batches

mod error;
pub mod coalescer;
pub mod entry;
pub mod mapping;
pub mod probe;
pub mod queue;
pub mod watcher;

pub use coalescer::{CanonicalEvent, EventCoalescer};
pub use entry::{Entry, TreeMap};
pub use error::SyncError;
pub use mapping::{
    MappingOptions, NoopObserver, PendingDiff, TreeMapping, TreeMappingBuilder, TreeObserver,
};
pub use probe::{extractor_fn, EntryHook, EntryProber, Extractors, MetaExtractor, ProbeOptions};
pub use queue::{Apply, UpdateQueue};
pub use watcher::{
    ChangeKind, NotifyWatchSource, RawChange, WatchMessage, WatchSource, WatchSubscription,
    WatcherOptions,
};
