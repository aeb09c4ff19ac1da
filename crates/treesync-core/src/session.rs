//! Sync session lifecycle: mapping, watcher, and flush loop.

use crate::{CoreError, SessionStats, SyncConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use treesync_engine::{
    NotifyWatchSource, PendingDiff, TreeMapping, TreeMappingBuilder, WatchSource,
};

/// Receives every non-empty diff flushed from a session.
#[async_trait]
pub trait DiffSink: Send + Sync {
    /// Deliver one diff. A failed delivery is counted and logged; the diff is not retried.
    async fn deliver(&self, diff: PendingDiff) -> Result<(), CoreError>;
}

/// A watched tree whose changes are flushed to a sink on a fixed cadence.
pub struct SyncSession {
    mapping: Arc<TreeMapping>,
    stats: Arc<SessionStats>,
    shutdown_tx: broadcast::Sender<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncSession {
    /// Watch `root` with the native watcher.
    pub async fn start(
        root: impl AsRef<Path>,
        config: &SyncConfig,
        sink: Arc<dyn DiffSink>,
    ) -> Result<Self, CoreError> {
        let source = NotifyWatchSource::new(config.watcher_options());
        Self::start_with(root, config, TreeMappingBuilder::new(), &source, sink).await
    }

    /// Watch `root` with a custom builder and watch source.
    ///
    /// The builder's options are replaced by those from `config`; its
    /// observer and extractors are kept.
    pub async fn start_with(
        root: impl AsRef<Path>,
        config: &SyncConfig,
        builder: TreeMappingBuilder,
        source: &dyn WatchSource,
        sink: Arc<dyn DiffSink>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let mapping = builder
            .options(config.mapping_options())
            .watch(root, source)
            .await?;
        let mapping = Arc::new(mapping);

        tracing::info!(
            root = %mapping.root().display(),
            flush_interval_ms = config.flush_interval_ms,
            "Sync session started"
        );

        let stats = Arc::new(SessionStats::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let flusher = tokio::spawn(run_flush_loop(
            mapping.clone(),
            sink,
            stats.clone(),
            config.flush_interval(),
            shutdown_rx,
        ));

        Ok(Self {
            mapping,
            stats,
            shutdown_tx,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    /// The live mapping.
    pub fn mapping(&self) -> &TreeMapping {
        &self.mapping
    }

    /// Flush statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Apply queued events, stop the flush loop after one final flush, then
    /// dispose the mapping.
    pub async fn shutdown(&self) {
        self.mapping.settle().await;
        let _ = self.shutdown_tx.send(());

        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            if let Err(e) = flusher.await {
                tracing::error!(error = %e, "Flush loop failed");
            }
        }

        self.mapping.dispose();

        let stats = self.stats.snapshot();
        tracing::info!(
            root = %self.mapping.root().display(),
            flushes = stats.flushes,
            paths = stats.paths_delivered,
            "Sync session stopped"
        );
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.abort();
        }
        self.mapping.dispose();
    }
}

async fn run_flush_loop(
    mapping: Arc<TreeMapping>,
    sink: Arc<dyn DiffSink>,
    stats: Arc<SessionStats>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = mapping.flush_requested() => {
                tracing::debug!("Pending diff under pressure, flushing early");
                stats.record_pressure();
            }
            _ = shutdown_rx.recv() => {
                flush_once(&mapping, sink.as_ref(), &stats).await;
                break;
            }
        }

        flush_once(&mapping, sink.as_ref(), &stats).await;
    }
}

async fn flush_once(mapping: &TreeMapping, sink: &dyn DiffSink, stats: &SessionStats) {
    if !mapping.has_updates() {
        return;
    }

    let diff = mapping.flush_updates();
    let paths = diff.len();
    match sink.deliver(diff).await {
        Ok(()) => {
            stats.record_flush(paths);
            tracing::debug!(paths, "Diff delivered");
        }
        Err(e) => {
            stats.record_sink_failure();
            tracing::warn!(paths, error = %e, "Diff sink rejected flush");
        }
    }
}
