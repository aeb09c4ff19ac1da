//! Strictly serial asynchronous job queue.
//!
//! Applying one job may suspend on I/O many times, but the next job never
//! starts before the current one has finished.

use crate::SyncError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Applies one queued job.
#[async_trait]
pub trait Apply<T: Send + 'static>: Send + Sync {
    /// Apply `job`. Failures are the applier's to log; the queue moves on.
    async fn apply(&self, job: T);
}

struct QueueShared {
    disposed: AtomicBool,
    pending: AtomicUsize,
    idle: Notify,
}

/// Serial worker feeding jobs to an [`Apply`] implementation.
pub struct UpdateQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> UpdateQueue<T> {
    /// Spawn the worker on the current tokio runtime.
    pub fn new(applier: Arc<dyn Apply<T>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            disposed: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let worker = tokio::spawn(run_worker(rx, applier, shared.clone()));

        Self {
            tx,
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a job behind everything appended before it.
    pub fn append(&self, job: T) -> Result<(), SyncError> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncError::Disposed);
        }

        Ok(())
    }

    /// Jobs appended but not yet completed.
    pub fn len(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Whether no job is queued or running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`UpdateQueue::dispose`] was called.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Wait until every appended job has been applied, or the queue is disposed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.is_empty() || self.is_disposed() {
                return;
            }
            notified.await;
        }
    }

    /// Stop the worker and drop every job not yet started. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }

        let dropped = self.shared.pending.swap(0, Ordering::SeqCst);
        self.shared.idle.notify_waiters();

        debug!(dropped, "Update queue disposed");
    }
}

impl<T> Drop for UpdateQueue<T> {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

async fn run_worker<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    applier: Arc<dyn Apply<T>>,
    shared: Arc<QueueShared>,
) {
    while let Some(job) = rx.recv().await {
        if shared.disposed.load(Ordering::SeqCst) {
            break;
        }

        // Each job runs as its own task so a panic cannot take the worker down.
        let applier = applier.clone();
        let running = tokio::spawn(async move { applier.apply(job).await });
        if let Err(e) = running.await {
            error!(error = %e, "Queued update failed");
        }

        let before = shared
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if before <= 1 {
            shared.idle.notify_waiters();
        }
    }
}
