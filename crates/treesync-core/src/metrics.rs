//! Counters for a running sync session.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic statistics for flush activity.
pub struct SessionStats {
    /// Number of non-empty diffs delivered
    pub flushes: AtomicU64,
    /// Sum of paths mentioned by delivered diffs
    pub paths_delivered: AtomicU64,
    /// Flushes triggered early by pending diff pressure
    pub pressure_flushes: AtomicU64,
    /// Deliveries the sink rejected
    pub sink_failures: AtomicU64,
    /// Session start time
    start_time: Instant,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    /// Create a new stats instance.
    pub fn new() -> Self {
        Self {
            flushes: AtomicU64::new(0),
            paths_delivered: AtomicU64::new(0),
            pressure_flushes: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a delivered diff.
    pub fn record_flush(&self, paths: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.paths_delivered
            .fetch_add(paths as u64, Ordering::Relaxed);
    }

    /// Record an early flush.
    pub fn record_pressure(&self) {
        self.pressure_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected delivery.
    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Average number of paths per delivered diff.
    pub fn avg_paths_per_flush(&self) -> f64 {
        let flushes = self.flushes.load(Ordering::Relaxed);
        let paths = self.paths_delivered.load(Ordering::Relaxed);
        if flushes == 0 {
            0.0
        } else {
            paths as f64 / flushes as f64
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            paths_delivered: self.paths_delivered.load(Ordering::Relaxed),
            pressure_flushes: self.pressure_flushes.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            uptime_secs: self.uptime_secs(),
        }
    }
}

/// Serializable copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub flushes: u64,
    pub paths_delivered: u64,
    pub pressure_flushes: u64,
    pub sink_failures: u64,
    pub uptime_secs: u64,
}
