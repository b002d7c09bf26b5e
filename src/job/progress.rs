//! Live progress counters and point-in-time snapshots.
//!
//! Workers apply increments concurrently. Every multi-counter update holds
//! the shared side of `gate`, and [`ProgressTracker::snapshot`] holds the
//! exclusive side while copying, so a snapshot never observes half of an
//! update (for example `processed` bumped without the matching `skipped`).

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

/// Thread-safe counters for one import job.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    gate: RwLock<()>,
    started: OnceLock<Instant>,
    elapsed_at_finish: OnceLock<Duration>,
    completed: AtomicBool,
    total_rows: AtomicU64,
    rows_read: AtomicU64,
    bytes_read: AtomicU64,
    processed: AtomicU64,
    imported: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Immutable copy of a tracker's counters and derived rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total_rows: u64,
    pub processed_rows: u64,
    pub imported_rows: u64,
    pub failed_rows: u64,
    pub skipped_rows: u64,
    pub bytes_read: u64,
    pub elapsed_seconds: f64,
    pub rows_per_second: f64,
    pub estimated_seconds_remaining: Option<f64>,
    pub percent_complete: f64,
    pub is_completed: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the clock and seed the total-row estimate.
    pub fn start(&self, estimated_rows: u64) {
        let _guard = self.shared();
        let _ = self.started.set(Instant::now());
        self.total_rows.store(estimated_rows, Ordering::Relaxed);
    }

    /// Reader position: data rows and bytes consumed so far.
    pub fn record_read(&self, rows_read: u64, bytes_read: u64) {
        let _guard = self.shared();
        self.rows_read.fetch_max(rows_read, Ordering::Relaxed);
        self.bytes_read.fetch_max(bytes_read, Ordering::Relaxed);
    }

    /// A row passed the filter and is headed for the writer.
    pub fn record_qualified(&self) {
        let _guard = self.shared();
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// A valid row that did not pass the filter.
    pub fn record_skipped(&self) {
        let _guard = self.shared();
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A row rejected for its shape or contents.
    pub fn record_failed_row(&self) {
        let _guard = self.shared();
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was persisted.
    pub fn record_imported(&self, rows: u64) {
        let _guard = self.shared();
        self.imported.fetch_add(rows, Ordering::Relaxed);
    }

    /// A batch exhausted its write retries.
    pub fn record_batch_failed(&self, rows: u64) {
        let _guard = self.shared();
        self.failed.fetch_add(rows, Ordering::Relaxed);
    }

    /// Freeze the clock. `completed` pins the total to the rows actually read.
    pub fn finish(&self, completed: bool) {
        let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let elapsed = self.started.get().map(Instant::elapsed).unwrap_or_default();
        let _ = self.elapsed_at_finish.set(elapsed);
        if completed {
            self.completed.store(true, Ordering::Relaxed);
        }
    }

    /// Consistent point-in-time view of the counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let (estimate, rows_read, bytes_read, processed, imported, failed, skipped, completed) = {
            let _guard = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            (
                self.total_rows.load(Ordering::Relaxed),
                self.rows_read.load(Ordering::Relaxed),
                self.bytes_read.load(Ordering::Relaxed),
                self.processed.load(Ordering::Relaxed),
                self.imported.load(Ordering::Relaxed),
                self.failed.load(Ordering::Relaxed),
                self.skipped.load(Ordering::Relaxed),
                self.completed.load(Ordering::Relaxed),
            )
        };

        let elapsed = match (self.elapsed_at_finish.get(), self.started.get()) {
            (Some(frozen), _) => *frozen,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        };
        let elapsed_seconds = elapsed.as_secs_f64();

        let total_rows = if completed {
            rows_read
        } else {
            estimate.max(rows_read).max(processed)
        };

        let rows_per_second = if elapsed_seconds > 0.0 {
            processed as f64 / elapsed_seconds
        } else {
            0.0
        };

        let estimated_seconds_remaining = if total_rows == 0 || rows_per_second == 0.0 {
            None
        } else {
            Some(total_rows.saturating_sub(processed) as f64 / rows_per_second)
        };

        let percent_complete = if completed {
            100.0
        } else if total_rows == 0 {
            0.0
        } else {
            (processed as f64 / total_rows as f64 * 100.0).min(100.0)
        };

        ProgressSnapshot {
            total_rows,
            processed_rows: processed,
            imported_rows: imported,
            failed_rows: failed,
            skipped_rows: skipped,
            bytes_read,
            elapsed_seconds,
            rows_per_second,
            estimated_seconds_remaining,
            percent_complete,
            is_completed: completed,
        }
    }
}

impl ProgressSnapshot {
    /// Snapshot of a job slot with nothing running.
    pub fn empty() -> Self {
        ProgressTracker::new().snapshot()
    }
}
