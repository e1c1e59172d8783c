//! Progress reporting for batch operations
//!
//! Batch workers finish items concurrently; [`ProgressTracker`] keeps the
//! shared counters and forwards a snapshot to a [`ProgressReporter`] after
//! every item.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of batch progress after an item finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgressUpdate {
    /// Number of items completed successfully
    pub items_completed: usize,
    /// Number of items that failed processing
    pub items_failed: usize,
    /// Total number of items to process
    pub items_total: usize,
    /// Name of the item that just finished
    pub current_item_name: String,
}

impl BatchProgressUpdate {
    /// Items finished either way
    #[must_use]
    pub fn items_done(&self) -> usize {
        self.items_completed + self.items_failed
    }

    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        if self.items_total == 0 {
            return 100;
        }
        ((self.items_done() * 100) / self.items_total).min(100) as u8
    }
}

/// Trait for reporting progress during batch processing
pub trait ProgressReporter: Send + Sync {
    /// Report that one more item finished
    fn report_batch_progress(&self, update: BatchProgressUpdate);

    /// Report an item failure
    fn report_error(&self, item: &str, error: &str) {
        let _ = (item, error);
    }
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_batch_progress(&self, _update: BatchProgressUpdate) {}
}

/// Shared counters for one batch run
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>, total: usize) -> Self {
        Self {
            reporter,
            total,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn no_op(total: usize) -> Self {
        Self::new(Arc::new(NoOpProgressReporter), total)
    }

    /// Record a successful item
    pub fn record_success(&self, item: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.report(item);
    }

    /// Record a failed item
    pub fn record_failure(&self, item: &str, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.reporter.report_error(item, error);
        self.report(item);
    }

    fn report(&self, item: &str) {
        self.reporter.report_batch_progress(BatchProgressUpdate {
            items_completed: self.completed.load(Ordering::SeqCst),
            items_failed: self.failed.load(Ordering::SeqCst),
            items_total: self.total,
            current_item_name: item.to_string(),
        });
    }
}
