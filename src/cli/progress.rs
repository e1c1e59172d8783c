//! Terminal progress display for batch runs

use crate::services::{BatchProgressUpdate, ProgressReporter};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Renders batch progress as an `indicatif` spinner with a counter
pub(crate) struct SpinnerProgressReporter {
    bar: ProgressBar,
}

impl SpinnerProgressReporter {
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub(crate) fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }
}

impl ProgressReporter for SpinnerProgressReporter {
    fn report_batch_progress(&self, update: BatchProgressUpdate) {
        self.bar.set_length(update.items_total as u64);
        self.bar.set_position(update.items_done() as u64);
        self.bar.set_message(update.current_item_name);
    }

    fn report_error(&self, item: &str, error: &str) {
        self.bar.println(format!("failed {}: {}", item, error));
    }
}
