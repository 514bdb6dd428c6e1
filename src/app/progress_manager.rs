//! Progress bar for batch runs.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use paperfetch_core::acquire::BatchObserver;

/// Progress bar advanced once per finished identifier.
#[derive(Debug)]
pub(crate) struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub(crate) fn new(total: usize) -> Self {
        let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    #[cfg(test)]
    fn hidden(total: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(u64::try_from(total).unwrap_or(u64::MAX));
        Self { bar }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchObserver for ProgressReporter {
    fn on_result(&self, doi: &str, success: bool) {
        let mark = if success { "ok" } else { "failed" };
        self.bar.set_message(format!("{doi} {mark}"));
        self.bar.inc(1);
    }
}

/// Creates the reporter when a bar should be shown.
pub(crate) fn progress_reporter(use_bar: bool, total: usize) -> Option<Arc<ProgressReporter>> {
    use_bar.then(|| Arc::new(ProgressReporter::new(total)))
}
