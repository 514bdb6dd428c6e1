//! Batch-level aggregation of per-identifier results.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::attempt::{AcquisitionResult, ExhaustionReason, serialize_millis};
use crate::source::AttemptOutcome;

/// Aggregate over every result of one batch.
///
/// Histograms use ordered maps so serialized reports are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Identifiers processed.
    pub total: usize,
    /// Identifiers with a stored artifact.
    pub succeeded: usize,
    /// Identifiers that ended exhausted.
    pub failed: usize,
    /// Successes per source name.
    pub by_source: BTreeMap<String, usize>,
    /// Failed attempts per outcome kind, across all identifiers.
    pub attempt_failures: BTreeMap<AttemptOutcome, usize>,
    /// Exhausted identifiers per reason.
    pub exhaustion: BTreeMap<ExhaustionReason, usize>,
    /// Sum of per-identifier elapsed time.
    #[serde(rename = "total_elapsed_ms", serialize_with = "serialize_millis")]
    pub total_elapsed: Duration,
    /// Longest single identifier.
    #[serde(rename = "max_elapsed_ms", serialize_with = "serialize_millis")]
    pub max_elapsed: Duration,
    /// Individual results in completion order.
    pub results: Vec<AcquisitionResult>,
}

impl BatchReport {
    /// Mean elapsed time per identifier.
    #[must_use]
    pub fn mean_elapsed(&self) -> Duration {
        match u32::try_from(self.total) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(total) => self.total_elapsed / total,
        }
    }

    /// True when every identifier succeeded (vacuously true for an empty batch).
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Writes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an IO error if serialization or the write fails.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Single collector that folds results into a [`BatchReport`] as they arrive.
///
/// Results may arrive in any order; the aggregator is owned by one task and
/// fed through a channel, so no synchronization is needed.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    report: BatchReport,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Results recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.report.total
    }

    /// True before the first result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.report.total == 0
    }

    /// Takes ownership of one result.
    pub fn record(&mut self, result: AcquisitionResult) {
        let report = &mut self.report;
        report.total += 1;
        report.total_elapsed += result.elapsed;
        report.max_elapsed = report.max_elapsed.max(result.elapsed);

        for attempt in result.attempts.iter().filter(|a| !a.is_success()) {
            *report.attempt_failures.entry(attempt.outcome).or_default() += 1;
        }

        if result.success {
            report.succeeded += 1;
            if let Some(source) = &result.source {
                *report.by_source.entry(source.clone()).or_default() += 1;
            }
        } else {
            report.failed += 1;
            let reason = result.exhaustion.unwrap_or(ExhaustionReason::AllSourcesFailed);
            *report.exhaustion.entry(reason).or_default() += 1;
        }

        report.results.push(result);
    }

    /// Finalizes the report.
    #[must_use]
    pub fn finish(self) -> BatchReport {
        let report = self.report;
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            mean_elapsed_ms = report.mean_elapsed().as_millis(),
            "batch complete"
        );
        report
    }
}
