//! Bounded worker pool that runs one fallback chain per identifier.
//!
//! Concurrency follows the semaphore pattern: a permit is acquired before each
//! task is spawned and released when the task finishes. Results flow through
//! an mpsc channel to a single collector, so completion order is arbitrary and
//! the aggregator needs no locking. Per-host politeness is enforced below this
//! layer by the shared [`HostLimiter`](super::HostLimiter).

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::cancel::CancelToken;
use super::error::{AcquireError, MAX_WORKERS, MIN_WORKERS};
use super::orchestrator::FallbackOrchestrator;
use super::report::{BatchReport, ResultAggregator};
use crate::request::AcquisitionRequest;

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 4;

/// Global concurrency settings for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl ConcurrencyConfig {
    /// Creates a config with `workers` concurrent orchestrations.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::InvalidWorkers`] outside `1..=64`.
    pub fn new(workers: usize) -> Result<Self, AcquireError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(AcquireError::InvalidWorkers { value: workers });
        }
        Ok(Self { workers })
    }

    /// Worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Observer notified as each identifier completes (e.g. a progress bar).
pub trait BatchObserver: Send + Sync {
    /// Called once per finished identifier, in completion order.
    fn on_result(&self, doi: &str, success: bool);
}

/// Runs many identifiers under a fixed worker budget.
#[derive(Clone)]
pub struct ConcurrencyDispatcher {
    config: ConcurrencyConfig,
    observer: Option<Arc<dyn BatchObserver>>,
}

impl std::fmt::Debug for ConcurrencyDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyDispatcher")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

type TaskOutcome = Result<super::attempt::AcquisitionResult, AcquireError>;

impl ConcurrencyDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Attaches a completion observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs every request and returns the aggregated report.
    ///
    /// Identifiers are pulled in submission order but complete in any order.
    /// A fatal error from any chain cancels the remaining work of this batch
    /// through a child of `cancel`; `cancel` itself is never signalled here.
    ///
    /// # Errors
    ///
    /// - [`AcquireError::DuplicateIdentifier`] when a DOI appears twice
    /// - [`AcquireError::Storage`] when a validated artifact cannot be written
    /// - [`AcquireError::TaskFailed`] when a worker panics
    #[instrument(skip_all, fields(requests = requests.len(), workers = self.config.workers))]
    pub async fn run_batch(
        &self,
        orchestrator: Arc<FallbackOrchestrator>,
        requests: Vec<AcquisitionRequest>,
        cancel: &CancelToken,
    ) -> Result<BatchReport, AcquireError> {
        reject_duplicates(&requests)?;

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let (tx, mut rx) = mpsc::channel::<TaskOutcome>(self.config.workers * 2);
        let batch_cancel = cancel.child();

        info!("starting batch");

        let producer_cancel = batch_cancel.clone();
        let producer = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            for request in requests {
                // Cancelled chains still emit a result so every identifier is reported.
                if producer_cancel.is_cancelled() {
                    debug!(doi = %request.doi(), "batch cancelled; recording without attempts");
                }

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };

                let orchestrator = Arc::clone(&orchestrator);
                let cancel = producer_cancel.clone();
                let tx = tx.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = orchestrator.run(&request, &cancel).await;
                    let _ = tx.send(outcome).await;
                });
            }
            drop(tx);

            let mut failure = None;
            while let Some(joined) = tasks.join_next().await {
                if let Err(error) = joined {
                    warn!(error = %error, "acquisition task panicked");
                    producer_cancel.cancel();
                    failure.get_or_insert_with(|| AcquireError::TaskFailed(error.to_string()));
                }
            }
            failure
        });

        let mut aggregator = ResultAggregator::new();
        let mut fatal = None;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(result) => {
                    if let Some(observer) = &self.observer {
                        observer.on_result(&result.doi, result.success);
                    }
                    aggregator.record(result);
                }
                Err(error) => {
                    warn!(error = %error, "fatal error; cancelling batch");
                    batch_cancel.cancel();
                    fatal.get_or_insert(error);
                }
            }
        }

        let panicked = producer
            .await
            .map_err(|e| AcquireError::TaskFailed(e.to_string()))?;
        if let Some(error) = fatal.or(panicked) {
            return Err(error);
        }

        Ok(aggregator.finish())
    }
}

fn reject_duplicates(requests: &[AcquisitionRequest]) -> Result<(), AcquireError> {
    let mut seen = HashSet::with_capacity(requests.len());
    for request in requests {
        if !seen.insert(request.doi()) {
            return Err(AcquireError::DuplicateIdentifier {
                doi: request.doi().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_config_bounds() {
        assert!(ConcurrencyConfig::new(1).is_ok());
        assert!(ConcurrencyConfig::new(64).is_ok());
        assert!(matches!(
            ConcurrencyConfig::new(0),
            Err(AcquireError::InvalidWorkers { value: 0 })
        ));
        assert!(matches!(
            ConcurrencyConfig::new(65),
            Err(AcquireError::InvalidWorkers { value: 65 })
        ));
        assert_eq!(ConcurrencyConfig::default().workers(), DEFAULT_WORKERS);
    }

    #[test]
    fn test_reject_duplicates_after_normalization() {
        let requests = vec![
            AcquisitionRequest::new("10.1234/ABC").unwrap(),
            AcquisitionRequest::new("https://doi.org/10.1234/abc").unwrap(),
        ];
        let error = reject_duplicates(&requests).unwrap_err();
        assert!(matches!(error, AcquireError::DuplicateIdentifier { ref doi } if doi == "10.1234/abc"));
    }

    #[test]
    fn test_reject_duplicates_accepts_distinct() {
        let requests = vec![
            AcquisitionRequest::new("10.1234/a").unwrap(),
            AcquisitionRequest::new("10.1234/b").unwrap(),
        ];
        assert!(reject_duplicates(&requests).is_ok());
    }
}
