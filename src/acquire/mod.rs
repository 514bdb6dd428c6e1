//! Acquisition engine: retries, host limits, validation, the per-identifier
//! fallback chain and the batch dispatcher.
//!
//! # Architecture
//!
//! - [`Engine`] - Facade wiring everything below together
//! - [`ConcurrencyDispatcher`] - Bounded worker pool, one chain per identifier
//! - [`FallbackOrchestrator`] - Explicit [`ChainState`] machine across sources
//! - [`RetryController`] - Bounded retries with backoff for one source
//! - [`HostLimiter`] - Per-host concurrency and spacing, shared by all workers
//! - [`ArtifactValidator`] - Rejects HTML pages, truncated and tiny files
//! - [`ArtifactStore`] - `{identifier}_{source}.pdf` files with atomic writes
//! - [`ResultAggregator`] - Folds results into a [`BatchReport`]

mod attempt;
mod cancel;
mod dispatcher;
mod engine;
mod error;
mod host_limiter;
mod orchestrator;
mod report;
mod retry;
mod storage;
mod validate;

pub use attempt::{AcquisitionResult, AttemptRecord, ExhaustionReason};
pub use cancel::CancelToken;
pub use dispatcher::{BatchObserver, ConcurrencyConfig, ConcurrencyDispatcher, DEFAULT_WORKERS};
pub use engine::{Engine, EngineBuilder};
pub use error::{AcquireError, MAX_WORKERS, MIN_WORKERS};
pub use host_limiter::{HostLimiter, HostPermit, parse_retry_after};
pub use orchestrator::{
    ALREADY_PRESENT, ChainSettings, ChainState, DEFAULT_IDENTIFIER_DEADLINE, FallbackOrchestrator,
};
pub use report::{BatchReport, ResultAggregator};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, RetryController, RetryDecision, RetryPolicy, SourceOutcome, SourceRun,
};
pub use storage::{ArtifactStore, PDF_EXTENSION};
pub use validate::{ArtifactValidator, DEFAULT_MIN_ARTIFACT_BYTES, Validation};
