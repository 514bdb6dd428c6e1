//! Bounded retries with exponential backoff around a single source.
//!
//! [`RetryPolicy`] decides whether and when to retry; [`RetryController`]
//! drives one source through up to `max_attempts` attempts, enforcing the
//! per-attempt timeout, the per-source total ceiling, the identifier deadline
//! and batch cancellation.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(k) = min(base_delay * multiplier^(k-1) * (1 ± jitter), max_delay)
//! ```
//!
//! where `k` is the attempt that just failed. The controller additionally
//! keeps delays non-decreasing within one source and never waits less than
//! a server-supplied `Retry-After`.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::attempt::AttemptRecord;
use super::cancel::CancelToken;
use super::host_limiter::HostLimiter;
use crate::request::AcquisitionRequest;
use crate::source::{
    AttemptContext, FailureType, RawArtifact, SourceAdapter, SourceError, classify_error,
};

/// Default maximum attempts per source.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.2;
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(180);

/// Decision after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`; `attempt` is the number of the next attempt.
    Retry {
        /// How long to wait.
        delay: Duration,
        /// Next attempt number (1-indexed).
        attempt: u32,
    },
    /// Stop retrying this source.
    DoNotRetry {
        /// Why.
        reason: String,
    },
}

/// Retry configuration for one source.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0
/// - `jitter`: 0.2 (±20 %)
/// - `attempt_timeout`: 60 seconds
/// - `total_timeout`: 180 seconds
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    attempt_timeout: Duration,
    total_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            total_timeout: DEFAULT_TOTAL_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom backoff settings and default timeouts.
    ///
    /// `max_attempts` is clamped to at least 1, `multiplier` to at least 1.0
    /// and `jitter` into `0.0..=1.0`.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    /// Default policy with a custom attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns a copy with per-attempt and per-source timeouts replaced.
    #[must_use]
    pub fn with_timeouts(mut self, attempt_timeout: Duration, total_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self.total_timeout = total_timeout.max(attempt_timeout);
        self
    }

    /// Returns a copy with a different attempt budget.
    #[must_use]
    pub fn override_attempts(&self, max_attempts: Option<u32>) -> Self {
        match max_attempts {
            Some(max_attempts) => Self {
                max_attempts: max_attempts.max(1),
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// Maximum attempts including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Timeout for a single attempt.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Ceiling on time spent on one source, including backoff.
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    /// Decides whether to retry after `attempt` (1-indexed) failed with `failure_type`.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Terminal {
            return RetryDecision::DoNotRetry {
                reason: "terminal failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        let delay_ms = base_ms * self.multiplier.powi(exponent) * factor;
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped_ms as u64)
    }
}

/// How one source's run ended.
#[derive(Debug)]
pub enum SourceOutcome {
    /// Bytes obtained on attempt `attempt`; not yet validated.
    Fetched {
        /// The fetched bytes.
        artifact: RawArtifact,
        /// Attempt number that succeeded.
        attempt: u32,
        /// When that attempt started.
        started_at: chrono::DateTime<Utc>,
    },
    /// A terminal failure; no further attempts on this source.
    Terminal,
    /// Transient failures used up the attempt budget or the per-source ceiling.
    Exhausted,
    /// The identifier deadline expired.
    DeadlineExceeded,
    /// The batch was cancelled.
    Cancelled,
}

/// Attempt records plus the final outcome for one source.
#[derive(Debug)]
pub struct SourceRun {
    /// Failed attempts, in order. A successful fetch is recorded by the caller after validation.
    pub records: Vec<AttemptRecord>,
    /// How the run ended.
    pub outcome: SourceOutcome,
}

enum Stop {
    Deadline,
    Cancelled,
}

/// Runs one source under a [`RetryPolicy`], honoring host limits.
#[derive(Debug, Clone, Copy)]
pub struct RetryController<'a> {
    limiter: &'a HostLimiter,
}

impl<'a> RetryController<'a> {
    /// Creates a controller using `limiter` for host permits.
    #[must_use]
    pub fn new(limiter: &'a HostLimiter) -> Self {
        Self { limiter }
    }

    /// Drives `adapter` until it fetches bytes, fails terminally, exhausts
    /// its budget, hits `deadline`, or `cancel` fires.
    #[instrument(
        skip(self, adapter, request, policy, cancel),
        fields(doi = %request.doi(), source = %adapter.descriptor().name)
    )]
    pub async fn run(
        &self,
        adapter: &dyn SourceAdapter,
        request: &AcquisitionRequest,
        policy: &RetryPolicy,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> SourceRun {
        let descriptor = adapter.descriptor();
        let policy = policy.override_attempts(descriptor.max_attempts);
        let source_deadline = (Instant::now() + policy.total_timeout()).min(deadline);
        let mut records = Vec::new();
        let mut previous_delay = Duration::ZERO;
        let mut attempt = 1;

        loop {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return stopped(records, &Stop::Cancelled),
                () = tokio::time::sleep_until(deadline) => return stopped(records, &Stop::Deadline),
                permit = self.limiter.acquire(&descriptor.host) => permit,
            };

            let started_at = Utc::now();
            let attempt_deadline = (Instant::now() + policy.attempt_timeout()).min(source_deadline);
            let ctx = AttemptContext {
                attempt,
                deadline: attempt_deadline,
                cancel: cancel.clone(),
            };

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(SourceError::Cancelled),
                result = adapter.attempt(request, &ctx) => result,
                () = tokio::time::sleep_until(attempt_deadline) => Err(SourceError::timeout(format!(
                    "{} attempt {attempt} exceeded {}ms",
                    descriptor.name,
                    policy.attempt_timeout().as_millis()
                ))),
            };
            drop(permit);

            let error = match result {
                Ok(artifact) => {
                    debug!(attempt, bytes = artifact.bytes.len(), "source returned bytes");
                    return SourceRun {
                        records,
                        outcome: SourceOutcome::Fetched {
                            artifact,
                            attempt,
                            started_at,
                        },
                    };
                }
                Err(error) => error,
            };

            debug!(attempt, error = %error, "attempt failed");
            records.push(AttemptRecord {
                source: descriptor.name.clone(),
                attempt,
                started_at,
                ended_at: Utc::now(),
                outcome: error.outcome(),
                bytes: None,
                detail: Some(error.to_string()),
            });

            if matches!(error, SourceError::Cancelled) {
                return SourceRun {
                    records,
                    outcome: SourceOutcome::Cancelled,
                };
            }
            if Instant::now() >= deadline {
                return SourceRun {
                    records,
                    outcome: SourceOutcome::DeadlineExceeded,
                };
            }

            let failure_type = classify_error(&error);
            let delay = match policy.should_retry(failure_type, attempt) {
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "not retrying source");
                    let outcome = if failure_type == FailureType::Terminal {
                        SourceOutcome::Terminal
                    } else {
                        SourceOutcome::Exhausted
                    };
                    return SourceRun { records, outcome };
                }
                RetryDecision::Retry { delay, .. } => delay,
            };

            let mut delay = delay.max(previous_delay);
            if let Some(retry_after) = error.retry_after() {
                self.limiter.defer(&descriptor.host, retry_after);
                delay = delay.max(retry_after);
            }
            previous_delay = delay;

            if Instant::now() + delay >= source_deadline && source_deadline < deadline {
                debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "backoff would exceed per-source ceiling"
                );
                return SourceRun {
                    records,
                    outcome: SourceOutcome::Exhausted,
                };
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return stopped(records, &Stop::Cancelled),
                () = tokio::time::sleep_until(deadline) => return stopped(records, &Stop::Deadline),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn stopped(records: Vec<AttemptRecord>, stop: &Stop) -> SourceRun {
    let outcome = match stop {
        Stop::Deadline => SourceOutcome::DeadlineExceeded,
        Stop::Cancelled => SourceOutcome::Cancelled,
    };
    SourceRun { records, outcome }
}
