//! Per-identifier fallback chain.
//!
//! The orchestrator walks one identifier through an explicit state machine:
//!
//! ```text
//! Pending -> Classifying -> TryingSource(0) -> Validating(0) -> Succeeded
//!                               |                  |
//!                               v                  v
//!                        TryingSource(1) <---------+
//!                               |
//!                               v
//!                           Exhausted
//! ```
//!
//! Every layer below returns a tagged outcome instead of an error, so the
//! only `Err` this module produces is a fatal storage failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::attempt::{AcquisitionResult, AttemptRecord, ExhaustionReason};
use super::cancel::CancelToken;
use super::error::AcquireError;
use super::host_limiter::HostLimiter;
use super::retry::{RetryController, RetryPolicy, SourceOutcome};
use super::storage::ArtifactStore;
use super::validate::ArtifactValidator;
use crate::classify::{AccessClassifier, AccessStatus, order_sources};
use crate::request::AcquisitionRequest;
use crate::source::{AttemptOutcome, SourceAdapter};

/// Default wall-clock budget for one identifier.
pub const DEFAULT_IDENTIFIER_DEADLINE: Duration = Duration::from_secs(300);

/// Detail recorded when a previously stored artifact is reused.
pub const ALREADY_PRESENT: &str = "already present";

/// Position of one identifier in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Not started.
    Pending,
    /// Waiting for the access classifier.
    Classifying,
    /// Running the source at this index of the ordered list.
    TryingSource(usize),
    /// Checking bytes fetched from the source at this index.
    Validating(usize),
    /// Artifact stored.
    Succeeded,
    /// No artifact; see the exhaustion reason.
    Exhausted,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Classifying => f.write_str("classifying"),
            Self::TryingSource(i) => write!(f, "trying_source({i})"),
            Self::Validating(i) => write!(f, "validating({i})"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Exhausted => f.write_str("exhausted"),
        }
    }
}

/// Tunables for [`FallbackOrchestrator`].
#[derive(Debug, Clone)]
pub struct ChainSettings {
    /// Retry policy applied to every source (per-source overrides still apply).
    pub policy: RetryPolicy,
    /// Acceptance rules for fetched bytes.
    pub validator: ArtifactValidator,
    /// Wall-clock budget for one identifier across all states.
    pub deadline: Duration,
    /// Reuse an already stored, valid artifact instead of fetching.
    pub skip_existing: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            validator: ArtifactValidator::default(),
            deadline: DEFAULT_IDENTIFIER_DEADLINE,
            skip_existing: false,
        }
    }
}

/// Drives one identifier through classification and the ordered sources.
pub struct FallbackOrchestrator {
    sources: Vec<Arc<dyn SourceAdapter>>,
    classifier: AccessClassifier,
    limiter: Arc<HostLimiter>,
    store: ArtifactStore,
    settings: ChainSettings,
}

impl fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .sources
            .iter()
            .map(|s| s.descriptor().name.as_str())
            .collect();
        f.debug_struct("FallbackOrchestrator")
            .field("sources", &names)
            .field("classifier", &self.classifier)
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Mutable bookkeeping for one run. Dropped once the result is emitted.
struct Chain<'a> {
    request: &'a AcquisitionRequest,
    state: ChainState,
    started: Instant,
    access: AccessStatus,
    records: Vec<AttemptRecord>,
}

impl<'a> Chain<'a> {
    fn new(request: &'a AcquisitionRequest) -> Self {
        Self {
            request,
            state: ChainState::Pending,
            started: Instant::now(),
            access: AccessStatus::Unknown,
            records: Vec::new(),
        }
    }

    fn transition(&mut self, next: ChainState) {
        debug!(doi = %self.request.doi(), from = %self.state, to = %next, "chain transition");
        self.state = next;
    }

    fn succeed(mut self, source: &str, artifact: std::path::PathBuf) -> AcquisitionResult {
        self.transition(ChainState::Succeeded);
        let elapsed = self.started.elapsed();
        info!(
            doi = %self.request.doi(),
            source,
            attempts = self.records.len(),
            elapsed_ms = elapsed.as_millis(),
            "acquired"
        );
        AcquisitionResult {
            doi: self.request.doi().to_string(),
            success: true,
            source: Some(source.to_string()),
            artifact: Some(artifact),
            access: self.access,
            attempts: self.records,
            elapsed,
            exhaustion: None,
        }
    }

    fn exhaust(mut self, reason: ExhaustionReason) -> AcquisitionResult {
        self.transition(ChainState::Exhausted);
        let elapsed = self.started.elapsed();
        warn!(
            doi = %self.request.doi(),
            reason = reason.as_str(),
            attempts = self.records.len(),
            elapsed_ms = elapsed.as_millis(),
            "acquisition exhausted"
        );
        AcquisitionResult {
            doi: self.request.doi().to_string(),
            success: false,
            source: None,
            artifact: None,
            access: self.access,
            attempts: self.records,
            elapsed,
            exhaustion: Some(reason),
        }
    }
}

impl FallbackOrchestrator {
    /// Creates an orchestrator over `sources` in configured order.
    ///
    /// Ordering per identifier is decided by [`order_sources`] after
    /// classification; disabled sources are never attempted.
    #[must_use]
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        classifier: AccessClassifier,
        limiter: Arc<HostLimiter>,
        store: ArtifactStore,
        settings: ChainSettings,
    ) -> Self {
        Self {
            sources,
            classifier,
            limiter,
            store,
            settings,
        }
    }

    /// Configured sources, unordered.
    #[must_use]
    pub fn sources(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.sources
    }

    /// Shared host limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<HostLimiter> {
        &self.limiter
    }

    /// Output store.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs the full chain for `request` and emits exactly one result.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Storage`] when a validated artifact cannot be
    /// written. Source failures never surface here; they are recorded in the
    /// result's attempt trail.
    #[instrument(skip(self, request, cancel), fields(doi = %request.doi()))]
    pub async fn run(
        &self,
        request: &AcquisitionRequest,
        cancel: &CancelToken,
    ) -> Result<AcquisitionResult, AcquireError> {
        let mut chain = Chain::new(request);
        let deadline = chain.started + self.settings.deadline;

        if cancel.is_cancelled() {
            return Ok(chain.exhaust(ExhaustionReason::Cancelled));
        }

        if self.settings.skip_existing
            && let Some((source, path, bytes)) = self.find_existing(request).await
        {
            let now = Utc::now();
            chain.records.push(AttemptRecord {
                source: source.clone(),
                attempt: 1,
                started_at: now,
                ended_at: now,
                outcome: AttemptOutcome::Success,
                bytes: Some(bytes),
                detail: Some(ALREADY_PRESENT.to_string()),
            });
            return Ok(chain.succeed(&source, path));
        }

        chain.transition(ChainState::Classifying);
        chain.access = tokio::time::timeout_at(deadline, self.classifier.classify(request, cancel))
            .await
            .unwrap_or(AccessStatus::Unknown);

        let ordered = order_sources(chain.access, &self.sources);
        debug!(
            access = %chain.access,
            order = ?ordered.iter().map(|s| s.descriptor().name.as_str()).collect::<Vec<_>>(),
            "source order resolved"
        );

        let controller = RetryController::new(&self.limiter);
        for (index, source) in ordered.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(chain.exhaust(ExhaustionReason::Cancelled));
            }
            if Instant::now() >= deadline {
                return Ok(chain.exhaust(ExhaustionReason::DeadlineExceeded));
            }

            chain.transition(ChainState::TryingSource(index));
            let name = source.descriptor().name.as_str();
            let run = controller
                .run(source.as_ref(), request, &self.settings.policy, deadline, cancel)
                .await;
            chain.records.extend(run.records);

            let (artifact, attempt, started_at) = match run.outcome {
                SourceOutcome::Fetched {
                    artifact,
                    attempt,
                    started_at,
                } => (artifact, attempt, started_at),
                SourceOutcome::Terminal | SourceOutcome::Exhausted => {
                    debug!(source = name, "source failed; advancing");
                    continue;
                }
                SourceOutcome::DeadlineExceeded => {
                    return Ok(chain.exhaust(ExhaustionReason::DeadlineExceeded));
                }
                SourceOutcome::Cancelled => {
                    return Ok(chain.exhaust(ExhaustionReason::Cancelled));
                }
            };

            chain.transition(ChainState::Validating(index));
            let bytes = artifact.bytes.len() as u64;
            let verdict = self
                .settings
                .validator
                .validate(&artifact.bytes, artifact.content_type.as_deref());

            if !verdict.is_valid() {
                debug!(source = name, url = %artifact.url, %verdict, "artifact rejected; advancing");
                chain.records.push(AttemptRecord {
                    source: name.to_string(),
                    attempt,
                    started_at,
                    ended_at: Utc::now(),
                    outcome: AttemptOutcome::ValidationError,
                    bytes: Some(bytes),
                    detail: Some(verdict.to_string()),
                });
                continue;
            }

            let path = self.store.write(request, name, &artifact.bytes).await?;
            chain.records.push(AttemptRecord {
                source: name.to_string(),
                attempt,
                started_at,
                ended_at: Utc::now(),
                outcome: AttemptOutcome::Success,
                bytes: Some(bytes),
                detail: None,
            });
            return Ok(chain.succeed(name, path));
        }

        Ok(chain.exhaust(ExhaustionReason::AllSourcesFailed))
    }

    async fn find_existing(
        &self,
        request: &AcquisitionRequest,
    ) -> Option<(String, std::path::PathBuf, u64)> {
        for source in self.sources.iter().filter(|s| s.descriptor().enabled) {
            let name = &source.descriptor().name;
            let Some(bytes) = self.store.read_existing(request, name).await else {
                continue;
            };
            if self.settings.validator.validate(&bytes, None).is_valid() {
                debug!(source = %name, "reusing stored artifact");
                return Some((
                    name.clone(),
                    self.store.path_for(request, name),
                    bytes.len() as u64,
                ));
            }
            debug!(source = %name, "stored artifact invalid; fetching again");
        }
        None
    }
}
