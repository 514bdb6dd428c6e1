//! Public entry point: [`Engine::acquire`] and [`Engine::acquire_batch`].
//!
//! # Example
//!
//! ```no_run
//! use paperfetch_core::acquire::{ConcurrencyConfig, Engine};
//! use paperfetch_core::request::AcquisitionRequest;
//! use paperfetch_core::source::{SourceOptions, build_default_sources};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder("./papers")
//!     .sources(build_default_sources(&SourceOptions::default()))
//!     .build()
//!     .await?;
//! let request = AcquisitionRequest::new("10.1371/journal.pone.0000001")?;
//! let result = engine.acquire(request).await?;
//! println!("success: {}", result.success);
//!
//! let batch = vec![AcquisitionRequest::new("10.1234/a")?, AcquisitionRequest::new("10.1234/b")?];
//! let report = engine.acquire_batch(batch, &ConcurrencyConfig::new(4)?).await?;
//! println!("{}/{} succeeded", report.succeeded, report.total);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::attempt::AcquisitionResult;
use super::cancel::CancelToken;
use super::dispatcher::{BatchObserver, ConcurrencyConfig, ConcurrencyDispatcher};
use super::error::AcquireError;
use super::host_limiter::HostLimiter;
use super::orchestrator::{ChainSettings, FallbackOrchestrator};
use super::report::BatchReport;
use super::storage::ArtifactStore;
use crate::classify::AccessClassifier;
use crate::request::AcquisitionRequest;
use crate::source::SourceAdapter;

/// Configured acquisition engine. Cheap to share behind an `Arc`.
pub struct Engine {
    orchestrator: Arc<FallbackOrchestrator>,
    cancel: CancelToken,
    observer: Option<Arc<dyn BatchObserver>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("orchestrator", &self.orchestrator)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    output_dir: PathBuf,
    sources: Vec<Arc<dyn SourceAdapter>>,
    classifier: AccessClassifier,
    settings: ChainSettings,
    rate_limits: bool,
    cancel: CancelToken,
    observer: Option<Arc<dyn BatchObserver>>,
}

impl EngineBuilder {
    /// Sources in configured order.
    #[must_use]
    pub fn sources(mut self, sources: Vec<Arc<dyn SourceAdapter>>) -> Self {
        self.sources = sources;
        self
    }

    /// Access classifier; defaults to disabled.
    #[must_use]
    pub fn classifier(mut self, classifier: AccessClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Retry, validation and deadline settings.
    #[must_use]
    pub fn settings(mut self, settings: ChainSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Turns per-host limiting off (tests against local mocks).
    #[must_use]
    pub fn rate_limits(mut self, enabled: bool) -> Self {
        self.rate_limits = enabled;
        self
    }

    /// Uses an externally owned cancellation token (e.g. wired to Ctrl-C).
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Observer for batch progress.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validates configuration and prepares the output directory.
    ///
    /// # Errors
    ///
    /// - [`AcquireError::NoSources`] when no source is enabled
    /// - [`AcquireError::InvalidSourceName`] / [`AcquireError::DuplicateSource`]
    /// - [`AcquireError::OutputDirUnwritable`]
    #[instrument(skip(self), fields(output_dir = %self.output_dir.display(), sources = self.sources.len()))]
    pub async fn build(self) -> Result<Engine, AcquireError> {
        let mut names = HashSet::new();
        for source in &self.sources {
            let descriptor = source.descriptor();
            if !descriptor.has_valid_name() {
                return Err(AcquireError::InvalidSourceName {
                    name: descriptor.name.clone(),
                });
            }
            if !names.insert(descriptor.name.clone()) {
                return Err(AcquireError::DuplicateSource {
                    name: descriptor.name.clone(),
                });
            }
        }
        if !self.sources.iter().any(|s| s.descriptor().enabled) {
            return Err(AcquireError::NoSources);
        }

        let store = ArtifactStore::new(self.output_dir);
        store.ensure_writable().await?;

        let limiter = if self.rate_limits {
            HostLimiter::from_descriptors(
                self.sources
                    .iter()
                    .map(|s| s.descriptor())
                    .filter(|d| d.enabled),
            )
        } else {
            HostLimiter::disabled()
        };

        debug!(
            enabled = self.sources.iter().filter(|s| s.descriptor().enabled).count(),
            rate_limits = self.rate_limits,
            "engine ready"
        );

        Ok(Engine {
            orchestrator: Arc::new(FallbackOrchestrator::new(
                self.sources,
                self.classifier,
                Arc::new(limiter),
                store,
                self.settings,
            )),
            cancel: self.cancel,
            observer: self.observer,
        })
    }
}

impl Engine {
    /// Starts a builder writing artifacts under `output_dir`.
    #[must_use]
    pub fn builder(output_dir: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder {
            output_dir: output_dir.into(),
            sources: Vec::new(),
            classifier: AccessClassifier::disabled(),
            settings: ChainSettings::default(),
            rate_limits: true,
            cancel: CancelToken::new(),
            observer: None,
        }
    }

    /// Token that cancels every in-flight chain of this engine.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared host limiter (for inspection).
    #[must_use]
    pub fn limiter(&self) -> &HostLimiter {
        self.orchestrator.limiter()
    }

    /// Acquires one identifier.
    ///
    /// # Errors
    ///
    /// Only fatal errors; source failures are reported in the result.
    pub async fn acquire(&self, request: AcquisitionRequest) -> Result<AcquisitionResult, AcquireError> {
        self.orchestrator.run(&request, &self.cancel).await
    }

    /// Acquires a batch under `config`.
    ///
    /// # Errors
    ///
    /// See [`ConcurrencyDispatcher::run_batch`].
    pub async fn acquire_batch(
        &self,
        requests: Vec<AcquisitionRequest>,
        config: &ConcurrencyConfig,
    ) -> Result<BatchReport, AcquireError> {
        let mut dispatcher = ConcurrencyDispatcher::new(*config);
        if let Some(observer) = &self.observer {
            dispatcher = dispatcher.with_observer(Arc::clone(observer));
        }
        dispatcher
            .run_batch(Arc::clone(&self.orchestrator), requests, &self.cancel)
            .await
    }
}
