//! paperfetch core library
//!
//! Acquires PDF artifacts for DOIs from several independent sources, with
//! bounded retries, per-host politeness limits, open-access-aware source
//! ordering and validation of everything that is stored.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`request`] - Acquisition requests and DOI normalization
//! - [`source`] - The [`SourceAdapter`] seam and the built-in sources
//! - [`classify`] - Open-access classification and source ordering
//! - [`acquire`] - Retries, host limits, validation, the fallback chain,
//!   the worker pool and the [`Engine`] facade
//! - [`config`] - TOML configuration and conversion into engine settings
//!
//! # Example
//!
//! ```no_run
//! use paperfetch_core::{AcquisitionRequest, ConcurrencyConfig, Engine};
//! use paperfetch_core::source::{SourceOptions, build_default_sources};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder("papers")
//!     .sources(build_default_sources(&SourceOptions::default()))
//!     .build()
//!     .await?;
//! let report = engine
//!     .acquire_batch(
//!         vec![AcquisitionRequest::new("10.1371/journal.pone.0000001")?],
//!         &ConcurrencyConfig::default(),
//!     )
//!     .await?;
//! println!("{} of {} succeeded", report.succeeded, report.total);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquire;
pub mod classify;
pub mod config;
pub mod request;
pub mod source;
mod user_agent;

// Re-export commonly used types
pub use acquire::{
    AcquireError, AcquisitionResult, AttemptRecord, BatchReport, CancelToken, ChainSettings,
    ConcurrencyConfig, Engine, EngineBuilder, RetryPolicy,
};
pub use classify::{AccessClassifier, AccessStatus};
pub use config::{ConfigError, FileConfig, load_config};
pub use request::{AcquisitionRequest, RequestError, parse_request_line};
pub use source::{
    AccessTier, ProtocolKind, SourceAdapter, SourceDescriptor, SourceError, build_default_sources,
};
