//! Fatal and configuration errors that abort a batch.
//!
//! Per-source failures never surface here; they are recorded in the attempt
//! trail of the affected identifier.

use std::path::PathBuf;

use thiserror::Error;

/// Minimum worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum worker count.
pub const MAX_WORKERS: usize = 64;

/// Errors that abort acquisition instead of degrading one identifier.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// No enabled sources remain after configuration.
    #[error("no enabled sources configured")]
    NoSources,

    /// A source name cannot be used in artifact filenames.
    #[error("invalid source name '{name}': use at most 32 lowercase letters, digits and '-'")]
    InvalidSourceName {
        /// The offending name.
        name: String,
    },

    /// Two sources were registered under the same name.
    #[error("source '{name}' registered twice")]
    DuplicateSource {
        /// The repeated name.
        name: String,
    },

    /// The output directory cannot be created or written.
    #[error("output directory {path} is not writable: {source}")]
    OutputDirUnwritable {
        /// Directory that failed the probe.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a validated artifact failed.
    #[error("failed to store artifact at {path}: {source}")]
    Storage {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Worker count out of range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },

    /// The same identifier appears twice in one batch.
    #[error("duplicate identifier in batch: {doi}")]
    DuplicateIdentifier {
        /// The repeated DOI.
        doi: String,
    },

    /// A worker task panicked.
    #[error("acquisition task failed: {0}")]
    TaskFailed(String),
}

impl AcquireError {
    /// Creates an unwritable-output-directory error.
    pub fn output_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::OutputDirUnwritable {
            path: path.into(),
            source,
        }
    }

    /// Creates a storage error.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}
