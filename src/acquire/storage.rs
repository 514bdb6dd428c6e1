//! Persists validated artifacts under `{identifier}_{source}.{ext}`.
//!
//! The identifier part is the percent-encoded DOI and source names are
//! restricted to `[a-z0-9-]`, so the mapping from (identifier, source) to
//! filename is injective and concurrent workers never write the same path.
//! Writes go to a `.part` file first and are renamed into place.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::error::AcquireError;
use crate::request::AcquisitionRequest;

/// Extension used for PDF artifacts.
pub const PDF_EXTENSION: &str = "pdf";

const PROBE_FILE: &str = ".paperfetch-write-probe";

/// Output directory for artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `root`. Nothing is touched until [`Self::ensure_writable`].
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory if needed and proves it is writable.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::OutputDirUnwritable`]; callers treat it as fatal.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn ensure_writable(&self) -> Result<(), AcquireError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AcquireError::output_dir(&self.root, e))?;

        let probe = self.root.join(PROBE_FILE);
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|e| AcquireError::output_dir(&self.root, e))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| AcquireError::output_dir(&self.root, e))?;

        debug!("output directory writable");
        Ok(())
    }

    /// Deterministic path for `request` fetched from `source`.
    #[must_use]
    pub fn path_for(&self, request: &AcquisitionRequest, source: &str) -> PathBuf {
        self.root
            .join(format!("{}_{source}.{PDF_EXTENSION}", request.file_stem()))
    }

    /// Reads an existing artifact, if present.
    pub async fn read_existing(&self, request: &AcquisitionRequest, source: &str) -> Option<Vec<u8>> {
        let path = self.path_for(request, source);
        tokio::fs::read(&path).await.ok()
    }

    /// Writes `bytes` atomically and returns the final path.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Storage`] if the write or rename fails.
    #[instrument(skip(self, request, bytes), fields(doi = %request.doi(), len = bytes.len()))]
    pub async fn write(
        &self,
        request: &AcquisitionRequest,
        source: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, AcquireError> {
        let path = self.path_for(request, source);
        let mut partial = path.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| AcquireError::storage(&partial, e))?;
        if let Err(error) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(AcquireError::storage(&path, error));
        }

        debug!(path = %path.display(), "artifact stored");
        Ok(path)
    }
}
