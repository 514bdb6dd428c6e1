//! Audit-trail records produced while acquiring one identifier.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::classify::AccessStatus;
use crate::source::AttemptOutcome;

/// One attempt against one source. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// Source name.
    pub source: String,
    /// 1-indexed attempt number against this source.
    pub attempt: u32,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end.
    pub ended_at: DateTime<Utc>,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Artifact size, for fetches that returned bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Human-readable detail (error message or validation reason).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AttemptRecord {
    /// True for the success outcome.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Why an identifier ended without an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Every source failed terminally or ran out of retries.
    AllSourcesFailed,
    /// The per-identifier deadline expired.
    DeadlineExceeded,
    /// The batch was cancelled.
    Cancelled,
}

impl ExhaustionReason {
    /// Stable label for logs and histograms.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllSourcesFailed => "all_sources_failed",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Final outcome for one identifier.
///
/// Invariant: `success` holds iff exactly one record has the success outcome
/// and it is the last record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionResult {
    /// Normalized DOI.
    pub doi: String,
    /// Whether a validated artifact was obtained.
    pub success: bool,
    /// Source that supplied the artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Where the artifact was stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// Classifier verdict that shaped the source order.
    pub access: AccessStatus,
    /// Attempt trail in chronological order.
    pub attempts: Vec<AttemptRecord>,
    /// Wall-clock time for the whole chain.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhaustion: Option<ExhaustionReason>,
}

impl AcquisitionResult {
    /// Size of the stored artifact, if any.
    #[must_use]
    pub fn artifact_bytes(&self) -> Option<u64> {
        self.attempts.last().filter(|r| r.is_success()).and_then(|r| r.bytes)
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
pub(crate) fn serialize_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
